use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last known value of a sensor.
///
/// Direct sensors serialize as JSON integers, composite-float sensors as
/// JSON floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Raw 16-bit register.
    Unsigned(u16),
    /// Decoded floating point value.
    Float(f64),
}

impl Default for SensorValue {
    fn default() -> Self {
        SensorValue::Float(0.0)
    }
}

impl From<u16> for SensorValue {
    fn from(v: u16) -> Self {
        SensorValue::Unsigned(v)
    }
}

impl From<f32> for SensorValue {
    fn from(v: f32) -> Self {
        SensorValue::Float(f64::from(v))
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Unsigned(v) => write!(f, "{}", v),
            SensorValue::Float(v) => write!(f, "{:.4}", v),
        }
    }
}

/// One message of a publish batch.
///
/// A batch is always `InitialStart`, one `Reading` per sensor, then `End`;
/// consumers use the two markers to detect a complete batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// `{"initialStart":1}`
    InitialStart,
    /// `{"<sensor>":<value>,"alarm":0,"start":1}`
    Reading { sensor: String, value: SensorValue },
    /// `{"end":1}`
    End,
}

const INITIAL_START_KEY: &str = "initialStart";
const END_KEY: &str = "end";
const ALARM_KEY: &str = "alarm";
const START_KEY: &str = "start";

impl BusMessage {
    /// Build the ordered batch for one publish cycle.
    pub fn batch<I, S>(readings: I) -> Vec<BusMessage>
    where
        I: IntoIterator<Item = (S, SensorValue)>,
        S: Into<String>,
    {
        let mut messages = vec![BusMessage::InitialStart];
        messages.extend(
            readings
                .into_iter()
                .map(|(sensor, value)| BusMessage::Reading {
                    sensor: sensor.into(),
                    value,
                }),
        );
        messages.push(BusMessage::End);
        messages
    }
}

impl Serialize for BusMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BusMessage::InitialStart => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(INITIAL_START_KEY, &1)?;
                map.end()
            }
            BusMessage::Reading { sensor, value } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry(sensor, value)?;
                // No alarm evaluation exists; the flag is always 0.
                map.serialize_entry(ALARM_KEY, &0)?;
                map.serialize_entry(START_KEY, &1)?;
                map.end()
            }
            BusMessage::End => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(END_KEY, &1)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for BusMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;

        if map.contains_key(INITIAL_START_KEY) {
            return Ok(BusMessage::InitialStart);
        }
        if map.contains_key(END_KEY) {
            return Ok(BusMessage::End);
        }

        let (sensor, raw) = map
            .iter()
            .find(|(key, _)| key.as_str() != ALARM_KEY && key.as_str() != START_KEY)
            .ok_or_else(|| de::Error::custom("reading message without a sensor key"))?;
        let value = SensorValue::deserialize(raw).map_err(de::Error::custom)?;

        Ok(BusMessage::Reading {
            sensor: sensor.clone(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_serialization() {
        assert_eq!(
            serde_json::to_string(&BusMessage::InitialStart).unwrap(),
            r#"{"initialStart":1}"#
        );
        assert_eq!(
            serde_json::to_string(&BusMessage::End).unwrap(),
            r#"{"end":1}"#
        );
    }

    #[test]
    fn test_reading_key_order() {
        let msg = BusMessage::Reading {
            sensor: "RES_0".to_string(),
            value: SensorValue::Unsigned(741),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"RES_0":741,"alarm":0,"start":1}"#
        );
    }

    #[test]
    fn test_initial_value_is_float_zero() {
        let msg = BusMessage::Reading {
            sensor: "NER_0".to_string(),
            value: SensorValue::default(),
        };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"NER_0":0.0,"alarm":0,"start":1}"#
        );
    }

    #[test]
    fn test_batch_shape() {
        let batch = BusMessage::batch(vec![
            ("a", SensorValue::Unsigned(1)),
            ("b", SensorValue::Float(2.5)),
        ]);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[0], BusMessage::InitialStart);
        assert!(matches!(&batch[1], BusMessage::Reading { sensor, .. } if sensor == "a"));
        assert!(matches!(&batch[2], BusMessage::Reading { sensor, .. } if sensor == "b"));
        assert_eq!(batch[3], BusMessage::End);
    }

    #[test]
    fn test_empty_batch_still_has_markers() {
        let batch = BusMessage::batch(Vec::<(String, SensorValue)>::new());
        assert_eq!(batch, vec![BusMessage::InitialStart, BusMessage::End]);
    }

    #[test]
    fn test_parse_reading() {
        let msg: BusMessage = serde_json::from_str(r#"{"NER_0":3.5,"alarm":0,"start":1}"#).unwrap();
        assert_eq!(
            msg,
            BusMessage::Reading {
                sensor: "NER_0".to_string(),
                value: SensorValue::Float(3.5),
            }
        );
    }

    #[test]
    fn test_parse_rejects_bare_flags() {
        let result: Result<BusMessage, _> = serde_json::from_str(r#"{"alarm":0,"start":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(SensorValue::Unsigned(12).to_string(), "12");
        assert_eq!(SensorValue::Float(12.34567).to_string(), "12.3457");
    }
}
