//! Bus envelope encoding.
//!
//! Every message is JSON-encoded, the JSON text is base64-encoded, and the
//! result is wrapped as `{"Node_Id": <node id>, "data": <base64>}`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::BusMessage;

/// Outer bus payload carrying one encoded [`BusMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Node_Id")]
    pub node_id: String,
    pub data: String,
}

impl Envelope {
    /// Wrap a message for the given node.
    pub fn wrap(node_id: impl Into<String>, message: &BusMessage) -> Result<Self> {
        let inner = serde_json::to_vec(message)?;
        Ok(Self {
            node_id: node_id.into(),
            data: STANDARD.encode(inner),
        })
    }

    /// Decode the inner message.
    pub fn message(&self) -> Result<BusMessage> {
        let inner = STANDARD.decode(&self.data)?;
        serde_json::from_slice(&inner).map_err(|e| Error::Message(e.to_string()))
    }
}

/// Encode a message into the bytes published on the bus.
pub fn encode_envelope(node_id: &str, message: &BusMessage) -> Result<Vec<u8>> {
    let envelope = Envelope::wrap(node_id, message)?;
    serde_json::to_vec(&envelope).map_err(Error::from)
}

/// Parse bus bytes back into an envelope.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(payload).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SensorValue;

    #[test]
    fn test_marker_payloads_match_wire_captures() {
        let start = Envelope::wrap("1004", &BusMessage::InitialStart).unwrap();
        assert_eq!(start.data, "eyJpbml0aWFsU3RhcnQiOjF9");

        let end = Envelope::wrap("1004", &BusMessage::End).unwrap();
        assert_eq!(end.data, "eyJlbmQiOjF9");
    }

    #[test]
    fn test_reading_payload_matches_wire_capture() {
        let msg = BusMessage::Reading {
            sensor: "RES_0".to_string(),
            value: SensorValue::Unsigned(741),
        };
        let envelope = Envelope::wrap("1004", &msg).unwrap();
        assert_eq!(envelope.data, "eyJSRVNfMCI6NzQxLCJhbGFybSI6MCwic3RhcnQiOjF9");
    }

    #[test]
    fn test_envelope_field_names() {
        let bytes = encode_envelope("N1", &BusMessage::End).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"Node_Id":"N1","data":"eyJlbmQiOjF9"}"#);
    }

    #[test]
    fn test_decode_inner_message() {
        let bytes = br#"{"Node_Id":"N1","data":"eyJSRVNfMCI6NzQxLCJhbGFybSI6MCwic3RhcnQiOjF9"}"#;
        let envelope = decode_envelope(bytes).unwrap();
        assert_eq!(envelope.node_id, "N1");
        assert_eq!(
            envelope.message().unwrap(),
            BusMessage::Reading {
                sensor: "RES_0".to_string(),
                value: SensorValue::Unsigned(741),
            }
        );
    }

    #[test]
    fn test_invalid_base64_is_reported() {
        let envelope = Envelope {
            node_id: "N1".to_string(),
            data: "not base64!".to_string(),
        };
        assert!(matches!(envelope.message(), Err(Error::Base64(_))));
    }
}
