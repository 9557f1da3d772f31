//! Integration tests for resmon-common library.

use resmon_common::{BusMessage, SensorValue, decode_envelope, encode_envelope};

#[test]
fn test_full_batch_workflow() {
    // Build one publish cycle for a node with a direct and a float sensor
    let batch = BusMessage::batch(vec![
        ("RES_0", SensorValue::Unsigned(741)),
        ("NER_0", SensorValue::Float(3.5)),
    ]);
    assert_eq!(batch.len(), 4);

    // Encode every message as the bridge would publish it
    let payloads: Vec<Vec<u8>> = batch
        .iter()
        .map(|msg| encode_envelope("1004", msg).expect("encode failed"))
        .collect();

    // A consumer decodes them back in order
    let decoded: Vec<BusMessage> = payloads
        .iter()
        .map(|p| {
            let envelope = decode_envelope(p).expect("envelope decode failed");
            assert_eq!(envelope.node_id, "1004");
            envelope.message().expect("inner decode failed")
        })
        .collect();

    assert_eq!(decoded, batch);
}

#[test]
fn test_consumer_detects_complete_batch() {
    let batch = BusMessage::batch(vec![("RES_1", SensorValue::Unsigned(2))]);

    let first = batch.first().expect("empty batch");
    let last = batch.last().expect("empty batch");
    assert_eq!(first, &BusMessage::InitialStart);
    assert_eq!(last, &BusMessage::End);

    let readings = batch
        .iter()
        .filter(|m| matches!(m, BusMessage::Reading { .. }))
        .count();
    assert_eq!(readings, 1);
}
