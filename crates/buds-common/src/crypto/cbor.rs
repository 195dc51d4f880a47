//! Canonical receipt envelope decoding (§4.1, §4.6).
//!
//! Receipts are CBOR maps with at least `receipt_type`, `sender_did`,
//! `timestamp`, optional `parent_cid`, and a type-specific `payload` map.
//! [`extract_sender_did`] is a targeted decoder used *before* any signature
//! is trusted — it only tells the caller which public key to verify with.

use ciborium::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiptDecodeError {
    #[error("not a valid CBOR map")]
    NotCbor,
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
}

/// A decoded receipt envelope. `payload` is left as a generic CBOR value so
/// the jar-receipt materializer can switch on `receipt_type` to interpret it.
#[derive(Debug, Clone)]
pub struct ReceiptEnvelope {
    pub receipt_type: String,
    pub sender_did: String,
    pub timestamp_ms: i64,
    pub parent_cid: Option<String>,
    pub payload: Value,
}

fn as_map(value: &Value) -> Result<&Vec<(Value, Value)>, ReceiptDecodeError> {
    match value {
        Value::Map(m) => Ok(m),
        _ => Err(ReceiptDecodeError::NotCbor),
    }
}

fn map_get<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        Value::Text(t) if t == key => Some(v),
        _ => None,
    })
}

fn value_as_text(value: &Value) -> Option<&str> {
    match value {
        Value::Text(t) => Some(t.as_str()),
        _ => None,
    }
}

/// Narrow a CBOR integer (which may decode as arbitrary precision) into a
/// fixed-width i64, since the database layer rejects arbitrary-precision
/// values.
fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).ok(),
        _ => None,
    }
}

/// Decode just enough of the envelope to find out who signed it. Does not
/// trust or check the signature — it is used to select which device key to
/// verify with.
pub fn extract_sender_did(receipt_data: &[u8]) -> Result<String, ReceiptDecodeError> {
    let value: Value =
        ciborium::de::from_reader(receipt_data).map_err(|_| ReceiptDecodeError::NotCbor)?;
    let map = as_map(&value)?;
    let sender_did = map_get(map, "sender_did")
        .and_then(value_as_text)
        .ok_or(ReceiptDecodeError::MissingField("sender_did"))?;

    if !sender_did.starts_with("did:phone:") && !sender_did.starts_with("did:buds:") {
        return Err(ReceiptDecodeError::MissingField("sender_did"));
    }

    Ok(sender_did.to_string())
}

/// Fully decode a receipt envelope.
pub fn decode_envelope(receipt_data: &[u8]) -> Result<ReceiptEnvelope, ReceiptDecodeError> {
    let value: Value =
        ciborium::de::from_reader(receipt_data).map_err(|_| ReceiptDecodeError::NotCbor)?;
    let map = as_map(&value)?;

    let receipt_type = map_get(map, "receipt_type")
        .and_then(value_as_text)
        .ok_or(ReceiptDecodeError::MissingField("receipt_type"))?
        .to_string();

    let sender_did = map_get(map, "sender_did")
        .and_then(value_as_text)
        .ok_or(ReceiptDecodeError::MissingField("sender_did"))?
        .to_string();

    let timestamp_ms = map_get(map, "timestamp")
        .and_then(value_as_i64)
        .ok_or(ReceiptDecodeError::MissingField("timestamp"))?;

    let parent_cid = map_get(map, "parent_cid").and_then(value_as_text).map(str::to_string);

    let payload = map_get(map, "payload").cloned().unwrap_or(Value::Map(vec![]));

    Ok(ReceiptEnvelope { receipt_type, sender_did, timestamp_ms, parent_cid, payload })
}

/// Read a text field out of a receipt's payload map, accepting either of two
/// alternate key spellings (clients have shipped both `member_did` and
/// `memberDID`).
pub fn payload_text_field<'a>(payload: &'a Value, key_a: &str, key_b: &str) -> Option<&'a str> {
    let map = match payload {
        Value::Map(m) => m,
        _ => return None,
    };
    map_get(map, key_a).or_else(|| map_get(map, key_b)).and_then(value_as_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf).unwrap();
        buf
    }

    fn jar_created_envelope() -> Vec<u8> {
        encode(&Value::Map(vec![
            (Value::Text("receipt_type".into()), Value::Text("jar.created".into())),
            (Value::Text("sender_did".into()), Value::Text("did:phone:abc123".into())),
            (Value::Text("timestamp".into()), Value::Integer(1_700_000_000_000i64.into())),
            (
                Value::Text("payload".into()),
                Value::Map(vec![(Value::Text("jar_id".into()), Value::Text("J1".into()))]),
            ),
        ]))
    }

    #[test]
    fn extracts_sender_did_without_trusting_signature() {
        let did = extract_sender_did(&jar_created_envelope()).unwrap();
        assert_eq!(did, "did:phone:abc123");
    }

    #[test]
    fn decodes_full_envelope() {
        let envelope = decode_envelope(&jar_created_envelope()).unwrap();
        assert_eq!(envelope.receipt_type, "jar.created");
        assert_eq!(envelope.timestamp_ms, 1_700_000_000_000);
        assert!(envelope.parent_cid.is_none());
    }

    #[test]
    fn rejects_missing_sender_did() {
        let bad = encode(&Value::Map(vec![(
            Value::Text("receipt_type".into()),
            Value::Text("jar.created".into()),
        )]));
        assert!(extract_sender_did(&bad).is_err());
    }

    #[test]
    fn accepts_alternate_payload_key_spelling() {
        let payload = Value::Map(vec![(Value::Text("memberDID".into()), Value::Text("did:phone:xyz".into()))]);
        assert_eq!(payload_text_field(&payload, "member_did", "memberDID"), Some("did:phone:xyz"));
    }
}
