//! Inbound envelope decoding.
//!
//! Two wire shapes are accepted:
//!
//! - Legacy envelope: `{"kind":"reducer_result","request_id":1,"payload":{...}}`
//! - Tagged envelope: `{"tag":"ReducerResult","value":{...}}`
//!
//! The legacy shape wins whenever it parses with a non-empty `kind`. Kind
//! names outside the closed set decode to [`MessageKind::Unknown`] rather
//! than failing, so future server variants do not kill the connection.

use serde::Deserialize;
use serde_json::Value;

use super::message::{MessageKind, RoutedMessage};
use super::ProtocolError;

#[derive(Deserialize)]
struct LegacyEnvelope {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    request_id: Option<u32>,
    #[serde(default)]
    query_id: Option<u32>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct TaggedEnvelope {
    #[serde(default)]
    tag: String,
    #[serde(default)]
    value: Option<Value>,
}

/// Decode a decompressed server payload into a [`RoutedMessage`].
pub fn decode_message(payload: &[u8]) -> Result<RoutedMessage, ProtocolError> {
    if let Ok(legacy) = serde_json::from_slice::<LegacyEnvelope>(payload) {
        if !legacy.kind.is_empty() {
            let kind = MessageKind::parse(&legacy.kind).unwrap_or(MessageKind::Unknown);
            return Ok(RoutedMessage {
                kind,
                request_id: legacy.request_id,
                query_id: legacy.query_id,
                payload: legacy.payload,
            });
        }
    }

    let tagged = serde_json::from_slice::<TaggedEnvelope>(payload)
        .map_err(ProtocolError::DecodeEnvelope)?;
    if tagged.tag.is_empty() {
        return Err(ProtocolError::MissingKind);
    }

    let kind = MessageKind::from_tag(&tagged.tag).unwrap_or(MessageKind::Unknown);
    let mut message = RoutedMessage {
        kind,
        ..RoutedMessage::default()
    };
    if let Some(value) = tagged.value {
        message.request_id = extract_request_id(&value);
        message.query_id = extract_query_id(&value);
        message.payload = Some(value);
    }
    Ok(message)
}

fn extract_request_id(value: &Value) -> Option<u32> {
    value.as_object()?.get("request_id").and_then(numeric_u32)
}

fn extract_query_id(value: &Value) -> Option<u32> {
    let object = value.as_object()?;
    if let Some(raw) = object.get("query_id") {
        return numeric_u32(raw);
    }
    object
        .get("query_set_id")?
        .as_object()?
        .get("id")
        .and_then(numeric_u32)
}

/// Accept any numeric representation of a non-negative integer <= u32::MAX.
fn numeric_u32(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n,
        _ => return None,
    };
    if let Some(unsigned) = number.as_u64() {
        return u32::try_from(unsigned).ok();
    }
    let float = number.as_f64()?;
    if float >= 0.0 && float <= f64::from(u32::MAX) && float.fract() == 0.0 {
        Some(float as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_envelope_with_snake_case_kind() {
        let message = decode_message(
            br#"{"kind":"reducer_result","request_id":7,"payload":{"ok":true}}"#,
        )
        .unwrap();

        assert_eq!(message.kind, MessageKind::ReducerResult);
        assert_eq!(message.request_id, Some(7));
        assert_eq!(message.query_id, None);
        assert_eq!(message.payload.unwrap()["ok"], true);
    }

    #[test]
    fn test_legacy_envelope_with_pascal_case_kind() {
        let message = decode_message(br#"{"kind":"ReducerResult","request_id":7}"#).unwrap();
        assert_eq!(message.kind, MessageKind::ReducerResult);
        assert_eq!(message.request_id, Some(7));
    }

    #[test]
    fn test_tagged_envelope_with_nested_query_set_id() {
        let message = decode_message(
            br#"{"tag":"SubscribeApplied","value":{"request_id":9,"query_set_id":{"id":3},"rows":{"tables":[]}}}"#,
        )
        .unwrap();

        assert_eq!(message.kind, MessageKind::SubscribeApplied);
        assert_eq!(message.request_id, Some(9));
        assert_eq!(message.query_id, Some(3));
        assert!(message.payload.is_some());
    }

    #[test]
    fn test_tagged_envelope_with_direct_query_id() {
        let message = decode_message(
            br#"{"tag":"TransactionUpdate","value":{"query_id":11}}"#,
        )
        .unwrap();
        assert_eq!(message.kind, MessageKind::TransactionUpdate);
        assert_eq!(message.query_id, Some(11));
    }

    #[test]
    fn test_unknown_kind_is_not_fatal() {
        let message = decode_message(br#"{"kind":"future_feature","request_id":1}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Unknown);
        assert_eq!(message.request_id, Some(1));

        let message = decode_message(br#"{"tag":"FutureFeature","value":{}}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Unknown);
    }

    #[test]
    fn test_missing_kind_and_tag_fails() {
        let err = decode_message(br#"{"request_id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingKind));

        let err = decode_message(br#"{"kind":""}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingKind));
    }

    #[test]
    fn test_malformed_json_fails() {
        let err = decode_message(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::DecodeEnvelope(_)));
    }

    #[test]
    fn test_numeric_extraction_bounds() {
        // Float representation of an integer is accepted.
        let message = decode_message(
            br#"{"tag":"ReducerResult","value":{"request_id":7.0}}"#,
        )
        .unwrap();
        assert_eq!(message.request_id, Some(7));

        // Negative and fractional values are ignored, not errors.
        let message = decode_message(
            br#"{"tag":"ReducerResult","value":{"request_id":-1,"query_id":2.5}}"#,
        )
        .unwrap();
        assert_eq!(message.request_id, None);
        assert_eq!(message.query_id, None);

        // Values above u32::MAX are ignored.
        let message = decode_message(
            br#"{"tag":"ReducerResult","value":{"request_id":4294967296}}"#,
        )
        .unwrap();
        assert_eq!(message.request_id, None);
    }

    #[test]
    fn test_tagged_envelope_with_non_object_value() {
        let message = decode_message(br#"{"tag":"ReducerResult","value":[1,2,3]}"#).unwrap();
        assert_eq!(message.kind, MessageKind::ReducerResult);
        assert_eq!(message.request_id, None);
        assert_eq!(message.query_id, None);
        assert!(message.payload.is_some());
    }
}
