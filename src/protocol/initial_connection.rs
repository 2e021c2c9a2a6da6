//! Payload of the `initial_connection` server message.

use serde::Deserialize;
use serde_json::Value;

use super::ProtocolError;

/// Identity and session metadata delivered once per session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitialConnectionPayload {
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub connection_id: String,
    #[serde(default)]
    pub token: String,
}

/// Decode a routed message's payload into an [`InitialConnectionPayload`].
///
/// All three fields are required to be present and non-empty.
pub fn decode_initial_connection_payload(
    payload: Option<&Value>,
) -> Result<InitialConnectionPayload, ProtocolError> {
    let value = payload.ok_or(ProtocolError::MissingInitialConnectionPayload)?;
    let decoded: InitialConnectionPayload = serde_json::from_value(value.clone())
        .map_err(ProtocolError::DecodeInitialConnectionPayload)?;

    if decoded.identity.is_empty() {
        return Err(ProtocolError::MissingInitialConnectionField("identity"));
    }
    if decoded.connection_id.is_empty() {
        return Err(ProtocolError::MissingInitialConnectionField("connection_id"));
    }
    if decoded.token.is_empty() {
        return Err(ProtocolError::MissingInitialConnectionField("token"));
    }
    Ok(decoded)
}
