//! Error types for the client SDK.
//!
//! Every operation failure is an [`Error`] carrying a stable [`ErrorCode`],
//! the operation that raised it (e.g. `call_reducer`, `send_subscribe_multi`),
//! and an optional underlying cause. Causes stay traversable through
//! [`std::error::Error::source`], so callers can match on codes anywhere in
//! the chain via [`Error::is_code`].

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::protocol::MessageKind;

/// Boxed dynamic error used at pluggable codec seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias using the SDK [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Stable failure classification for retry and diagnostics policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Empty or otherwise unusable caller input.
    InvalidArgument,
    /// Operation attempted on a closed transport or non-connected session.
    ConnectionClosed,
    /// The outbound message encoder returned an error.
    EncodeFailed,
    /// The transport write failed.
    SendFailed,
    /// A callback received a message kind inconsistent with its expected reply.
    UnexpectedKind,
    /// Dial, subprotocol negotiation, liveness probe, or token exchange failed.
    ConnectFailed,
    /// A fatal inbound decompress/decode failure (reported via disconnect).
    DecodeFailed,
    /// The cancellation token was observed before the operation started.
    Cancelled,
}

impl ErrorCode {
    /// Stable snake_case name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::ConnectionClosed => "connection_closed",
            ErrorCode::EncodeFailed => "encode_failed",
            ErrorCode::SendFailed => "send_failed",
            ErrorCode::UnexpectedKind => "unexpected_message_kind",
            ErrorCode::ConnectFailed => "connect_failed",
            ErrorCode::DecodeFailed => "decode_failed",
            ErrorCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum ErrorSource {
    Message(String),
    Cause(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

/// Canonical error wrapper for SDK operations.
///
/// `Error` is `Clone`: the cause is shared behind an `Arc` so that disconnect
/// fan-out can hand the same triggering cause to every pending callback.
///
/// Operations that allocate a request or query ID before failing attach it
/// via [`Error::id`], so the caller can correlate the failed emission in
/// logs even though the send never went out.
#[derive(Debug, Clone)]
pub struct Error {
    code: ErrorCode,
    op: Cow<'static, str>,
    source: ErrorSource,
    id: Option<u32>,
}

impl Error {
    /// Create an error from a code, operation name, and message.
    pub fn new(
        code: ErrorCode,
        op: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            op: op.into(),
            source: ErrorSource::Message(message.into()),
            id: None,
        }
    }

    /// Wrap an underlying cause with a code and operation name.
    pub fn wrap(
        code: ErrorCode,
        op: impl Into<Cow<'static, str>>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            code,
            op: op.into(),
            source: ErrorSource::Cause(Arc::from(source.into())),
            id: None,
        }
    }

    /// Attach the request or query ID allocated by the failing operation.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Invalid caller input for the given operation.
    pub fn invalid_argument(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, op, message)
    }

    /// Operation attempted on a closed transport or non-connected session.
    pub fn closed(op: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConnectionClosed, op, "connection is closed")
    }

    /// The cancellation token fired before the operation touched the transport.
    pub fn cancelled(op: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Cancelled, op, "operation cancelled")
    }

    /// A reply arrived with a kind other than the one the caller registered for.
    pub fn unexpected_kind(
        op: impl Into<Cow<'static, str>>,
        got: MessageKind,
        want: MessageKind,
    ) -> Self {
        Self::new(
            ErrorCode::UnexpectedKind,
            op,
            format!(
                "unexpected result kind: got {:?} want {:?}",
                got.wire_name(),
                want.wire_name()
            ),
        )
    }

    /// The classification code of this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The operation identifier that raised this error.
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The request or query ID the failing operation had allocated, when one
    /// was allocated before the failure.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// Whether this error, or any SDK error in its cause chain, has `code`.
    pub fn is_code(&self, code: ErrorCode) -> bool {
        if self.code == code {
            return true;
        }
        let mut current = std::error::Error::source(self);
        while let Some(err) = current {
            if let Some(sdk) = err.downcast_ref::<Error>() {
                if sdk.code == code {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ErrorSource::Message(message) => write!(f, "{} ({}): {}", self.code, self.op, message),
            ErrorSource::Cause(cause) => write!(f, "{} ({}): {}", self.code, self.op, cause),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            ErrorSource::Cause(cause) => Some(cause.as_ref()),
            ErrorSource::Message(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code_and_op() {
        let err = Error::invalid_argument("call_reducer", "reducer name is required");
        let rendered = err.to_string();
        assert!(rendered.contains("invalid_argument"));
        assert!(rendered.contains("call_reducer"));
        assert!(rendered.contains("reducer name is required"));
    }

    #[test]
    fn test_wrapped_cause_is_traversable() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone");
        let err = Error::wrap(ErrorCode::SendFailed, "send_binary", io);

        let source = std::error::Error::source(&err).expect("source present");
        assert!(source.to_string().contains("pipe gone"));
    }

    #[test]
    fn test_is_code_walks_the_chain() {
        let inner = Error::closed("send_binary");
        let outer = Error::wrap(ErrorCode::SendFailed, "send_call_reducer", inner);

        assert!(outer.is_code(ErrorCode::SendFailed));
        assert!(outer.is_code(ErrorCode::ConnectionClosed));
        assert!(!outer.is_code(ErrorCode::EncodeFailed));
    }

    #[test]
    fn test_unexpected_kind_names_both_kinds() {
        let err = Error::unexpected_kind(
            "call_result",
            MessageKind::TransactionUpdate,
            MessageKind::ReducerResult,
        );
        assert_eq!(err.code(), ErrorCode::UnexpectedKind);
        let rendered = err.to_string();
        assert!(rendered.contains("transaction_update"));
        assert!(rendered.contains("reducer_result"));
    }

    #[test]
    fn test_attached_id_is_retrievable() {
        let err = Error::closed("send_binary");
        assert_eq!(err.id(), None);

        let err = Error::wrap(ErrorCode::SendFailed, "send_call_reducer", err).with_id(7);
        assert_eq!(err.id(), Some(7));
        assert_eq!(err.clone().id(), Some(7));
    }

    #[test]
    fn test_clone_shares_the_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::wrap(ErrorCode::ConnectionClosed, "read_frame", io);
        let cloned = err.clone();
        assert_eq!(cloned.code(), err.code());
        assert_eq!(cloned.to_string(), err.to_string());
    }
}
