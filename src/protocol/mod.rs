//! Wire protocol: envelope types, codecs, and frame decompression.
//!
//! This module owns everything between raw websocket frames and
//! [`RoutedMessage`] values:
//!
//! - [`message`] - client/server message types and the pluggable
//!   encoder/decoder seams (JSON defaults provided)
//! - [`decoder`] - inbound envelope decoding (legacy and tagged shapes)
//! - [`compression`] - the one-byte compression prefix on server frames
//! - [`initial_connection`] - payload of the `initial_connection` message

use thiserror::Error;

mod compression;
mod decoder;
mod initial_connection;
mod message;

pub use compression::decompress_server_message;
pub use decoder::decode_message;
pub use initial_connection::{decode_initial_connection_payload, InitialConnectionPayload};
pub use message::{
    json_message_decoder, json_message_encoder, ClientMessage, ClientMessageKind, Compression,
    MessageDecoder, MessageEncoder, MessageKind, RoutedMessage,
};

/// Required websocket subprotocol; a mismatch aborts the connect.
pub const WS_SUBPROTOCOL_V2: &str = "v2.bsatn.spacetimedb";

/// Protocol-level failures: frame decompression and envelope decoding.
///
/// Any of these observed by the session reader is fatal to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Server frames always carry at least the compression scheme byte.
    #[error("empty websocket message")]
    EmptyFrame,

    /// Scheme 1 is reserved for brotli, which this client does not decode.
    #[error("brotli compression is not yet supported")]
    BrotliUnsupported,

    /// Compression scheme byte outside the known set.
    #[error("unknown compression scheme: {0}")]
    UnknownCompressionScheme(u8),

    /// Gzip inflate failed partway through the payload.
    #[error("gzip decompress: {0}")]
    Gzip(#[source] std::io::Error),

    /// Neither envelope shape parsed as JSON.
    #[error("decode incoming message: {0}")]
    DecodeEnvelope(#[source] serde_json::Error),

    /// Both envelope shapes parsed but neither carried a kind or tag.
    #[error("missing message kind/tag")]
    MissingKind,

    /// `initial_connection` arrived without a payload object.
    #[error("initial_connection payload is missing")]
    MissingInitialConnectionPayload,

    /// `initial_connection` payload did not match the expected shape.
    #[error("decode initial_connection payload: {0}")]
    DecodeInitialConnectionPayload(#[source] serde_json::Error),

    /// `initial_connection` payload parsed but a required field was empty.
    #[error("initial_connection payload missing {0}")]
    MissingInitialConnectionField(&'static str),
}
