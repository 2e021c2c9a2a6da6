//! Message types shared by the codec, router, and session.
//!
//! Outbound traffic is a [`ClientMessage`] serialized by a pluggable
//! [`MessageEncoder`]; inbound frames decode to a [`RoutedMessage`] via a
//! pluggable [`MessageDecoder`]. JSON implementations of both are the
//! defaults ([`json_message_encoder`] / [`json_message_decoder`]).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::decoder::decode_message;
use crate::error::BoxError;

/// Compression requested from the server for inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Identity frames (scheme byte 0).
    None,
    /// Gzip frames (scheme byte 2).
    Gzip,
}

impl Compression {
    /// Wire rendering used in the subscribe URL's `compression` parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Gzip => "Gzip",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Compression {
    type Err = crate::error::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "None" => Ok(Compression::None),
            "Gzip" => Ok(Compression::Gzip),
            other => Err(crate::error::Error::invalid_argument(
                "parse_compression",
                format!("invalid compression: {other:?}"),
            )),
        }
    }
}

/// Kinds of server messages the client can route.
///
/// Unrecognized wire names decode to [`MessageKind::Unknown`] so that new
/// server variants do not kill the connection; an `Unknown` message only
/// routes through the by-kind tier, where nothing registers for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    InitialConnection,
    SubscribeApplied,
    UnsubscribeApplied,
    SubscriptionError,
    TransactionUpdate,
    OneOffQueryResult,
    ReducerResult,
    ProcedureResult,
    #[default]
    Unknown,
}

impl MessageKind {
    /// Wire snake_case name of this kind.
    pub fn wire_name(&self) -> &'static str {
        match self {
            MessageKind::InitialConnection => "initial_connection",
            MessageKind::SubscribeApplied => "subscribe_applied",
            MessageKind::UnsubscribeApplied => "unsubscribe_applied",
            MessageKind::SubscriptionError => "subscription_error",
            MessageKind::TransactionUpdate => "transaction_update",
            MessageKind::OneOffQueryResult => "one_off_query_result",
            MessageKind::ReducerResult => "reducer_result",
            MessageKind::ProcedureResult => "procedure_result",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Parse a kind name, accepting both the wire snake_case form and the
    /// PascalCase alias, case-insensitively. Returns `None` for names outside
    /// the closed set.
    pub fn parse(raw: &str) -> Option<MessageKind> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "initial_connection" | "initialconnection" => Some(MessageKind::InitialConnection),
            "subscribe_applied" | "subscribeapplied" => Some(MessageKind::SubscribeApplied),
            "unsubscribe_applied" | "unsubscribeapplied" => Some(MessageKind::UnsubscribeApplied),
            "subscription_error" | "subscriptionerror" => Some(MessageKind::SubscriptionError),
            "transaction_update" | "transactionupdate" => Some(MessageKind::TransactionUpdate),
            "one_off_query_result" | "oneoffqueryresult" => Some(MessageKind::OneOffQueryResult),
            "reducer_result" | "reducerresult" => Some(MessageKind::ReducerResult),
            "procedure_result" | "procedureresult" => Some(MessageKind::ProcedureResult),
            _ => None,
        }
    }

    /// Resolve the tag of a tagged envelope (exact PascalCase names).
    pub(crate) fn from_tag(tag: &str) -> Option<MessageKind> {
        match tag {
            "InitialConnection" => Some(MessageKind::InitialConnection),
            "SubscribeApplied" => Some(MessageKind::SubscribeApplied),
            "UnsubscribeApplied" => Some(MessageKind::UnsubscribeApplied),
            "SubscriptionError" => Some(MessageKind::SubscriptionError),
            "TransactionUpdate" => Some(MessageKind::TransactionUpdate),
            "OneOffQueryResult" => Some(MessageKind::OneOffQueryResult),
            "ReducerResult" => Some(MessageKind::ReducerResult),
            "ProcedureResult" => Some(MessageKind::ProcedureResult),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A decoded inbound frame, tagged for dispatch.
#[derive(Debug, Clone, Default)]
pub struct RoutedMessage {
    pub kind: MessageKind,
    pub request_id: Option<u32>,
    pub query_id: Option<u32>,
    pub payload: Option<serde_json::Value>,
}

/// Kinds of client messages, rendered with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageKind {
    CallReducer,
    CallProcedure,
    OneOffQuery,
    #[serde(rename = "subscribe_multi")]
    Subscribe,
    #[serde(rename = "unsubscribe_multi")]
    Unsubscribe,
}

impl ClientMessageKind {
    /// Wire name of this kind, as serialized in the `kind` field.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ClientMessageKind::CallReducer => "call_reducer",
            ClientMessageKind::CallProcedure => "call_procedure",
            ClientMessageKind::OneOffQuery => "one_off_query",
            ClientMessageKind::Subscribe => "subscribe_multi",
            ClientMessageKind::Unsubscribe => "unsubscribe_multi",
        }
    }
}

impl fmt::Display for ClientMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An outbound client message. Absent optional fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub kind: ClientMessageKind,
    pub request_id: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query_id: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub reducer: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub procedure: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub args: Vec<u8>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub query: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub query_strings: Vec<String>,
}

impl ClientMessage {
    fn bare(kind: ClientMessageKind, request_id: u32) -> Self {
        Self {
            kind,
            request_id,
            query_id: None,
            reducer: String::new(),
            procedure: String::new(),
            args: Vec::new(),
            query: String::new(),
            query_strings: Vec::new(),
        }
    }

    /// A `call_reducer` request.
    pub fn call_reducer(request_id: u32, reducer: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            reducer: reducer.into(),
            args,
            ..Self::bare(ClientMessageKind::CallReducer, request_id)
        }
    }

    /// A `call_procedure` request.
    pub fn call_procedure(request_id: u32, procedure: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            procedure: procedure.into(),
            args,
            ..Self::bare(ClientMessageKind::CallProcedure, request_id)
        }
    }

    /// A `one_off_query` request.
    pub fn one_off_query(request_id: u32, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::bare(ClientMessageKind::OneOffQuery, request_id)
        }
    }

    /// A `subscribe_multi` request carrying both identifiers.
    pub fn subscribe(request_id: u32, query_id: u32, query_strings: Vec<String>) -> Self {
        Self {
            query_id: Some(query_id),
            query_strings,
            ..Self::bare(ClientMessageKind::Subscribe, request_id)
        }
    }

    /// An `unsubscribe_multi` request targeting an existing subscription.
    pub fn unsubscribe(request_id: u32, query_id: u32) -> Self {
        Self {
            query_id: Some(query_id),
            ..Self::bare(ClientMessageKind::Unsubscribe, request_id)
        }
    }
}

/// Pluggable outbound encoder.
pub type MessageEncoder =
    Arc<dyn Fn(&ClientMessage) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static>;

/// Pluggable inbound decoder.
pub type MessageDecoder =
    Arc<dyn Fn(&[u8]) -> Result<RoutedMessage, BoxError> + Send + Sync + 'static>;

/// Default JSON encoder for outbound client messages.
pub fn json_message_encoder(message: &ClientMessage) -> Result<Vec<u8>, BoxError> {
    Ok(serde_json::to_vec(message)?)
}

/// Default JSON decoder for inbound server envelopes.
pub fn json_message_decoder(payload: &[u8]) -> Result<RoutedMessage, BoxError> {
    Ok(decode_message(payload)?)
}
