//! Three-tier message routing.
//!
//! Inbound messages are matched against three disjoint maps in strict order:
//! by request ID, then by query ID, then by message kind. The first match
//! wins; a message matching nothing is dropped, which is valid - the server
//! may emit kinds the client does not care about.
//!
//! Handlers run synchronously on the caller (normally the session reader
//! task) and are invoked outside the map locks, so a handler may re-enter
//! registration and clearing operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::{MessageKind, RoutedMessage};

/// Handler invoked with a routed message.
pub type RouteHandler = Arc<dyn Fn(RoutedMessage) + Send + Sync + 'static>;

/// The three-tier dispatcher.
#[derive(Default)]
pub struct Router {
    by_request: Mutex<HashMap<u32, RouteHandler>>,
    by_query: Mutex<HashMap<u32, RouteHandler>>,
    by_kind: Mutex<HashMap<MessageKind, RouteHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a request ID.
    pub fn on_request(&self, request_id: u32, handler: RouteHandler) {
        self.by_request.lock().unwrap().insert(request_id, handler);
    }

    /// Register a handler for a query ID.
    pub fn on_query(&self, query_id: u32, handler: RouteHandler) {
        self.by_query.lock().unwrap().insert(query_id, handler);
    }

    /// Register a handler for a message kind.
    pub fn on_kind(&self, kind: MessageKind, handler: RouteHandler) {
        self.by_kind.lock().unwrap().insert(kind, handler);
    }

    /// Remove the request route, if present.
    pub fn clear_request(&self, request_id: u32) {
        self.by_request.lock().unwrap().remove(&request_id);
    }

    /// Remove the query route, if present.
    pub fn clear_query(&self, query_id: u32) {
        self.by_query.lock().unwrap().remove(&query_id);
    }

    /// Remove the kind route, if present.
    pub fn clear_kind(&self, kind: MessageKind) {
        self.by_kind.lock().unwrap().remove(&kind);
    }

    /// Dispatch one message through the tiers.
    pub fn dispatch(&self, message: RoutedMessage) {
        if let Some(request_id) = message.request_id {
            let handler = self.by_request.lock().unwrap().get(&request_id).cloned();
            if let Some(handler) = handler {
                handler(message);
                return;
            }
        }
        if let Some(query_id) = message.query_id {
            let handler = self.by_query.lock().unwrap().get(&query_id).cloned();
            if let Some(handler) = handler {
                handler(message);
                return;
            }
        }
        let handler = self.by_kind.lock().unwrap().get(&message.kind).cloned();
        if let Some(handler) = handler {
            handler(message);
        }
    }
}
