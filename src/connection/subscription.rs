//! Subscription lifecycle: subscribe, unsubscribe, and the kind predicates.
//!
//! A subscription's query route survives non-terminal messages and removes
//! itself on terminal kinds, with cleanup happening before the terminal
//! callback fires so the callback can safely re-subscribe with a fresh ID.
//! Unsubscribing never clears the route locally; the server's
//! `unsubscribe_applied` does.

use std::sync::Arc;

use crate::connection::session::{Connection, SubscriptionCallback};
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{ClientMessage, MessageKind};

/// Whether a subscription route produces this kind at all.
pub fn is_expected_message_kind(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::SubscribeApplied
            | MessageKind::TransactionUpdate
            | MessageKind::SubscriptionError
            | MessageKind::UnsubscribeApplied
    )
}

/// Whether this kind ends the subscription and its route.
pub fn is_terminal_message_kind(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::SubscriptionError | MessageKind::UnsubscribeApplied
    )
}

impl Connection {
    /// Start a long-lived subscription over one or more query strings.
    ///
    /// Returns the allocated query ID. The callback fires for every message
    /// routed to that ID: `subscribe_applied`, `transaction_update`, and the
    /// terminal `unsubscribe_applied` / `subscription_error`. On a send
    /// failure the allocated query ID is available via [`Error::id`].
    pub async fn subscribe(
        &self,
        query_strings: Vec<String>,
        callback: Option<SubscriptionCallback>,
    ) -> Result<u32> {
        if query_strings.is_empty() {
            return Err(Error::invalid_argument(
                "subscribe",
                "at least one query string is required",
            ));
        }
        if query_strings.iter().any(String::is_empty) {
            return Err(Error::invalid_argument(
                "subscribe",
                "query strings must be non-empty",
            ));
        }

        let query_id = self.next_query_id();
        let request_id = self.next_request_id();

        if let Some(callback) = &callback {
            self.pending_subs
                .lock()
                .unwrap()
                .insert(query_id, Arc::clone(callback));

            let router = Arc::clone(&self.router);
            let pending_subs = Arc::clone(&self.pending_subs);
            let callback = Arc::clone(callback);
            self.on_query(
                query_id,
                Arc::new(move |message| {
                    let kind = message.kind;
                    if !is_expected_message_kind(kind) {
                        callback(
                            message,
                            Some(Error::new(
                                ErrorCode::UnexpectedKind,
                                "subscription_message",
                                format!(
                                    "unexpected subscription message kind: {:?}",
                                    kind.wire_name()
                                ),
                            )),
                        );
                        return;
                    }

                    if is_terminal_message_kind(kind) {
                        pending_subs.lock().unwrap().remove(&query_id);
                        router.clear_query(query_id);
                    }
                    callback(message, None);
                }),
            );
        }

        let message = ClientMessage::subscribe(request_id, query_id, query_strings);
        if let Err(err) = self.send_client_message(&message).await {
            if callback.is_some() {
                self.pending_subs.lock().unwrap().remove(&query_id);
                self.clear_query_route(query_id);
            }
            return Err(err.with_id(query_id));
        }

        Ok(query_id)
    }

    /// Ask the server to end a subscription.
    ///
    /// Returns the request ID of the unsubscribe message (on a send failure,
    /// via [`Error::id`]). The query route is cleared when
    /// `unsubscribe_applied` arrives, not here.
    pub async fn unsubscribe(&self, query_id: u32) -> Result<u32> {
        let request_id = self.next_request_id();
        let message = ClientMessage::unsubscribe(request_id, query_id);
        if let Err(err) = self.send_client_message(&message).await {
            return Err(err.with_id(request_id));
        }
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_kind_set() {
        assert!(is_expected_message_kind(MessageKind::SubscribeApplied));
        assert!(is_expected_message_kind(MessageKind::TransactionUpdate));
        assert!(is_expected_message_kind(MessageKind::SubscriptionError));
        assert!(is_expected_message_kind(MessageKind::UnsubscribeApplied));

        assert!(!is_expected_message_kind(MessageKind::ReducerResult));
        assert!(!is_expected_message_kind(MessageKind::InitialConnection));
        assert!(!is_expected_message_kind(MessageKind::Unknown));
    }

    #[test]
    fn test_terminal_kind_set() {
        assert!(is_terminal_message_kind(MessageKind::SubscriptionError));
        assert!(is_terminal_message_kind(MessageKind::UnsubscribeApplied));

        assert!(!is_terminal_message_kind(MessageKind::SubscribeApplied));
        assert!(!is_terminal_message_kind(MessageKind::TransactionUpdate));
    }
}
