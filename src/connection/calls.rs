//! Request/response APIs: reducers, procedures, and one-off queries.
//!
//! Each call allocates a request ID, installs a request route that removes
//! itself on first delivery, and emits the client message. A send failure
//! rolls back the just-installed route and callback before returning; the
//! allocated request ID rides on the error ([`Error::id`]) so the caller can
//! still correlate it in logs.

use std::sync::Arc;

use crate::connection::session::{Connection, ResultCallback};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, MessageKind};

impl Connection {
    /// Invoke a reducer by name. Expects a `reducer_result` reply.
    pub async fn call_reducer(
        &self,
        reducer: &str,
        args: Vec<u8>,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        if reducer.is_empty() {
            return Err(Error::invalid_argument(
                "call_reducer",
                "reducer name is required",
            ));
        }

        let request_id = self.next_request_id();
        self.call_with_request_route(
            ClientMessage::call_reducer(request_id, reducer, args),
            MessageKind::ReducerResult,
            callback,
        )
        .await
    }

    /// Invoke a procedure by name. Expects a `procedure_result` reply.
    pub async fn call_procedure(
        &self,
        procedure: &str,
        args: Vec<u8>,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        if procedure.is_empty() {
            return Err(Error::invalid_argument(
                "call_procedure",
                "procedure name is required",
            ));
        }

        let request_id = self.next_request_id();
        self.call_with_request_route(
            ClientMessage::call_procedure(request_id, procedure, args),
            MessageKind::ProcedureResult,
            callback,
        )
        .await
    }

    /// Run a single query. Expects a `one_off_query_result` reply.
    pub async fn one_off_query(
        &self,
        query: &str,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        if query.is_empty() {
            return Err(Error::invalid_argument("one_off_query", "query is required"));
        }

        let request_id = self.next_request_id();
        self.call_with_request_route(
            ClientMessage::one_off_query(request_id, query),
            MessageKind::OneOffQueryResult,
            callback,
        )
        .await
    }

    async fn call_with_request_route(
        &self,
        message: ClientMessage,
        expected_kind: MessageKind,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        let request_id = message.request_id;

        if let Some(callback) = &callback {
            self.pending_calls
                .lock()
                .unwrap()
                .insert(request_id, Arc::clone(callback));

            let router = Arc::clone(&self.router);
            let pending_calls = Arc::clone(&self.pending_calls);
            let callback = Arc::clone(callback);
            self.on_request(
                request_id,
                Arc::new(move |result| {
                    pending_calls.lock().unwrap().remove(&request_id);
                    router.clear_request(request_id);

                    let kind = result.kind;
                    if kind != expected_kind {
                        callback(
                            result,
                            Some(Error::unexpected_kind("call_result", kind, expected_kind)),
                        );
                        return;
                    }
                    callback(result, None);
                }),
            );
        }

        if let Err(err) = self.send_client_message(&message).await {
            if callback.is_some() {
                self.pending_calls.lock().unwrap().remove(&request_id);
                self.clear_request_route(request_id);
            }
            return Err(err.with_id(request_id));
        }

        Ok(request_id)
    }
}
