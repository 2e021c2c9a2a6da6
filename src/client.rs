//! High-level connection facade and lifecycle builder.
//!
//! [`DbConnection`] wraps a running session with identity metadata captured
//! from the server's `initial_connection` message. [`DbConnectionBuilder`]
//! layers bounded connect retries, cancellation, and lifecycle callbacks on
//! top of the low-level [`Builder`].

use std::sync::{Arc, Mutex, Once, RwLock, Weak};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::connection::{
    Builder, Connection, DisconnectHandler, MessageHook, ResultCallback, SubscriptionCallback,
};
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{
    decode_initial_connection_payload, Compression, MessageDecoder, MessageEncoder, MessageKind,
};

/// Callback fired once with the connected facade.
pub type ConnectCallback = Arc<dyn Fn(DbConnection) + Send + Sync + 'static>;

/// Callback fired on every failed connect attempt.
pub type ConnectErrorCallback = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// Callback fired exactly once with the captured [`ConnectionInfo`].
pub type ConnectInfoCallback = Arc<dyn Fn(DbConnection, ConnectionInfo) + Send + Sync + 'static>;

/// Identity and session metadata from the first `initial_connection` message.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub identity: String,
    pub connection_id: String,
    pub token: String,
    pub received_at: SystemTime,
}

/// A connected client.
///
/// Cheap to clone; all clones observe the same session.
#[derive(Clone)]
pub struct DbConnection {
    conn: Arc<Connection>,
    info: Arc<RwLock<Option<ConnectionInfo>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("conn", &self.conn)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl DbConnection {
    /// The underlying session.
    pub fn raw(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Whether the session has not yet observed a disconnect.
    pub fn is_active(&self) -> bool {
        self.conn.is_active()
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.conn.disconnect().await
    }

    /// The connection ID this session dialed with.
    pub fn connection_id(&self) -> &str {
        self.conn.connection_id()
    }

    /// The subscribe URL this session dialed.
    pub fn endpoint(&self) -> &str {
        self.conn.endpoint()
    }

    /// Metadata captured from `initial_connection`, once it has arrived.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.info.read().unwrap().clone()
    }

    /// The server-assigned identity, once `initial_connection` has arrived.
    pub fn identity(&self) -> Option<String> {
        self.connection_info().map(|info| info.identity)
    }

    /// The connection ID echoed by the server in `initial_connection`.
    pub fn initial_connection_id(&self) -> Option<String> {
        self.connection_info().map(|info| info.connection_id)
    }

    /// Invoke a reducer by name.
    pub async fn call_reducer(
        &self,
        reducer: &str,
        args: Vec<u8>,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        self.ensure_not_cancelled("call_reducer")?;
        self.conn.call_reducer(reducer, args, callback).await
    }

    /// Invoke a procedure by name.
    pub async fn call_procedure(
        &self,
        procedure: &str,
        args: Vec<u8>,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        self.ensure_not_cancelled("call_procedure")?;
        self.conn.call_procedure(procedure, args, callback).await
    }

    /// Run a single query.
    pub async fn one_off_query(
        &self,
        query: &str,
        callback: Option<ResultCallback>,
    ) -> Result<u32> {
        self.ensure_not_cancelled("one_off_query")?;
        self.conn.one_off_query(query, callback).await
    }

    /// Start a long-lived subscription.
    pub async fn subscribe(
        &self,
        query_strings: Vec<String>,
        callback: Option<SubscriptionCallback>,
    ) -> Result<u32> {
        self.ensure_not_cancelled("subscribe")?;
        self.conn.subscribe(query_strings, callback).await
    }

    /// Ask the server to end a subscription.
    pub async fn unsubscribe(&self, query_id: u32) -> Result<u32> {
        self.ensure_not_cancelled("unsubscribe")?;
        self.conn.unsubscribe(query_id).await
    }

    fn ensure_not_cancelled(&self, op: &'static str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(op));
        }
        Ok(())
    }
}

/// Configures and connects a [`DbConnection`], with bounded retries.
pub struct DbConnectionBuilder {
    inner: Builder,
    on_connect: Option<ConnectCallback>,
    on_connect_info: Option<ConnectInfoCallback>,
    on_connect_error: Option<ConnectErrorCallback>,
    on_disconnect: Option<DisconnectHandler>,
    retry_max_attempts: u32,
    retry_backoff: Duration,
}

impl DbConnectionBuilder {
    pub fn new() -> Self {
        Self {
            inner: Builder::new(),
            on_connect: None,
            on_connect_info: None,
            on_connect_error: None,
            on_disconnect: None,
            retry_max_attempts: 1,
            retry_backoff: Duration::ZERO,
        }
    }

    /// Host URI of the server, e.g. `https://example.com`.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.inner = self.inner.with_uri(uri);
        self
    }

    /// Name of the database to subscribe to.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.with_database_name(name);
        self
    }

    /// User token used for authentication.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.inner = self.inner.with_token(token);
        self
    }

    /// Compression requested for inbound frames.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.inner = self.inner.with_compression(compression);
        self
    }

    /// Request light-mode subscription updates.
    pub fn with_light_mode(mut self, light: bool) -> Self {
        self.inner = self.inner.with_light_mode(light);
        self
    }

    /// Request confirmed or unconfirmed reads explicitly.
    pub fn with_confirmed_reads(mut self, confirmed: bool) -> Self {
        self.inner = self.inner.with_confirmed_reads(confirmed);
        self
    }

    /// Exchange the user token for a short-lived session token (default on).
    pub fn with_use_websocket_token(mut self, enabled: bool) -> Self {
        self.inner = self.inner.with_use_websocket_token(enabled);
        self
    }

    /// Override the inbound decoder.
    pub fn with_message_decoder(mut self, decoder: Option<MessageDecoder>) -> Self {
        self.inner = self.inner.with_message_decoder(decoder);
        self
    }

    /// Override the outbound encoder.
    pub fn with_message_encoder(mut self, encoder: MessageEncoder) -> Self {
        self.inner = self.inner.with_message_encoder(encoder);
        self
    }

    /// Cancellation token honored by connect attempts and later sends.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.inner = self.inner.with_cancellation(cancel);
        self
    }

    /// Bounded retries for the initial connect.
    ///
    /// `max_attempts` includes the first attempt and is clamped to at least
    /// 1; a zero backoff retries without sleeping.
    pub fn with_connect_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.retry_max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn on_connect(mut self, callback: ConnectCallback) -> Self {
        self.on_connect = Some(callback);
        self
    }

    pub fn on_connect_info(mut self, callback: ConnectInfoCallback) -> Self {
        self.on_connect_info = Some(callback);
        self
    }

    pub fn on_connect_error(mut self, callback: ConnectErrorCallback) -> Self {
        self.on_connect_error = Some(callback);
        self
    }

    pub fn on_disconnect(mut self, callback: DisconnectHandler) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    /// Raw hook fired with every decompressed inbound payload.
    pub fn on_message(mut self, callback: MessageHook) -> Self {
        self.inner = self.inner.on_message(callback);
        self
    }

    /// Connect, retrying up to the configured number of attempts.
    pub async fn build(mut self) -> Result<DbConnection> {
        let cancel = self.inner.cancel.clone();
        let info_slot: Arc<RwLock<Option<ConnectionInfo>>> = Arc::new(RwLock::new(None));
        let info_once = Arc::new(Once::new());
        let built: Arc<Mutex<Option<DbConnection>>> = Arc::new(Mutex::new(None));

        let user_on_connect = self.on_connect.take();
        let user_on_connect_info = self.on_connect_info.take();
        let user_on_connect_error = self.on_connect_error.take();

        {
            let cancel = cancel.clone();
            let info_slot = Arc::clone(&info_slot);
            let built = Arc::clone(&built);
            let on_connect_error = user_on_connect_error.clone();
            self.inner = self.inner.on_connect(Arc::new(move |conn: Arc<Connection>| {
                let db = DbConnection {
                    conn: Arc::clone(&conn),
                    info: Arc::clone(&info_slot),
                    cancel: cancel.clone(),
                };
                *built.lock().unwrap() = Some(db.clone());

                // Capture identity metadata from the first initial_connection.
                let conn_weak: Weak<Connection> = Arc::downgrade(&conn);
                let info_slot = Arc::clone(&info_slot);
                let info_once = Arc::clone(&info_once);
                let cancel = cancel.clone();
                let on_connect_info = user_on_connect_info.clone();
                let on_connect_error = on_connect_error.clone();
                conn.on_kind(
                    MessageKind::InitialConnection,
                    Arc::new(move |message| {
                        let payload =
                            match decode_initial_connection_payload(message.payload.as_ref()) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    let err = Error::wrap(
                                        ErrorCode::DecodeFailed,
                                        "initial_connection",
                                        e,
                                    );
                                    tracing::warn!(error = %err, "bad initial_connection payload");
                                    if let Some(on_connect_error) = &on_connect_error {
                                        on_connect_error(&err);
                                    }
                                    return;
                                }
                            };

                        let info = ConnectionInfo {
                            identity: payload.identity,
                            connection_id: payload.connection_id,
                            token: payload.token,
                            received_at: SystemTime::now(),
                        };
                        *info_slot.write().unwrap() = Some(info.clone());

                        if let Some(on_connect_info) = &on_connect_info {
                            let Some(conn) = conn_weak.upgrade() else {
                                return;
                            };
                            let db = DbConnection {
                                conn,
                                info: Arc::clone(&info_slot),
                                cancel: cancel.clone(),
                            };
                            info_once.call_once(|| on_connect_info(db, info));
                        }
                    }),
                );

                if let Some(on_connect) = &user_on_connect {
                    on_connect(db);
                }
            }));
        }
        if let Some(on_connect_error) = user_on_connect_error.clone() {
            self.inner = self.inner.on_connect_error(on_connect_error);
        }
        if let Some(on_disconnect) = self.on_disconnect.take() {
            self.inner = self.inner.on_disconnect(on_disconnect);
        }

        let mut last_err = None;
        for attempt in 1..=self.retry_max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("build"));
            }

            match self.inner.build().await {
                Ok(conn) => {
                    let db = built.lock().unwrap().take().unwrap_or_else(|| DbConnection {
                        conn,
                        info: Arc::clone(&info_slot),
                        cancel: cancel.clone(),
                    });
                    return Ok(db);
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }

            if attempt == self.retry_max_attempts {
                break;
            }
            if self.retry_backoff.is_zero() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled("build")),
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }
        }

        Err(last_err.expect("at least one connect attempt"))
    }
}

impl Default for DbConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_build_validation_errors_surface() {
        let err = DbConnectionBuilder::new().build().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_retry_attempts_are_counted() {
        let failures = Arc::new(AtomicU32::new(0));
        let failures_ref = Arc::clone(&failures);

        let err = DbConnectionBuilder::new()
            .with_uri("http://127.0.0.1:9")
            .with_database_name("db")
            .with_connect_retry(3, Duration::from_millis(5))
            .on_connect_error(Arc::new(move |_err| {
                failures_ref.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ConnectFailed);
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_attempts_clamped_to_one() {
        let failures = Arc::new(AtomicU32::new(0));
        let failures_ref = Arc::clone(&failures);

        let _ = DbConnectionBuilder::new()
            .with_uri("http://127.0.0.1:9")
            .with_database_name("db")
            .with_connect_retry(0, Duration::ZERO)
            .on_connect_error(Arc::new(move |_err| {
                failures_ref.fetch_add(1, Ordering::SeqCst);
            }))
            .build()
            .await
            .unwrap_err();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff() {
        let cancel = CancellationToken::new();
        let cancel_after_first = cancel.clone();

        let builder = DbConnectionBuilder::new()
            .with_uri("http://127.0.0.1:9")
            .with_database_name("db")
            .with_cancellation(cancel)
            .with_connect_retry(10, Duration::from_secs(30))
            .on_connect_error(Arc::new(move |_err| {
                cancel_after_first.cancel();
            }));

        let err = builder.build().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }
}
