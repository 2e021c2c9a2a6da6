//! Session core.
//!
//! A [`Connection`] owns the transport, the route tables, and the pending
//! callback registries. One reader task pulls frames and runs
//! decompress -> raw hook -> decode -> dispatch; any failure along that path
//! is fatal and tears the session down through [`Connection::notify_disconnect`].
//!
//! Disconnect is guarded twice: an atomic closed flag makes `disconnect`
//! first-call-wins, and a once-latch makes the callback fan-out run exactly
//! once even when reader failure, explicit disconnect, and write errors race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use crate::connection::router::{RouteHandler, Router};
use crate::connection::transport::{Frame, Transport};
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{
    decompress_server_message, json_message_encoder, ClientMessage, MessageDecoder,
    MessageEncoder, MessageKind, RoutedMessage,
};

/// Deadline for the close handshake started by [`Connection::disconnect`].
const CLOSE_DEADLINE: Duration = Duration::from_secs(5);

/// Callback for call-style results. The error is `None` on success.
pub type ResultCallback = Arc<dyn Fn(RoutedMessage, Option<Error>) + Send + Sync + 'static>;

/// Callback for subscription lifecycle and update messages.
pub type SubscriptionCallback = Arc<dyn Fn(RoutedMessage, Option<Error>) + Send + Sync + 'static>;

/// Raw hook invoked with every decompressed inbound payload.
pub type MessageHook = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// User-level disconnect callback, invoked once with the triggering cause.
pub type DisconnectHandler = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// Optional hooks and codec overrides for a session.
#[derive(Default)]
pub struct SessionOptions {
    /// Inbound decoder; `None` disables decoding and routing entirely.
    pub decoder: Option<MessageDecoder>,
    /// Outbound encoder; defaults to the JSON encoder.
    pub encoder: Option<MessageEncoder>,
    /// Raw hook fired with decompressed bytes before decoding.
    pub on_message: Option<MessageHook>,
    /// Fired once when the session ends, after pending callbacks fail.
    pub on_disconnect: Option<DisconnectHandler>,
}

/// A live session over one websocket.
pub struct Connection {
    transport: Arc<dyn Transport>,
    connection_id: String,
    endpoint: String,

    decoder: Option<MessageDecoder>,
    encoder: MessageEncoder,
    on_message: Option<MessageHook>,
    on_disconnect: Option<DisconnectHandler>,

    request_ids: AtomicU32,
    query_ids: AtomicU32,

    pub(crate) router: Arc<Router>,
    pub(crate) pending_calls: Arc<Mutex<HashMap<u32, ResultCallback>>>,
    pub(crate) pending_subs: Arc<Mutex<HashMap<u32, SubscriptionCallback>>>,

    closed: AtomicBool,
    disconnected: Once,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.connection_id)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Construct a session over an already-dialed transport.
    ///
    /// The reader is not started; call [`Connection::start_read_loop`] once
    /// any by-kind routes are installed.
    pub fn over_transport(
        transport: Arc<dyn Transport>,
        connection_id: impl Into<String>,
        endpoint: impl Into<String>,
        options: SessionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connection_id: connection_id.into(),
            endpoint: endpoint.into(),
            decoder: options.decoder,
            encoder: options
                .encoder
                .unwrap_or_else(|| Arc::new(json_message_encoder)),
            on_message: options.on_message,
            on_disconnect: options.on_disconnect,
            request_ids: AtomicU32::new(0),
            query_ids: AtomicU32::new(0),
            router: Arc::new(Router::new()),
            pending_calls: Arc::new(Mutex::new(HashMap::new())),
            pending_subs: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
            disconnected: Once::new(),
        })
    }

    /// The connection ID this session dialed with (lowercase hex).
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The subscribe URL this session dialed.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the session has not yet observed a disconnect.
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Allocate the next request ID. Observations increase by 1 from 0.
    pub fn next_request_id(&self) -> u32 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate the next query ID. Independent of request IDs.
    pub fn next_query_id(&self) -> u32 {
        self.query_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a handler for a request ID.
    pub fn on_request(&self, request_id: u32, handler: RouteHandler) {
        self.router.on_request(request_id, handler);
    }

    /// Register a handler for a query ID.
    pub fn on_query(&self, query_id: u32, handler: RouteHandler) {
        self.router.on_query(query_id, handler);
    }

    /// Register a handler for a message kind.
    pub fn on_kind(&self, kind: MessageKind, handler: RouteHandler) {
        self.router.on_kind(kind, handler);
    }

    /// Remove a request route, if present.
    pub fn clear_request_route(&self, request_id: u32) {
        self.router.clear_request(request_id);
    }

    /// Remove a query route, if present.
    pub fn clear_query_route(&self, query_id: u32) {
        self.router.clear_query(query_id);
    }

    /// Remove a kind route, if present.
    pub fn clear_kind_route(&self, kind: MessageKind) {
        self.router.clear_kind(kind);
    }

    /// Dispatch a message through the routing tiers.
    ///
    /// This is the same path the reader uses, exposed for fan-in and tests.
    pub fn route_message(&self, message: RoutedMessage) {
        self.router.dispatch(message);
    }

    /// Write one binary payload to the transport.
    pub async fn send_binary(&self, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::closed("send_binary"));
        }
        self.transport
            .send_binary(payload)
            .await
            .map_err(|e| Error::wrap(ErrorCode::SendFailed, "send_binary", e))
    }

    /// Encode and send a client message, wrapping failures with the message's
    /// wire name (`encode_call_reducer`, `send_subscribe_multi`, ...).
    pub(crate) async fn send_client_message(&self, message: &ClientMessage) -> Result<()> {
        let wire_name = message.kind.wire_name();
        let encoded = (self.encoder)(message)
            .map_err(|e| Error::wrap(ErrorCode::EncodeFailed, format!("encode_{wire_name}"), e))?;
        self.send_binary(&encoded)
            .await
            .map_err(|e| Error::wrap(ErrorCode::SendFailed, format!("send_{wire_name}"), e))
    }

    /// Close the session. The first call wins; later calls are no-ops.
    pub async fn disconnect(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.close(CLOSE_DEADLINE).await;
        Ok(())
    }

    /// Start the single reader task for this session.
    pub fn start_read_loop(self: &Arc<Self>) {
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match conn.transport.read_frame().await {
                    Some(Ok(Frame::Binary(payload))) => {
                        let decompressed = match decompress_server_message(&payload) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                conn.notify_disconnect(&Error::wrap(
                                    ErrorCode::DecodeFailed,
                                    "decompress_server_message",
                                    e,
                                ));
                                break;
                            }
                        };

                        if let Some(hook) = &conn.on_message {
                            hook(&decompressed);
                        }

                        if let Some(decoder) = &conn.decoder {
                            match decoder(&decompressed) {
                                Ok(message) => conn.route_message(message),
                                Err(e) => {
                                    conn.notify_disconnect(&Error::wrap(
                                        ErrorCode::DecodeFailed,
                                        "decode_incoming_message",
                                        e,
                                    ));
                                    break;
                                }
                            }
                        }
                    }
                    // Non-binary frames are silently discarded.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        conn.notify_disconnect(&Error::wrap(
                            ErrorCode::ConnectionClosed,
                            "read_frame",
                            e,
                        ));
                        break;
                    }
                    None => {
                        conn.notify_disconnect(&Error::closed("read_frame"));
                        break;
                    }
                }
            }
            let _ = conn.disconnect().await;
        });
    }

    /// Fail every pending callback with `err`, then fire the user disconnect
    /// callback. Runs at most once per session.
    pub fn notify_disconnect(&self, err: &Error) {
        self.disconnected.call_once(|| {
            tracing::debug!(error = %err, "session disconnected");
            self.fail_pending(err);
            if let Some(on_disconnect) = &self.on_disconnect {
                on_disconnect(err);
            }
        });
    }

    fn fail_pending(&self, err: &Error) {
        let calls: Vec<(u32, ResultCallback)> =
            self.pending_calls.lock().unwrap().drain().collect();
        for (request_id, callback) in calls {
            self.router.clear_request(request_id);
            callback(RoutedMessage::default(), Some(err.clone()));
        }

        let subs: Vec<(u32, SubscriptionCallback)> =
            self.pending_subs.lock().unwrap().drain().collect();
        for (query_id, callback) in subs {
            self.router.clear_query(query_id);
            callback(RoutedMessage::default(), Some(err.clone()));
        }
    }
}
