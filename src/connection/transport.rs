//! Websocket transport.
//!
//! One full-duplex binary-frame socket. Dialing negotiates the
//! `v2.bsatn.spacetimedb` subprotocol (a mismatch is fatal) and probes
//! liveness with a ping immediately after the handshake. Outbound writes are
//! serialized behind a mutex; inbound reads are expected to run on a single
//! task.
//!
//! The [`Transport`] trait is the seam between the session core and the
//! socket, so the session can be exercised in tests without a network.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, ErrorCode};
use crate::protocol::WS_SUBPROTOCOL_V2;

/// Deadline for the post-handshake liveness probe.
const POST_CONNECT_PING_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket is closed; no further writes are possible.
    #[error("connection closed")]
    Closed,

    /// Underlying websocket failure.
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

/// An inbound frame as seen by the session reader.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A binary data frame; the only frame kind the session processes.
    Binary(Bytes),
    /// A text frame; silently discarded by the reader.
    Text(String),
    /// Ping/pong or other control traffic; silently discarded.
    Control,
}

/// The socket seam used by the session core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one binary frame. Concurrent senders are serialized.
    async fn send_binary(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Read the next frame. `None` means the stream has ended.
    async fn read_frame(&self) -> Option<Result<Frame, TransportError>>;

    /// Attempt a normal close handshake within `deadline`, then give up.
    /// Safe to call more than once.
    async fn close(&self, deadline: Duration);
}

/// The production websocket transport.
pub struct WsTransport {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    stream: tokio::sync::Mutex<SplitStream<WsStream>>,
}

/// Dial `endpoint`, negotiate the subprotocol, and probe liveness.
pub(crate) async fn dial_websocket(
    endpoint: &Url,
    authorization: Option<&str>,
) -> Result<WsTransport, Error> {
    let mut request = endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| Error::wrap(ErrorCode::ConnectFailed, "dial_websocket", e))?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(WS_SUBPROTOCOL_V2),
    );
    if let Some(auth) = authorization {
        let value = HeaderValue::from_str(auth).map_err(|e| {
            Error::wrap(ErrorCode::ConnectFailed, "dial_websocket", e)
        })?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }

    let (mut ws, response) = connect_async(request)
        .await
        .map_err(|e| Error::wrap(ErrorCode::ConnectFailed, "dial_websocket", e))?;

    let negotiated = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !negotiated.eq_ignore_ascii_case(WS_SUBPROTOCOL_V2) {
        let _ = ws.close(None).await;
        return Err(Error::new(
            ErrorCode::ConnectFailed,
            "dial_websocket",
            format!(
                "unexpected websocket subprotocol: got {negotiated:?} want {WS_SUBPROTOCOL_V2:?}"
            ),
        ));
    }

    // A ping failure right after connect means the socket is already unhealthy.
    match tokio::time::timeout(POST_CONNECT_PING_TIMEOUT, ws.send(Message::Ping(vec![0]))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = ws.close(None).await;
            return Err(Error::wrap(ErrorCode::ConnectFailed, "post_connect_ping", e));
        }
        Err(_) => {
            let _ = ws.close(None).await;
            return Err(Error::new(
                ErrorCode::ConnectFailed,
                "post_connect_ping",
                "timed out writing post-connect ping",
            ));
        }
    }

    tracing::debug!(endpoint = %endpoint, "websocket connected");

    let (sink, stream) = ws.split();
    Ok(WsTransport {
        sink: tokio::sync::Mutex::new(sink),
        stream: tokio::sync::Mutex::new(stream),
    })
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_binary(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(payload.to_vec()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::Closed
                }
                other => TransportError::WebSocket(other),
            })
    }

    async fn read_frame(&self) -> Option<Result<Frame, TransportError>> {
        let mut stream = self.stream.lock().await;
        match stream.next().await? {
            Ok(Message::Binary(payload)) => Some(Ok(Frame::Binary(Bytes::from(payload)))),
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
            Ok(Message::Close(_)) => None,
            Ok(_) => Some(Ok(Frame::Control)),
            Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => None,
            Err(e) => Some(Err(TransportError::WebSocket(e))),
        }
    }

    async fn close(&self, deadline: Duration) {
        let mut sink = self.sink.lock().await;
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        // Best effort: the socket may already be gone.
        let _ = tokio::time::timeout(deadline, sink.send(close)).await;
    }
}
