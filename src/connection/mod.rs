//! Session layer: transport, routing, and the caller-facing APIs.
//!
//! A [`Connection`] owns one websocket [`Transport`], a three-tier
//! [`Router`], and the pending-callback registries. A single reader task
//! pulls frames, decompresses and decodes them, and dispatches the result;
//! caller tasks emit requests through the call/subscribe APIs. The
//! [`Builder`] validates configuration, performs the optional token
//! exchange, dials the socket, and hands back a running session.

mod builder;
mod calls;
mod router;
mod session;
mod subscription;
mod token;
mod transport;

pub use builder::{
    build_subscribe_url, normalize_host_url, Builder, ConnectErrorHandler, ConnectHandler,
};
pub use router::{RouteHandler, Router};
pub use session::{
    Connection, DisconnectHandler, MessageHook, ResultCallback, SessionOptions,
    SubscriptionCallback,
};
pub use subscription::{is_expected_message_kind, is_terminal_message_kind};
pub use transport::{Frame, Transport, TransportError, WsTransport};
