//! # spacetimedb-client
//!
//! Client SDK for a realtime table-replicating database. One websocket
//! session multiplexes concurrent request/response exchanges and long-lived
//! subscription streams; inbound messages dispatch through a three-tier
//! router, and a snapshot-isolated cache applies multi-table transactions
//! atomically.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): envelope codec, frame decompression, and
//!   message types
//! - **Connection** ([`connection`]): transport, routing engine, session
//!   core, and the call/subscribe APIs
//! - **Cache** ([`cache`]): client-side table state
//! - **Client** ([`client`]): the high-level facade and lifecycle builder
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use spacetimedb_client::DbConnectionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = DbConnectionBuilder::new()
//!         .with_uri("https://example.com")
//!         .with_database_name("mydb")
//!         .with_token(std::env::var("STDB_TOKEN")?)
//!         .build()
//!         .await?;
//!
//!     db.subscribe(
//!         vec!["SELECT * FROM users".into()],
//!         Some(Arc::new(|message, err| {
//!             if err.is_none() {
//!                 println!("subscription event: {}", message.kind);
//!             }
//!         })),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;

pub use cache::{Row, Store, TableMutation, Transaction};
pub use client::{ConnectionInfo, DbConnection, DbConnectionBuilder};
pub use connection::{Builder, Connection, Frame, Router, Transport, TransportError};
pub use error::{Error, ErrorCode, Result};
pub use protocol::{
    ClientMessage, ClientMessageKind, Compression, MessageKind, RoutedMessage,
};
