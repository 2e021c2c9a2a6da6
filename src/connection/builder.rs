//! Session builder: validation, URL derivation, auth, and dialing.
//!
//! The builder validates configuration, normalizes the host URI, derives the
//! subscribe URL, optionally exchanges the user token for a session token,
//! dials the websocket, and hands back a running [`Connection`] with its
//! reader task started.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connection::session::{Connection, DisconnectHandler, MessageHook, SessionOptions};
use crate::connection::token::exchange_websocket_token;
use crate::connection::transport::dial_websocket;
use crate::error::{Error, ErrorCode, Result};
use crate::protocol::{json_message_decoder, Compression, MessageDecoder, MessageEncoder};

/// Callback fired once with the constructed session, before the reader starts.
pub type ConnectHandler = Arc<dyn Fn(Arc<Connection>) + Send + Sync + 'static>;

/// Callback fired on every failed connect attempt.
pub type ConnectErrorHandler = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// Configures and dials a single session.
pub struct Builder {
    uri: String,
    database_name: String,
    token: String,
    compression: Compression,
    decoder: Option<MessageDecoder>,
    encoder: Option<MessageEncoder>,
    light_mode: bool,
    confirmed_reads: Option<bool>,
    use_websocket_token: bool,
    pub(crate) cancel: CancellationToken,
    on_connect: Option<ConnectHandler>,
    on_connect_error: Option<ConnectErrorHandler>,
    on_disconnect: Option<DisconnectHandler>,
    on_message: Option<MessageHook>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            uri: String::new(),
            database_name: String::new(),
            token: String::new(),
            compression: Compression::Gzip,
            decoder: Some(Arc::new(json_message_decoder)),
            encoder: None,
            light_mode: false,
            confirmed_reads: None,
            use_websocket_token: true,
            cancel: CancellationToken::new(),
            on_connect: None,
            on_connect_error: None,
            on_disconnect: None,
            on_message: None,
        }
    }

    /// Host URI of the server, e.g. `https://example.com`.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Name of the database to subscribe to.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// User token used for authentication.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Compression requested for inbound frames.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Override the inbound decoder. `None` disables decoding and routing.
    pub fn with_message_decoder(mut self, decoder: Option<MessageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Override the outbound encoder.
    pub fn with_message_encoder(mut self, encoder: MessageEncoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Request light-mode subscription updates.
    pub fn with_light_mode(mut self, light: bool) -> Self {
        self.light_mode = light;
        self
    }

    /// Request confirmed or unconfirmed reads explicitly.
    pub fn with_confirmed_reads(mut self, confirmed: bool) -> Self {
        self.confirmed_reads = Some(confirmed);
        self
    }

    /// Exchange the user token for a short-lived session token (default on).
    pub fn with_use_websocket_token(mut self, enabled: bool) -> Self {
        self.use_websocket_token = enabled;
        self
    }

    /// Cancellation token honored by token exchange, dialing, and retries.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_connect(mut self, callback: ConnectHandler) -> Self {
        self.on_connect = Some(callback);
        self
    }

    pub fn on_connect_error(mut self, callback: ConnectErrorHandler) -> Self {
        self.on_connect_error = Some(callback);
        self
    }

    pub fn on_disconnect(mut self, callback: DisconnectHandler) -> Self {
        self.on_disconnect = Some(callback);
        self
    }

    /// Raw hook fired with every decompressed inbound payload.
    pub fn on_message(mut self, callback: MessageHook) -> Self {
        self.on_message = Some(callback);
        self
    }

    /// Validate, dial, and return a running session.
    pub async fn build(&self) -> Result<Arc<Connection>> {
        if self.uri.is_empty() {
            return Err(Error::invalid_argument("build", "uri is required"));
        }
        if self.database_name.is_empty() {
            return Err(Error::invalid_argument("build", "database name is required"));
        }

        let host = normalize_host_url(&self.uri)?;
        let connection_id = random_connection_id();
        let mut ws_url = build_subscribe_url(
            &host,
            &self.database_name,
            &connection_id,
            self.compression,
            self.light_mode,
            self.confirmed_reads,
        );

        let mut authorization = None;
        if !self.token.is_empty() {
            if self.use_websocket_token {
                let session_token =
                    match exchange_websocket_token(&host, &self.token, &self.cancel).await {
                        Ok(token) => token,
                        Err(err) => {
                            if let Some(on_connect_error) = &self.on_connect_error {
                                on_connect_error(&err);
                            }
                            return Err(err);
                        }
                    };
                ws_url
                    .query_pairs_mut()
                    .append_pair("token", &session_token);
            } else {
                authorization = Some(format!("Bearer {}", self.token));
            }
        }

        let dial = dial_websocket(&ws_url, authorization.as_deref());
        let transport = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::cancelled("dial_websocket")),
            transport = dial => transport,
        };
        let transport = match transport {
            Ok(transport) => transport,
            Err(err) => {
                if let Some(on_connect_error) = &self.on_connect_error {
                    on_connect_error(&err);
                }
                return Err(err);
            }
        };

        let conn = Connection::over_transport(
            Arc::new(transport),
            connection_id,
            ws_url.to_string(),
            SessionOptions {
                decoder: self.decoder.clone(),
                encoder: self.encoder.clone(),
                on_message: self.on_message.clone(),
                on_disconnect: self.on_disconnect.clone(),
            },
        );

        // Fire on_connect before the reader starts so kind routes installed
        // by the callback see every message.
        if let Some(on_connect) = &self.on_connect {
            on_connect(Arc::clone(&conn));
        }
        conn.start_read_loop();

        Ok(conn)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a host URI: default scheme `http`, default path `/`, host required.
pub fn normalize_host_url(raw: &str) -> Result<Url> {
    let parsed = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("http://{raw}"))
            .map_err(|e| Error::wrap(ErrorCode::InvalidArgument, "parse_uri", e))?,
        Err(e) => return Err(Error::wrap(ErrorCode::InvalidArgument, "parse_uri", e)),
    };
    if !parsed.has_host() {
        return Err(Error::invalid_argument(
            "parse_uri",
            format!("invalid uri {raw:?}: missing host"),
        ));
    }
    Ok(parsed)
}

/// Derive the subscribe URL from a normalized host URL.
pub fn build_subscribe_url(
    host: &Url,
    database_name: &str,
    connection_id: &str,
    compression: Compression,
    light: bool,
    confirmed: Option<bool>,
) -> Url {
    let mut url = host.clone();
    let ws_scheme = match url.scheme() {
        "https" => Some("wss"),
        "http" => Some("ws"),
        _ => None,
    };
    if let Some(scheme) = ws_scheme {
        let _ = url.set_scheme(scheme);
    }
    url.set_path(&format!("/v1/database/{database_name}/subscribe"));

    let mut query = url.query_pairs_mut();
    query.append_pair("connection_id", connection_id);
    query.append_pair("compression", compression.as_str());
    if light {
        query.append_pair("light", "true");
    }
    if let Some(confirmed) = confirmed {
        query.append_pair("confirmed", if confirmed { "true" } else { "false" });
    }
    drop(query);
    url
}

fn random_connection_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_build_requires_uri() {
        let err = Builder::new().build().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("uri is required"));
    }

    #[tokio::test]
    async fn test_build_requires_database_name() {
        let err = Builder::new()
            .with_uri("https://example.com")
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("database name is required"));
    }

    #[test]
    fn test_normalize_defaults_scheme_and_path() {
        let url = normalize_host_url("example.com").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.path(), "/");
    }

    #[test]
    fn test_normalize_rejects_missing_host() {
        let err = normalize_host_url("http://").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_subscribe_url_derivation() {
        let host = normalize_host_url("https://example.com").unwrap();
        let url = build_subscribe_url(&host, "mydb", "conn-1", Compression::Gzip, true, Some(true));

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/v1/database/mydb/subscribe");

        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query.get("connection_id").map(String::as_str), Some("conn-1"));
        assert_eq!(query.get("compression").map(String::as_str), Some("Gzip"));
        assert_eq!(query.get("light").map(String::as_str), Some("true"));
        assert_eq!(query.get("confirmed").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_subscribe_url_omits_optional_params() {
        let host = normalize_host_url("http://localhost").unwrap();
        let url = build_subscribe_url(&host, "db", "abc", Compression::None, false, None);

        assert_eq!(url.scheme(), "ws");
        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query.get("compression").map(String::as_str), Some("None"));
        assert!(!query.contains_key("light"));
        assert!(!query.contains_key("confirmed"));
        assert!(!query.contains_key("token"));
    }

    #[test]
    fn test_confirmed_false_is_rendered() {
        let host = normalize_host_url("http://localhost").unwrap();
        let url = build_subscribe_url(&host, "db", "abc", Compression::None, false, Some(false));
        let query: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query.get("confirmed").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_connection_id_is_lowercase_hex() {
        let id = random_connection_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Two draws colliding would mean the generator is broken.
        assert_ne!(id, random_connection_id());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits_dial() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Builder::new()
            .with_uri("http://127.0.0.1:9")
            .with_database_name("db")
            .with_cancellation(cancel)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }
}
