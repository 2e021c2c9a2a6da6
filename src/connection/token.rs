//! One-shot websocket-token exchange.
//!
//! `POST /v1/identity/websocket-token` with the user token as a bearer
//! credential returns `{"token":"..."}`; that short-lived session token goes
//! into the subscribe URL instead of the long-lived user token.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, ErrorCode, Result};

/// Maximum bytes of an error response body carried into the error message.
const MAX_ERROR_BODY: usize = 4096;

#[derive(Deserialize)]
struct WebsocketTokenResponse {
    #[serde(default)]
    token: String,
}

/// Exchange a user token for a short-lived session token.
pub(crate) async fn exchange_websocket_token(
    host: &Url,
    auth_token: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut token_url = host.clone();
    let http_scheme = match token_url.scheme() {
        "wss" => Some("https"),
        "ws" => Some("http"),
        _ => None,
    };
    if let Some(scheme) = http_scheme {
        let _ = token_url.set_scheme(scheme);
    }
    token_url.set_path("/v1/identity/websocket-token");
    token_url.set_query(None);
    token_url.set_fragment(None);

    let request = reqwest::Client::new()
        .post(token_url)
        .bearer_auth(auth_token)
        .send();
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(Error::cancelled("exchange_websocket_token")),
        response = request => response.map_err(|e| {
            Error::wrap(ErrorCode::ConnectFailed, "exchange_websocket_token", e)
        })?,
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        let body = &body[..body.len().min(MAX_ERROR_BODY)];
        let body = String::from_utf8_lossy(body);
        return Err(Error::new(
            ErrorCode::ConnectFailed,
            "exchange_websocket_token",
            format!(
                "websocket-token request failed: status={} body={:?}",
                status.as_u16(),
                body.trim()
            ),
        ));
    }

    let decoded: WebsocketTokenResponse = response.json().await.map_err(|e| {
        Error::wrap(ErrorCode::ConnectFailed, "decode_websocket_token_response", e)
    })?;
    if decoded.token.is_empty() {
        return Err(Error::new(
            ErrorCode::ConnectFailed,
            "exchange_websocket_token",
            "websocket-token response missing token",
        ));
    }
    Ok(decoded.token)
}
