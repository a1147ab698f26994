//! Per-mailbox session state: the transport cookie, the `sid_token`, and the bound address.

use reqwest::header::{HeaderMap, SET_COOKIE};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Identity of one provisioned mailbox.
///
/// Owned by exactly one [`Client`](crate::Client). The cookie is captured by the transport
/// from `Set-Cookie` headers; the token is rotated from any response body that carries one.
#[derive(Clone, Default)]
pub struct MailboxSession {
    cookie_name: String,
    cookie: Option<String>,
    token: Option<String>,
    address: Option<String>,
}

impl fmt::Debug for MailboxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxSession")
            .field("cookie_name", &self.cookie_name)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("address", &self.address)
            .finish()
    }
}

impl MailboxSession {
    /// An empty session that tracks the cookie called `cookie_name`.
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            ..Self::default()
        }
    }

    /// Current session cookie value.
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Current `sid_token`.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Address this session is bound to.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// `Cookie` header value to send, if a cookie is held.
    pub(crate) fn cookie_header(&self) -> Option<String> {
        self.cookie
            .as_ref()
            .map(|value| format!("{}={}", self.cookie_name, value))
    }

    /// Pick up the session cookie from any `Set-Cookie` header starting with its name.
    pub(crate) fn capture_cookie(&mut self, headers: &HeaderMap) {
        let prefix = format!("{}=", self.cookie_name);
        for header in headers.get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            if !raw.starts_with(&prefix) {
                continue;
            }
            let pair = raw.split(';').next().unwrap_or(raw);
            if let Some((_, value)) = pair.split_once('=') {
                debug!(cookie = %self.cookie_name, "session cookie updated");
                self.cookie = Some(value.to_string());
            }
        }
    }

    /// Replace the held token with the response's `sid_token`, when it has one.
    ///
    /// Returns whether a token was present.
    pub(crate) fn rotate_token(&mut self, response: &Value) -> bool {
        match response.get("sid_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => {
                if self.token.as_deref() != Some(token) {
                    debug!("session token rotated");
                }
                self.token = Some(token.to_string());
                true
            }
            _ => false,
        }
    }

    pub(crate) fn bind_address(&mut self, address: impl Into<String>) {
        self.address = Some(address.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn rotation_overrides_previous_token() {
        let mut session = MailboxSession::new("PHPSESSID");
        assert!(session.rotate_token(&json!({ "sid_token": "first" })));
        assert!(session.rotate_token(&json!({ "sid_token": "second", "list": [] })));
        assert_eq!(session.token(), Some("second"));
    }

    #[test]
    fn responses_without_token_keep_the_current_one() {
        let mut session = MailboxSession::new("PHPSESSID");
        session.rotate_token(&json!({ "sid_token": "kept" }));
        assert!(!session.rotate_token(&json!({ "list": [] })));
        assert!(!session.rotate_token(&json!({ "sid_token": "" })));
        assert_eq!(session.token(), Some("kept"));
    }

    #[test]
    fn captures_only_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("lang=en; path=/"));
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("PHPSESSID=abc123; path=/; HttpOnly"),
        );

        let mut session = MailboxSession::new("PHPSESSID");
        session.capture_cookie(&headers);

        assert_eq!(session.cookie(), Some("abc123"));
        assert_eq!(session.cookie_header().as_deref(), Some("PHPSESSID=abc123"));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut session = MailboxSession::new("PHPSESSID");
        session.rotate_token(&json!({ "sid_token": "secret-token" }));
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
