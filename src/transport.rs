//! HTTP GET with session cookie propagation and a single redirect hop.
//!
//! The underlying `reqwest::Client` is built with redirects disabled; [`Transport::get`]
//! follows at most one `Location` itself so that `Set-Cookie` on the redirecting response is
//! never lost. Longer chains are returned to the caller as the raw redirect response.

use crate::session::MailboxSession;
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::debug;

/// A response as received, before any JSON decoding.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status of the final response.
    pub status: StatusCode,
    /// Headers of the final response.
    pub headers: HeaderMap,
    /// Full body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decode the body as a JSON value.
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Up to 200 characters of the body, for diagnostics.
    pub fn snippet(&self) -> String {
        String::from_utf8_lossy(&self.body).chars().take(200).collect()
    }
}

/// Cookie-carrying GET transport.
#[derive(Clone, Debug)]
pub struct Transport {
    http: reqwest::Client,
}

impl Transport {
    /// Wrap an HTTP client. The client must not follow redirects on its own.
    pub(crate) fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// GET `url` with the session cookie attached.
    ///
    /// A 301/302/303/307/308 with a `Location` header is re-requested once against the
    /// (possibly relative) target. Cookies are captured from both hops. Non-2xx responses are
    /// returned, not raised; the service reports application errors inside 200 JSON bodies.
    ///
    /// # Errors
    /// [`Error::Request`] on network failure, [`Error::InvalidUrl`] if `Location` cannot be
    /// resolved, [`Error::Header`] if the held cookie is not a valid header value.
    pub async fn get(&self, url: Url, session: &mut MailboxSession) -> Result<RawResponse> {
        let response = self.send(url.clone(), session).await?;
        session.capture_cookie(response.headers());

        if is_redirect(response.status()) {
            if let Some(target) = redirect_target(&url, response.headers())? {
                debug!(status = response.status().as_u16(), to = %redact_url(&target), "following redirect");
                let redirected = self.send(target, session).await?;
                session.capture_cookie(redirected.headers());
                return collect(redirected).await;
            }
        }

        collect(response).await
    }

    async fn send(&self, url: Url, session: &MailboxSession) -> Result<reqwest::Response> {
        debug!(url = %redact_url(&url), "GET");
        let mut request = self.http.get(url);
        if let Some(cookie) = session.cookie_header() {
            request = request.header(COOKIE, HeaderValue::from_str(&cookie)?);
        }
        Ok(request.send().await?)
    }
}

async fn collect(response: reqwest::Response) -> Result<RawResponse> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();
    debug!(status = status.as_u16(), bytes = body.len(), "response");
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn redirect_target(base: &Url, headers: &HeaderMap) -> Result<Option<Url>> {
    let Some(location) = headers.get(LOCATION) else {
        return Ok(None);
    };
    let location = location.to_str().map_err(|e| Error::InvalidUrl {
        url: String::from_utf8_lossy(location.as_bytes()).into_owned(),
        reason: e.to_string(),
    })?;
    base.join(location)
        .map(Some)
        .map_err(|e| Error::InvalidUrl {
            url: location.to_string(),
            reason: e.to_string(),
        })
}

/// Render a URL for logs with token-bearing query values replaced.
pub(crate) fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if key.to_lowercase().contains("token") {
                    "<redacted>".to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}
