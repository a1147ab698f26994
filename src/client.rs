//! GuerrillaMail mailbox client.
//!
//! This module provides the [`Client`] and [`ClientBuilder`] for the GuerrillaMail AJAX API.
//! Every call is a GET against `ajax.php` carrying the session cookie and, once known, the
//! `sid_token`. Any response that includes a `sid_token` rotates the held token.
//!
//! Typical flow:
//! 1) Build a client (`Client::new` or `Client::builder().build()`)
//! 2) Bind an address via [`Client::acquire_session`] or [`Client::new_random_address`]
//! 3) Poll the inbox via [`Client::list_messages`] (or hand the client to a [`Poller`](crate::Poller))
//! 4) Fetch bodies via [`Client::fetch_body`]
//! 5) Optionally clean up via [`Client::delete_message`] / [`Client::delete_all`]

use crate::models::{value_as_i64, AttachmentInfo, TEMPLATE_MESSAGE_ID};
use crate::session::MailboxSession;
use crate::transport::{RawResponse, Transport};
use crate::{
    AttachmentRef, DeleteOutcome, DeleteReport, DeletedMessage, Error, MessageBody,
    MessageSummary, Result,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::redirect::Policy;
use reqwest::Url;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client for one GuerrillaMail mailbox.
///
/// The client owns its [`MailboxSession`]; operations that touch the session take `&mut self`.
/// Use one client per mailbox.
pub struct Client {
    transport: Transport,
    session: MailboxSession,
    api_url: Url,
    inbox_url: Url,
    domain: String,
    lang: String,
    proxy: Option<String>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("api_url", &self.api_url.as_str())
            .field("inbox_url", &self.inbox_url.as_str())
            .field("domain", &self.domain)
            .field("lang", &self.lang)
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl Client {
    /// Create a [`ClientBuilder`] for configuring a new client.
    ///
    /// # Examples
    /// ```no_run
    /// # use guerrillamail_poller::Client;
    /// # use std::time::Duration;
    /// let client = Client::builder()
    ///     .timeout(Duration::from_secs(10))
    ///     .build()?;
    /// # Ok::<(), guerrillamail_poller::Error>(())
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client with default settings.
    ///
    /// No request is made until the first operation.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// Get the proxy URL configured for this client (if any).
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Session state held by this client.
    pub fn session(&self) -> &MailboxSession {
        &self.session
    }

    /// The current `sid_token`, if one has been issued.
    pub fn current_token(&self) -> Option<&str> {
        self.session.token()
    }

    /// Bind the mailbox to `local_part` and return the issued session token.
    ///
    /// Anything after an `@` in `local_part` is ignored. The bound address is the
    /// `email_addr` the service reports, or `local_part@<domain>` when it reports none.
    ///
    /// # Errors
    /// [`Error::Session`] if the response carries no `sid_token`; transport and decoding
    /// errors otherwise.
    ///
    /// # Examples
    /// ```no_run
    /// # use guerrillamail_poller::Client;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), guerrillamail_poller::Error> {
    /// let mut client = Client::new()?;
    /// let token = client.acquire_session("myalias").await?;
    /// println!("bound to {:?}", client.session().address());
    /// # let _ = token;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire_session(&mut self, local_part: &str) -> Result<String> {
        let alias = extract_alias(local_part).to_string();
        let params = vec![
            ("email_user", Cow::Owned(alias.clone())),
            ("lang", Cow::Owned(self.lang.clone())),
        ];
        let response = self.call("set_email_user", &params).await?;

        let token = response
            .get("sid_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Error::Session(format!(
                    "missing `sid_token` (response: {})",
                    json_snippet(&response)
                ))
            })?
            .to_string();

        let address = response
            .get("email_addr")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{alias}@{}", self.domain));
        info!(address = %address, "session acquired");
        self.session.bind_address(address);

        Ok(token)
    }

    /// Ask the service for a fresh random address.
    ///
    /// Works with or without a held token; the service issues one if needed.
    ///
    /// Returns `Ok(None)` when the response has no `email_addr`.
    pub async fn new_random_address(&mut self) -> Result<Option<String>> {
        let params = vec![("lang", Cow::Owned(self.lang.clone()))];
        let response = self.call("get_email_address", &params).await?;

        match response.get("email_addr").and_then(Value::as_str) {
            Some(address) => {
                info!(address = %address, "random address assigned");
                self.session.bind_address(address);
                Ok(Some(address.to_string()))
            }
            None => {
                warn!(
                    response = %json_snippet(&response),
                    "no `email_addr` in get_email_address response"
                );
                Ok(None)
            }
        }
    }

    /// List messages newer than `seq`.
    ///
    /// `address` is forwarded as the `email` parameter when given. A response without a
    /// `list` means nothing new yet and yields an empty vector. Entries that fail to decode
    /// are logged and skipped.
    ///
    /// # Errors
    /// [`Error::NoSession`] before a token is held; transport and decoding errors otherwise.
    pub async fn list_messages(
        &mut self,
        address: Option<&str>,
        seq: u64,
    ) -> Result<Vec<MessageSummary>> {
        self.require_token()?;
        let mut params = vec![("seq", Cow::Owned(seq.to_string()))];
        if let Some(address) = address {
            params.push(("email", Cow::Owned(address.to_string())));
        }
        let response = self.call("check_email", &params).await?;
        parse_list(&response)
    }

    /// List the inbox from `offset` via `get_email_list`.
    ///
    /// Same empty-list and skip-invalid rules as [`Client::list_messages`].
    pub async fn email_list(&mut self, offset: u64) -> Result<Vec<MessageSummary>> {
        self.require_token()?;
        let params = vec![("offset", Cow::Owned(offset.to_string()))];
        let response = self.call("get_email_list", &params).await?;
        parse_list(&response)
    }

    /// Bind `address` and return the id of the first message listed for it.
    pub async fn latest_message_id(&mut self, address: &str) -> Result<Option<i64>> {
        self.acquire_session(address).await?;
        let messages = self.list_messages(None, 20).await?;
        Ok(messages.first().map(|message| message.id))
    }

    /// Fetch one message body and strip it to plain text.
    ///
    /// When the response has no `mail_body` the returned body is a placeholder
    /// (see [`MessageBody::is_fetch_failed`]) rather than an error.
    ///
    /// # Errors
    /// [`Error::NoSession`] before a token is held; transport and decoding errors otherwise.
    pub async fn fetch_body(&mut self, message_id: i64) -> Result<MessageBody> {
        self.require_token()?;
        let params = vec![("email_id", Cow::Owned(message_id.to_string()))];
        let response = self.call("fetch_email", &params).await?;

        let Some(html) = response.get("mail_body").and_then(Value::as_str) else {
            warn!(
                message_id,
                response = %json_snippet(&response),
                "no `mail_body` in fetch_email response"
            );
            return Ok(MessageBody::fetch_failed(message_id));
        };

        let mut body = MessageBody::from_html(message_id, html.to_string());
        body.from = string_field(&response, "mail_from");
        body.subject = string_field(&response, "mail_subject");
        body.date = string_field(&response, "mail_date");
        body.attachments = self.attachment_refs(message_id, &response);
        Ok(body)
    }

    /// Attachments of a message, with download links bound to the current token.
    pub async fn attachments(&mut self, message_id: i64) -> Result<Vec<AttachmentRef>> {
        Ok(self.fetch_body(message_id).await?.attachments)
    }

    /// Download an attachment.
    ///
    /// # Errors
    /// Returns an error if:
    /// - the attachment has no part id,
    /// - the download URL is malformed,
    /// - the request fails,
    /// - the server returns a non-success status.
    pub async fn download_attachment(&mut self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        if attachment.part_id.trim().is_empty() {
            return Err(Error::Protocol {
                msg: "attachment missing part_id".to_string(),
            });
        }
        let url = parse_url(&attachment.download_url)?;
        let response = self.transport.get(url, &mut self.session).await?;
        if !response.status.is_success() {
            return Err(Error::Status {
                status: response.status,
                body: response.snippet(),
            });
        }
        Ok(response.body)
    }

    /// Delete one message.
    ///
    /// The welcome message (id `-1`) is never sent to the service and yields
    /// [`DeleteOutcome::NothingToDelete`]. An empty or all-zero `deleted_ids` yields
    /// [`DeleteOutcome::Rejected`].
    ///
    /// # Errors
    /// [`Error::NoSession`] before a token is held; transport and decoding errors otherwise.
    pub async fn delete_message(&mut self, message_id: i64) -> Result<DeleteOutcome> {
        if message_id == TEMPLATE_MESSAGE_ID {
            debug!("welcome message has nothing to delete");
            return Ok(DeleteOutcome::NothingToDelete);
        }
        self.require_token()?;

        let params = vec![("email_ids[]", Cow::Owned(message_id.to_string()))];
        let response = self.call("del_email", &params).await?;

        let deleted = response
            .get("deleted_ids")
            .and_then(Value::as_array)
            .is_some_and(|ids| {
                ids.iter()
                    .any(|id| value_as_i64(id).is_some_and(|id| id != 0))
            });

        if deleted {
            info!(message_id, "message deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            warn!(
                message_id,
                response = %json_snippet(&response),
                "service did not delete message"
            );
            Ok(DeleteOutcome::Rejected)
        }
    }

    /// Fetch a message, then delete it.
    ///
    /// The fetched sender, subject, date and body come back with the outcome so the caller
    /// can report what was removed.
    ///
    /// # Errors
    /// As for [`Client::fetch_body`] and [`Client::delete_message`].
    pub async fn delete_message_with_details(
        &mut self,
        message_id: i64,
    ) -> Result<DeletedMessage> {
        let body = self.fetch_body(message_id).await?;
        let outcome = self.delete_message(message_id).await?;
        if outcome.is_deleted() {
            info!(
                message_id,
                from = ?body.from,
                subject = ?body.subject,
                date = ?body.date,
                "deleted message"
            );
        }
        Ok(DeletedMessage { outcome, body })
    }

    /// Bind `address`, list its whole inbox and delete every message in turn.
    ///
    /// Per-message failures are recorded in the report and do not stop the batch; only a
    /// transport error aborts it.
    ///
    /// # Errors
    /// Session acquisition and listing errors, and the first transport error.
    pub async fn delete_all(&mut self, address: &str) -> Result<DeleteReport> {
        self.acquire_session(address).await?;
        let messages = self.email_list(0).await?;

        let mut report = DeleteReport::default();
        if messages.is_empty() {
            info!(address, "no messages to delete");
            return Ok(report);
        }

        for message in messages {
            match self.delete_message(message.id).await {
                Ok(DeleteOutcome::Deleted) => report.deleted.push(message.id),
                Ok(DeleteOutcome::Rejected) => report.rejected.push(message.id),
                Ok(DeleteOutcome::NothingToDelete) => report.skipped.push(message.id),
                Err(err) if err.is_transport() => return Err(err),
                Err(err) => {
                    warn!(message_id = message.id, error = %err, "delete failed");
                    report.failed.push(message.id);
                }
            }
        }

        info!(
            address,
            deleted = report.deleted.len(),
            rejected = report.rejected.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "delete-all finished"
        );
        Ok(report)
    }

    /// Issue one API call and rotate the token from its response.
    async fn call(&mut self, function: &str, params: &[Param<'_>]) -> Result<Value> {
        let url = self.ajax_url(function, params);
        let response = self.transport.get(url, &mut self.session).await?;
        let value = decode(&response)?;
        self.session.rotate_token(&value);
        Ok(value)
    }

    fn ajax_url(&self, function: &str, params: &[Param<'_>]) -> Url {
        let mut url = self.api_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("f", function);
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(token) = self.session.token() {
                query.append_pair("sid_token", token);
            }
        }
        url
    }

    fn attachment_url(&self, message_id: i64, part_id: &str) -> Url {
        let mut url = self.inbox_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("get_att", "");
            query.append_pair("lang", &self.lang);
            query.append_pair("email_id", &message_id.to_string());
            query.append_pair("part_id", part_id);
            if let Some(token) = self.session.token() {
                query.append_pair("sid_token", token);
            }
        }
        url
    }

    fn attachment_refs(&self, message_id: i64, response: &Value) -> Vec<AttachmentRef> {
        let Some(entries) = response.get("att_info").and_then(Value::as_array) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| {
                match serde_json::from_value::<AttachmentInfo>(entry.clone()) {
                    Ok(info) => Some(info),
                    Err(err) => {
                        warn!(message_id, error = %err, "skipping malformed att_info entry");
                        None
                    }
                }
            })
            .map(|info| AttachmentRef {
                message_id,
                download_url: self.attachment_url(message_id, &info.part_id).to_string(),
                part_id: info.part_id,
                file_name: info.file_name,
                file_type: info.file_type,
            })
            .collect()
    }

    fn require_token(&self) -> Result<()> {
        match self.session.token() {
            Some(_) => Ok(()),
            None => Err(Error::NoSession),
        }
    }
}

const API_URL: &str = "https://api.guerrillamail.com/ajax.php";
const INBOX_URL: &str = "https://www.guerrillamail.com/inbox";
const DEFAULT_DOMAIN: &str = "guerrillamailblock.com";
const SESSION_COOKIE: &str = "PHPSESSID";
const USER_AGENT_VALUE: &str = "Mozilla/5.0";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for configuring a GuerrillaMail [`Client`].
///
/// # Defaults
/// - API endpoint `https://api.guerrillamail.com/ajax.php`
/// - Attachment endpoint `https://www.guerrillamail.com/inbox`
/// - Mailbox domain `guerrillamailblock.com`
/// - Session cookie `PHPSESSID`
/// - Language `en`
/// - User agent `Mozilla/5.0`
/// - 30 second per-request timeout
/// - No proxy, TLS certificates verified
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    proxy: Option<String>,
    danger_accept_invalid_certs: bool,
    user_agent: String,
    api_url: String,
    inbox_url: String,
    domain: String,
    cookie_name: String,
    lang: String,
    timeout: Duration,
}

type Param<'a> = (&'a str, Cow<'a, str>);

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    ///
    /// See [`ClientBuilder`] for the list of defaults.
    pub fn new() -> Self {
        Self {
            proxy: None,
            danger_accept_invalid_certs: false,
            user_agent: USER_AGENT_VALUE.to_string(),
            api_url: API_URL.to_string(),
            inbox_url: INBOX_URL.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            cookie_name: SESSION_COOKIE.to_string(),
            lang: "en".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a proxy URL (e.g. `"http://127.0.0.1:8080"`).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Configure whether to accept invalid TLS certificates (default: `false`).
    ///
    /// # Security
    /// Accepting invalid certificates is unsafe on untrusted networks; it is primarily useful
    /// for traffic inspection in controlled environments.
    pub fn danger_accept_invalid_certs(mut self, value: bool) -> Self {
        self.danger_accept_invalid_certs = value;
        self
    }

    /// Override the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the AJAX endpoint URL.
    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Override the attachment download endpoint.
    pub fn inbox_url(mut self, inbox_url: impl Into<String>) -> Self {
        self.inbox_url = inbox_url.into();
        self
    }

    /// Domain used to derive the bound address when the service does not report one.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Name of the session cookie to capture and echo.
    pub fn cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    /// Language parameter sent with address and attachment requests.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Per-request timeout, covering connect through body read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the [`Client`].
    ///
    /// # Errors
    /// Returns an error if:
    /// - either endpoint URL does not parse,
    /// - the HTTP client cannot be constructed (e.g., invalid proxy URL).
    pub fn build(self) -> Result<Client> {
        let api_url = parse_url(&self.api_url)?;
        let inbox_url = parse_url(&self.inbox_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs);

        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Client {
            transport: Transport::new(builder.build()?),
            session: MailboxSession::new(self.cookie_name),
            api_url,
            inbox_url,
            domain: self.domain,
            lang: self.lang,
            proxy: self.proxy,
        })
    }
}

/// Extract the alias (local-part) from a full email address.
///
/// If the string does not contain `@`, the full input is returned unchanged.
fn extract_alias(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn decode(response: &RawResponse) -> Result<Value> {
    match response.json() {
        Ok(value) => Ok(value),
        Err(_) if !response.status.is_success() => Err(Error::Status {
            status: response.status,
            body: response.snippet(),
        }),
        Err(err) => Err(err),
    }
}

fn parse_list(response: &Value) -> Result<Vec<MessageSummary>> {
    let Some(list) = response.get("list") else {
        debug!("no `list` in response; nothing new");
        return Ok(Vec::new());
    };
    let list = list.as_array().ok_or_else(|| Error::Protocol {
        msg: format!("non-array `list` (response: {})", json_snippet(response)),
    })?;

    Ok(list
        .iter()
        .filter_map(
            |entry| match serde_json::from_value::<MessageSummary>(entry.clone()) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(error = %err, "skipping malformed list entry");
                    None
                }
            },
        )
        .collect())
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn json_snippet(value: &Value) -> String {
    let raw = value.to_string();
    raw.chars().take(200).collect()
}

#[cfg(test)]
impl Client {
    fn new_for_tests(base_url: &str) -> Self {
        ClientBuilder::new()
            .api_url(format!("{base_url}/ajax.php"))
            .inbox_url(format!("{base_url}/inbox"))
            .timeout(Duration::from_secs(5))
            .build()
            .expect("test client build failed")
    }

    fn with_token(mut self, token: &str) -> Self {
        self.session
            .rotate_token(&serde_json::json!({ "sid_token": token }));
        self
    }
}
