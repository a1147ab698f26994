//! Message models for GuerrillaMail.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Text surfaced in place of a body when the service returns no `mail_body`.
pub const FETCH_FAILED_TEXT: &str = "Failed to fetch email content.";

/// Id the service gives its injected welcome message.
pub const TEMPLATE_MESSAGE_ID: i64 = -1;

/// An inbox entry as returned by `check_email` / `get_email_list`.
///
/// The service is inconsistent about numbers: ids, timestamps and counts arrive either as JSON
/// numbers or as numeric strings. Both are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageSummary {
    /// Message id. `-1` is the service's welcome message.
    #[serde(rename = "mail_id", deserialize_with = "lenient_i64")]
    pub id: i64,
    /// Sender address.
    #[serde(rename = "mail_from", default)]
    pub from: String,
    /// Subject line.
    #[serde(rename = "mail_subject", default)]
    pub subject: String,
    /// Unix timestamp of receipt; `0` when the service sends none.
    #[serde(rename = "mail_timestamp", default, deserialize_with = "lenient_i64_or_zero")]
    pub timestamp: i64,
    /// Display date as formatted by the service.
    #[serde(rename = "mail_date", default)]
    pub date: Option<String>,
    /// Short excerpt of the body.
    #[serde(rename = "mail_excerpt", default)]
    pub excerpt: Option<String>,
    /// Number of attachments, `0` if absent.
    #[serde(rename = "att", default, deserialize_with = "lenient_i64_or_zero")]
    pub attachment_count: i64,
    /// Size in bytes, when reported.
    #[serde(rename = "mail_size", default, deserialize_with = "lenient_opt_u64")]
    pub size_bytes: Option<u64>,
}

impl MessageSummary {
    /// Whether this is the service-injected welcome message.
    pub fn is_template(&self) -> bool {
        self.id == TEMPLATE_MESSAGE_ID
    }
}

/// A fetched message body.
///
/// `plain_text` is derived from `raw_html` with [`strip_markup`](crate::strip_markup) on every
/// fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBody {
    /// Message id.
    pub id: i64,
    /// Body as sent by the service (HTML).
    pub raw_html: String,
    /// Body with markup removed.
    pub plain_text: String,
    /// Sender, when the fetch response carries it.
    pub from: Option<String>,
    /// Subject, when the fetch response carries it.
    pub subject: Option<String>,
    /// Display date, when the fetch response carries it.
    pub date: Option<String>,
    /// Attachments listed in `att_info`.
    pub attachments: Vec<AttachmentRef>,
    body_missing: bool,
}

impl MessageBody {
    pub(crate) fn from_html(id: i64, raw_html: String) -> Self {
        let plain_text = crate::normalize::strip_markup(&raw_html);
        Self {
            id,
            raw_html,
            plain_text,
            from: None,
            subject: None,
            date: None,
            attachments: Vec::new(),
            body_missing: false,
        }
    }

    pub(crate) fn fetch_failed(id: i64) -> Self {
        Self {
            id,
            raw_html: String::new(),
            plain_text: FETCH_FAILED_TEXT.to_string(),
            from: None,
            subject: None,
            date: None,
            attachments: Vec::new(),
            body_missing: true,
        }
    }

    /// True when the service response had no body and `plain_text` is the
    /// [`FETCH_FAILED_TEXT`] placeholder.
    pub fn is_fetch_failed(&self) -> bool {
        self.body_missing
    }
}

/// Attachment metadata plus a ready-to-use download link.
///
/// The link embeds the session token current at construction time; a rotated token
/// invalidates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Message the attachment belongs to.
    pub message_id: i64,
    /// MIME part id.
    pub part_id: String,
    /// File name.
    pub file_name: String,
    /// Content type or type hint.
    pub file_type: String,
    /// Download URL.
    pub download_url: String,
}

/// One `att_info` entry.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AttachmentInfo {
    #[serde(rename = "t", default)]
    pub file_type: String,
    #[serde(rename = "f", default)]
    pub file_name: String,
    #[serde(rename = "p", deserialize_with = "lenient_string")]
    pub part_id: String,
}

/// Result of a single delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The service confirmed the deletion.
    Deleted,
    /// The service answered with no ids or only `"0"`.
    Rejected,
    /// The target was the welcome message; no request was sent.
    NothingToDelete,
}

impl DeleteOutcome {
    /// Whether the message is gone.
    pub fn is_deleted(self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

/// A delete together with the message as fetched just before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedMessage {
    /// What the service did.
    pub outcome: DeleteOutcome,
    /// Sender, subject, date and body of the message.
    pub body: MessageBody,
}

/// Tally of a [`Client::delete_all`](crate::Client::delete_all) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Ids confirmed deleted.
    pub deleted: Vec<i64>,
    /// Ids the service refused.
    pub rejected: Vec<i64>,
    /// Welcome messages, which have nothing to delete.
    pub skipped: Vec<i64>,
    /// Ids whose delete call failed without a transport error.
    pub failed: Vec<i64>,
}

impl DeleteReport {
    /// Number of messages actually deleted.
    pub fn count(&self) -> usize {
        self.deleted.len()
    }
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value).ok_or_else(|| D::Error::custom(format!("expected integer, got {value}")))
}

fn lenient_i64_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_i64(&value).unwrap_or(0))
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_i64(&value).and_then(|n| u64::try_from(n).ok()))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!("expected string or number, got {other}"))),
    }
}
