//! Error types for the GuerrillaMail polling client.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur during GuerrillaMail operations.
///
/// Soft outcomes (no address assigned, no list yet, missing body, rejected delete) are not
/// errors; they come back as typed values from the corresponding [`Client`](crate::Client)
/// methods.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (timeout, DNS, refused connection, broken body stream).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Session acquisition did not yield a `sid_token`.
    #[error("failed to acquire session: {0}")]
    Session(String),

    /// A token-scoped operation was attempted before any session token was held.
    #[error("no session token held; acquire a session or address first")]
    NoSession,

    /// Well-formed response that is missing a required field.
    #[error("unexpected response: {msg}")]
    Protocol {
        /// What was missing, with a short response snippet.
        msg: String,
    },

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL could not be parsed or composed.
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A header value could not be constructed.
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    /// Non-success status on a request that must succeed (attachment downloads).
    #[error("unexpected status {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Body snippet.
        body: String,
    },

    /// A poll policy violated its constraints.
    #[error("invalid poll policy: {0}")]
    InvalidPolicy(String),
}

impl Error {
    /// Whether this error is a network-level failure.
    ///
    /// Transport failures abort poll runs and batch deletes; everything else is reported
    /// per item.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Request(_))
    }
}
