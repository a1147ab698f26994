//! GuerrillaMail polling client
//!
//! An async Rust client for the GuerrillaMail temporary email service, built around a
//! session-aware [`Client`] and a bounded-retry [`Poller`].
//!
//! The client keeps the service's session cookie and rotating `sid_token` on the instance,
//! follows one redirect hop per request, and turns HTML bodies into plain text. The poller
//! checks the inbox up to a fixed number of times and stops early when a message arrives
//! from a chosen sender domain.
//!
//! # Example
//! ```no_run
//! use guerrillamail_poller::{Client, PollPolicy, Poller};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), guerrillamail_poller::Error> {
//!     let mut client = Client::new()?;
//!     let address = client.new_random_address().await?;
//!     println!("Send mail to: {address:?}");
//!
//!     let policy = PollPolicy::builder()
//!         .start_delay(Duration::from_secs(1))
//!         .max_attempts(6)
//!         .interval(Duration::from_secs(10))
//!         .stop_domain("example.com")
//!         .build()?;
//!
//!     let outcome = Poller::new(policy)
//!         .run(&mut client, |delivery| {
//!             println!("From: {}, Subject: {}", delivery.summary.from, delivery.summary.subject);
//!             if let Ok(body) = &delivery.body {
//!                 println!("{}", body.plain_text);
//!             }
//!         })
//!         .await;
//!     println!("stopped after {} attempt(s): {:?}", outcome.attempts, outcome.reason);
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod models;
pub mod normalize;
pub mod poll;
pub mod session;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use error::Error;
pub use models::{
    AttachmentRef, DeleteOutcome, DeleteReport, DeletedMessage, MessageBody, MessageSummary,
    FETCH_FAILED_TEXT, TEMPLATE_MESSAGE_ID,
};
pub use normalize::strip_markup;
pub use poll::{
    Delivery, MailSource, PollOutcome, PollPolicy, PollPolicyBuilder, PollState, Poller,
    StopReason,
};
pub use session::MailboxSession;
pub use transport::{RawResponse, Transport};

/// Result type alias for GuerrillaMail operations.
///
/// This is equivalent to `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
