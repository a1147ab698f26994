//! Bounded-retry inbox polling.
//!
//! A [`Poller`] moves through `Idle -> Delaying -> Polling(k) -> Stopped`. Each call to
//! [`Poller::step`] performs one transition and never sleeps; [`Poller::pending_delay`] says
//! how long the driver should wait before the next step. [`Poller::run`] is the stock driver
//! and waits on the Tokio timer.
//!
//! Within an attempt every listed message is fetched, handed to the caller as a
//! [`Delivery`], and checked against the stop domain. A match ends the run at once, skipping
//! the rest of that list and all later attempts. A failed list call ends the run with
//! [`StopReason::Error`]; a failed body fetch is delivered with the message and polling
//! continues, unless the failure is a transport error.

use crate::{Client, Error, MessageBody, MessageSummary, Result};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a [`Poller`] gets messages from.
pub trait MailSource {
    /// List the messages currently visible in the inbox.
    fn poll_list(&mut self) -> impl Future<Output = Result<Vec<MessageSummary>>>;

    /// Fetch the body of one listed message.
    fn poll_body(&mut self, message_id: i64) -> impl Future<Output = Result<MessageBody>>;
}

impl MailSource for Client {
    async fn poll_list(&mut self) -> Result<Vec<MessageSummary>> {
        let address = self.session().address().map(str::to_string);
        self.list_messages(address.as_deref(), 0).await
    }

    async fn poll_body(&mut self, message_id: i64) -> Result<MessageBody> {
        self.fetch_body(message_id).await
    }
}

/// Timing and stop rule for one polling run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PolicyConfig")]
pub struct PollPolicy {
    start_delay: Duration,
    max_attempts: u32,
    interval: Duration,
    stop_domain: Option<String>,
}

impl PollPolicy {
    /// Start building a policy.
    pub fn builder() -> PollPolicyBuilder {
        PollPolicyBuilder::default()
    }

    /// Wait before the first attempt.
    pub fn start_delay(&self) -> Duration {
        self.start_delay
    }

    /// Upper bound on list attempts, at least 1.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sender suffix that ends the run, if any.
    pub fn stop_domain(&self) -> Option<&str> {
        self.stop_domain.as_deref()
    }

    /// Whether a message from `sender` ends the run.
    ///
    /// Plain suffix match: an empty stop domain matches every sender. Without a stop domain
    /// nothing matches and the run always goes to its last attempt.
    pub fn is_stop_sender(&self, sender: &str) -> bool {
        self.stop_domain
            .as_deref()
            .is_some_and(|domain| sender.ends_with(domain))
    }
}

/// Builder for [`PollPolicy`].
///
/// Defaults: no start delay, one attempt, no interval, no stop domain.
#[derive(Debug, Clone)]
pub struct PollPolicyBuilder {
    start_delay: Duration,
    max_attempts: u32,
    interval: Duration,
    stop_domain: Option<String>,
}

impl Default for PollPolicyBuilder {
    fn default() -> Self {
        Self {
            start_delay: Duration::ZERO,
            max_attempts: 1,
            interval: Duration::ZERO,
            stop_domain: None,
        }
    }
}

impl PollPolicyBuilder {
    /// Wait before the first attempt.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait between attempts.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sender suffix that stops polling, e.g. `"example.com"`.
    pub fn stop_domain(mut self, domain: impl Into<String>) -> Self {
        self.stop_domain = Some(domain.into());
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    /// [`Error::InvalidPolicy`] if `max_attempts` is zero.
    pub fn build(self) -> Result<PollPolicy> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(PollPolicy {
            start_delay: self.start_delay,
            max_attempts: self.max_attempts,
            interval: self.interval,
            stop_domain: self.stop_domain,
        })
    }
}

/// Serialized form of a policy, in whole seconds.
#[derive(Deserialize)]
struct PolicyConfig {
    #[serde(default)]
    start_delay_seconds: u64,
    max_attempts: u32,
    #[serde(default)]
    interval_seconds: u64,
    #[serde(default)]
    stop_domain: Option<String>,
}

impl TryFrom<PolicyConfig> for PollPolicy {
    type Error = Error;

    fn try_from(config: PolicyConfig) -> Result<Self> {
        let mut builder = PollPolicy::builder()
            .start_delay(Duration::from_secs(config.start_delay_seconds))
            .max_attempts(config.max_attempts)
            .interval(Duration::from_secs(config.interval_seconds));
        if let Some(domain) = config.stop_domain {
            builder = builder.stop_domain(domain);
        }
        builder.build()
    }
}

/// Where a [`Poller`] is.
#[derive(Debug)]
pub enum PollState {
    /// Not started.
    Idle,
    /// Waiting out the start delay; the next step runs attempt 1.
    Delaying,
    /// Waiting out the interval; the next step runs `attempt`.
    Polling {
        /// Attempt to run next.
        attempt: u32,
    },
    /// Finished.
    Stopped(StopReason),
}

/// Why a run ended.
#[derive(Debug)]
pub enum StopReason {
    /// A message from the stop domain arrived.
    Matched {
        /// Attempt that saw it.
        attempt: u32,
        /// Its id.
        message_id: i64,
        /// Its sender.
        from: String,
    },
    /// Every attempt ran without a match.
    Exhausted {
        /// Attempts performed.
        attempts: u32,
    },
    /// An attempt failed and the run was abandoned.
    Error {
        /// Attempt that failed.
        attempt: u32,
        /// The failure.
        error: Error,
    },
}

/// A message surfaced during polling.
#[derive(Debug)]
pub struct Delivery {
    /// Attempt that listed the message.
    pub attempt: u32,
    /// List entry.
    pub summary: MessageSummary,
    /// Fetched body, or the per-message failure.
    pub body: Result<MessageBody>,
}

/// Final result of [`Poller::run`].
#[derive(Debug)]
pub struct PollOutcome {
    /// Attempts performed.
    pub attempts: u32,
    /// Why the run ended.
    pub reason: StopReason,
}

impl PollOutcome {
    /// Whether the stop domain was seen.
    pub fn is_matched(&self) -> bool {
        matches!(self.reason, StopReason::Matched { .. })
    }

    /// Whether the run used up its attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.reason, StopReason::Exhausted { .. })
    }
}

/// Polling state machine for one run.
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    state: PollState,
    attempts: u32,
}

impl Poller {
    /// A poller in [`PollState::Idle`].
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            state: PollState::Idle,
            attempts: 0,
        }
    }

    /// The policy in force.
    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Current state.
    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Attempts performed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the run has ended.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, PollState::Stopped(_))
    }

    /// How long to wait before the next [`step`](Self::step), if anything remains to do.
    pub fn pending_delay(&self) -> Option<Duration> {
        match self.state {
            PollState::Idle => Some(Duration::ZERO),
            PollState::Delaying => Some(self.policy.start_delay),
            PollState::Polling { .. } => Some(self.policy.interval),
            PollState::Stopped(_) => None,
        }
    }

    /// Perform one transition.
    ///
    /// From `Idle` this only enters `Delaying`. From `Delaying` or `Polling` it runs one
    /// attempt against `source`, passing every listed message to `on_delivery`. A stopped
    /// poller is left as is.
    pub async fn step<S, F>(&mut self, source: &mut S, on_delivery: &mut F) -> &PollState
    where
        S: MailSource,
        F: FnMut(Delivery),
    {
        let attempt = match self.state {
            PollState::Idle => {
                debug!(delay = ?self.policy.start_delay, "polling scheduled");
                self.state = PollState::Delaying;
                return &self.state;
            }
            PollState::Delaying => 1,
            PollState::Polling { attempt } => attempt,
            PollState::Stopped(_) => return &self.state,
        };

        self.state = self.attempt(attempt, source, on_delivery).await;
        &self.state
    }

    /// Drive the poller to completion, sleeping on the Tokio timer between steps.
    pub async fn run<S, F>(mut self, source: &mut S, mut on_delivery: F) -> PollOutcome
    where
        S: MailSource,
        F: FnMut(Delivery),
    {
        loop {
            if let Some(delay) = self.pending_delay() {
                if !delay.is_zero() {
                    debug!(?delay, "waiting");
                    tokio::time::sleep(delay).await;
                }
            }
            self.step(source, &mut on_delivery).await;
            if let Some(outcome) = self.take_outcome() {
                return outcome;
            }
        }
    }

    async fn attempt<S, F>(&mut self, attempt: u32, source: &mut S, on_delivery: &mut F) -> PollState
    where
        S: MailSource,
        F: FnMut(Delivery),
    {
        self.attempts = attempt;
        info!(attempt, max = self.policy.max_attempts, "checking inbox");

        let messages = match source.poll_list().await {
            Ok(messages) => messages,
            Err(error) => {
                warn!(attempt, %error, "inbox check failed; stopping");
                return PollState::Stopped(StopReason::Error { attempt, error });
            }
        };

        if messages.is_empty() {
            info!(attempt, "no new messages");
        } else {
            info!(attempt, count = messages.len(), "messages found");
        }

        for summary in messages {
            let body = match source.poll_body(summary.id).await {
                Err(error) if error.is_transport() => {
                    warn!(attempt, message_id = summary.id, %error, "body fetch lost the connection; stopping");
                    return PollState::Stopped(StopReason::Error { attempt, error });
                }
                Err(error) => {
                    warn!(attempt, message_id = summary.id, %error, "body fetch failed");
                    Err(error)
                }
                Ok(body) => Ok(body),
            };

            let stop = self
                .policy
                .is_stop_sender(&summary.from)
                .then(|| (summary.id, summary.from.clone()));

            on_delivery(Delivery {
                attempt,
                summary,
                body,
            });

            if let Some((message_id, from)) = stop {
                info!(attempt, message_id, from = %from, "stop domain matched");
                return PollState::Stopped(StopReason::Matched {
                    attempt,
                    message_id,
                    from,
                });
            }
        }

        if attempt >= self.policy.max_attempts {
            info!(attempts = attempt, "attempts exhausted");
            PollState::Stopped(StopReason::Exhausted { attempts: attempt })
        } else {
            PollState::Polling {
                attempt: attempt + 1,
            }
        }
    }

    fn take_outcome(&mut self) -> Option<PollOutcome> {
        match std::mem::replace(&mut self.state, PollState::Idle) {
            PollState::Stopped(reason) => Some(PollOutcome {
                attempts: self.attempts,
                reason,
            }),
            other => {
                self.state = other;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    fn summary(id: i64, from: &str) -> MessageSummary {
        serde_json::from_value(serde_json::json!({
            "mail_id": id,
            "mail_from": from,
            "mail_subject": format!("message {id}"),
            "mail_timestamp": 1_700_000_000
        }))
        .unwrap()
    }

    #[derive(Default)]
    struct ScriptedSource {
        lists: VecDeque<Result<Vec<MessageSummary>>>,
        broken_bodies: HashSet<i64>,
        unreachable_bodies: HashSet<i64>,
        list_calls: u32,
        body_calls: Vec<i64>,
    }

    impl ScriptedSource {
        fn with_lists(lists: Vec<Result<Vec<MessageSummary>>>) -> Self {
            Self {
                lists: lists.into(),
                ..Self::default()
            }
        }
    }

    impl MailSource for ScriptedSource {
        async fn poll_list(&mut self) -> Result<Vec<MessageSummary>> {
            self.list_calls += 1;
            self.lists.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn poll_body(&mut self, message_id: i64) -> Result<MessageBody> {
            self.body_calls.push(message_id);
            if self.unreachable_bodies.contains(&message_id) {
                // Port 9 (discard) on loopback is not expected to accept connections.
                let err = reqwest::get("http://127.0.0.1:9/ajax.php").await.unwrap_err();
                return Err(err.into());
            }
            if self.broken_bodies.contains(&message_id) {
                return Err(Error::Protocol {
                    msg: "bad body".to_string(),
                });
            }
            Ok(MessageBody::from_html(
                message_id,
                format!("<p>body {message_id}</p>"),
            ))
        }
    }

    fn policy(max_attempts: u32, stop_domain: &str) -> PollPolicy {
        PollPolicy::builder()
            .max_attempts(max_attempts)
            .stop_domain(stop_domain)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn stops_on_matching_sender_in_third_attempt() {
        let mut source = ScriptedSource::with_lists(vec![
            Ok(vec![]),
            Ok(vec![]),
            Ok(vec![summary(7, "stop@x.com")]),
        ]);
        let mut deliveries = Vec::new();

        let outcome = Poller::new(policy(3, "x.com"))
            .run(&mut source, |delivery| deliveries.push(delivery))
            .await;

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.is_matched(), "got {:?}", outcome.reason);
        assert_eq!(source.list_calls, 3);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].attempt, 3);
        assert_eq!(deliveries[0].body.as_ref().unwrap().plain_text, "body 7");
    }

    #[tokio::test]
    async fn exhausts_when_nothing_arrives() {
        let mut source = ScriptedSource::default();

        let outcome = Poller::new(policy(2, "x.com"))
            .run(&mut source, |_| {})
            .await;

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.is_exhausted());
        assert_eq!(source.list_calls, 2);
    }

    #[tokio::test]
    async fn match_skips_rest_of_list_and_later_attempts() {
        let mut source = ScriptedSource::with_lists(vec![Ok(vec![
            summary(1, "a@y.com"),
            summary(2, "stop@x.com"),
            summary(3, "c@y.com"),
        ])]);
        let mut seen = Vec::new();

        let outcome = Poller::new(policy(5, "x.com"))
            .run(&mut source, |delivery| seen.push(delivery.summary.id))
            .await;

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(source.body_calls, vec![1, 2]);
        assert_eq!(source.list_calls, 1);
        match outcome.reason {
            StopReason::Matched {
                attempt,
                message_id,
                from,
            } => {
                assert_eq!(attempt, 1);
                assert_eq!(message_id, 2);
                assert_eq!(from, "stop@x.com");
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_matching_messages_do_not_stop() {
        let mut source = ScriptedSource::with_lists(vec![
            Ok(vec![summary(1, "a@y.com")]),
            Ok(vec![summary(1, "a@y.com"), summary(2, "b@y.com")]),
        ]);
        let mut seen = Vec::new();

        let outcome = Poller::new(policy(2, "x.com"))
            .run(&mut source, |delivery| seen.push(delivery.summary.id))
            .await;

        assert!(outcome.is_exhausted());
        assert_eq!(seen, vec![1, 1, 2]);
    }

    #[tokio::test]
    async fn list_failure_stops_without_using_remaining_attempts() {
        let mut source =
            ScriptedSource::with_lists(vec![Ok(vec![]), Err(Error::NoSession), Ok(vec![])]);

        let outcome = Poller::new(policy(5, "x.com"))
            .run(&mut source, |_| {})
            .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(source.list_calls, 2);
        assert!(matches!(
            outcome.reason,
            StopReason::Error {
                attempt: 2,
                error: Error::NoSession
            }
        ));
    }

    #[tokio::test]
    async fn body_failure_is_delivered_and_polling_continues() {
        let mut source = ScriptedSource::with_lists(vec![Ok(vec![
            summary(1, "a@y.com"),
            summary(2, "b@y.com"),
        ])]);
        source.broken_bodies.insert(1);
        let mut results = Vec::new();

        let outcome = Poller::new(policy(1, "x.com"))
            .run(&mut source, |delivery| {
                results.push((delivery.summary.id, delivery.body.is_ok()))
            })
            .await;

        assert!(outcome.is_exhausted());
        assert_eq!(results, vec![(1, false), (2, true)]);
    }

    #[tokio::test]
    async fn body_transport_failure_stops_the_run() {
        let mut source = ScriptedSource::with_lists(vec![Ok(vec![
            summary(1, "a@y.com"),
            summary(2, "b@y.com"),
        ])]);
        source.unreachable_bodies.insert(1);
        let mut seen = Vec::new();

        let outcome = Poller::new(policy(3, "x.com"))
            .run(&mut source, |delivery| seen.push(delivery.summary.id))
            .await;

        assert!(seen.is_empty());
        assert_eq!(source.body_calls, vec![1]);
        assert_eq!(source.list_calls, 1);
        assert_eq!(outcome.attempts, 1);
        match outcome.reason {
            StopReason::Error { attempt, error } => {
                assert_eq!(attempt, 1);
                assert!(error.is_transport(), "got {error:?}");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_stop_domain_matches_first_message() {
        let mut source = ScriptedSource::with_lists(vec![Ok(vec![
            summary(1, "a@y.com"),
            summary(2, "b@y.com"),
        ])]);
        let mut seen = Vec::new();

        let outcome = Poller::new(policy(3, ""))
            .run(&mut source, |delivery| seen.push(delivery.summary.id))
            .await;

        assert!(outcome.is_matched());
        assert_eq!(seen, vec![1]);
        assert_eq!(source.list_calls, 1);
    }

    #[tokio::test]
    async fn no_stop_domain_runs_every_attempt() {
        let mut source = ScriptedSource::with_lists(vec![
            Ok(vec![summary(1, "a@y.com")]),
            Ok(vec![summary(1, "a@y.com")]),
        ]);
        let policy = PollPolicy::builder().max_attempts(2).build().unwrap();

        assert_eq!(policy.stop_domain(), None);
        assert!(!policy.is_stop_sender("a@y.com"));

        let outcome = Poller::new(policy).run(&mut source, |_| {}).await;

        assert!(outcome.is_exhausted());
        assert_eq!(source.list_calls, 2);
    }

    #[test]
    fn stop_sender_is_a_plain_suffix_match() {
        assert!(policy(1, "").is_stop_sender("a@y.com"));
        assert!(policy(1, "x.com").is_stop_sender("stop@x.com"));
        assert!(!policy(1, "x.com").is_stop_sender("stop@x.com.evil"));
    }

    #[tokio::test]
    async fn step_walks_the_states() {
        let policy = PollPolicy::builder()
            .start_delay(Duration::from_secs(3))
            .interval(Duration::from_secs(10))
            .max_attempts(2)
            .build()
            .unwrap();
        let mut poller = Poller::new(policy);
        let mut source = ScriptedSource::default();
        let mut sink = |_: Delivery| {};

        assert!(matches!(poller.state(), PollState::Idle));
        assert!(matches!(
            poller.step(&mut source, &mut sink).await,
            PollState::Delaying
        ));
        assert_eq!(poller.pending_delay(), Some(Duration::from_secs(3)));
        assert_eq!(source.list_calls, 0);

        assert!(matches!(
            poller.step(&mut source, &mut sink).await,
            PollState::Polling { attempt: 2 }
        ));
        assert_eq!(poller.pending_delay(), Some(Duration::from_secs(10)));

        assert!(matches!(
            poller.step(&mut source, &mut sink).await,
            PollState::Stopped(StopReason::Exhausted { attempts: 2 })
        ));
        assert_eq!(poller.pending_delay(), None);

        poller.step(&mut source, &mut sink).await;
        assert_eq!(source.list_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_start_delay_and_intervals() {
        let policy = PollPolicy::builder()
            .start_delay(Duration::from_secs(30))
            .interval(Duration::from_secs(60))
            .max_attempts(3)
            .build()
            .unwrap();
        let mut source = ScriptedSource::default();
        let started = tokio::time::Instant::now();

        let outcome = Poller::new(policy).run(&mut source, |_| {}).await;

        assert!(outcome.is_exhausted());
        assert!(started.elapsed() >= Duration::from_secs(150));
        assert!(started.elapsed() < Duration::from_secs(151));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = PollPolicy::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, Error::InvalidPolicy(_)));
    }

    #[test]
    fn policy_deserializes_from_seconds() {
        let policy: PollPolicy = serde_json::from_value(serde_json::json!({
            "start_delay_seconds": 1,
            "max_attempts": 2,
            "interval_seconds": 10,
            "stop_domain": "email.com"
        }))
        .unwrap();

        assert_eq!(policy.start_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.interval(), Duration::from_secs(10));
        assert_eq!(policy.stop_domain(), Some("email.com"));
        assert!(policy.is_stop_sender("stop@email.com"));

        let unset: PollPolicy =
            serde_json::from_value(serde_json::json!({ "max_attempts": 1 })).unwrap();
        assert_eq!(unset.stop_domain(), None);

        let invalid = serde_json::from_value::<PollPolicy>(serde_json::json!({ "max_attempts": 0 }));
        assert!(invalid.is_err());
    }

    #[tokio::test]
    async fn client_drives_the_poller_against_the_service() {
        use httpmock::Method::GET;
        use httpmock::MockServer;
        use serde_json::json;

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).query_param("f", "set_email_user");
                then.status(200)
                    .json_body(json!({ "sid_token": "sid", "email_addr": "box@guerrillamailblock.com" }));
            })
            .await;
        let list = server
            .mock_async(|when, then| {
                when.method(GET)
                    .query_param("f", "check_email")
                    .query_param("seq", "0")
                    .query_param("email", "box@guerrillamailblock.com");
                then.status(200).json_body(json!({ "list": [
                    { "mail_id": "11", "mail_from": "robot@stop.example", "mail_subject": "Code",
                      "mail_timestamp": "1700000000", "att": "0" }
                ]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .query_param("f", "fetch_email")
                    .query_param("email_id", "11");
                then.status(200).json_body(json!({ "mail_body": "<div>Code: 123456</div>" }));
            })
            .await;

        let mut client = Client::builder()
            .api_url(server.url("/ajax.php"))
            .inbox_url(server.url("/inbox"))
            .build()
            .unwrap();
        client.acquire_session("box").await.unwrap();

        let mut texts = Vec::new();
        let outcome = Poller::new(policy(3, "stop.example"))
            .run(&mut client, |delivery| {
                if let Ok(body) = delivery.body {
                    texts.push(body.plain_text);
                }
            })
            .await;

        assert!(outcome.is_matched());
        assert_eq!(texts, vec!["Code: 123456".to_string()]);
        list.assert_hits_async(1).await;
    }
}
