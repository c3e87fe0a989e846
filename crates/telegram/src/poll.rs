use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{
    ApiResponse, GetUpdatesPayload, Message, SendMessagePayload, Update, PARSE_MODE_MARKDOWN_V2,
};
use crate::commands::{BotCommandService, ChatContext, CommandRouter};
use crate::format;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("telegram api request failed: {0}")]
    Request(String),
    #[error("telegram api rejected the call: {0}")]
    Rejected(String),
    #[error("telegram api response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait UpdateTransport: Send + Sync {
    /// Long-polls for updates past `offset`, waiting server-side up to
    /// `timeout` before returning an empty batch.
    async fn poll_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError>;
}

/// Stands in when no bot token is configured: polls idle and drops outbound
/// messages, so the rest of the process runs unchanged.
#[derive(Default)]
pub struct NoopUpdateTransport;

#[async_trait]
impl UpdateTransport for NoopUpdateTransport {
    async fn poll_updates(
        &self,
        _offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Bot API client over reqwest. The token is part of every request URL, so
/// the assembled base is kept private and errors are scrubbed of URLs before
/// they can reach a log line.
pub struct HttpUpdateTransport {
    http: reqwest::Client,
    method_base: String,
}

impl HttpUpdateTransport {
    pub fn new(token: &SecretString) -> Result<Self, TransportError> {
        Self::with_api_base(token, TELEGRAM_API_BASE)
    }

    /// Points at a different server, for tests or a self-hosted Bot API.
    pub fn with_api_base(token: &SecretString, api_base: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| TransportError::Request(scrub(error)))?;
        Ok(Self {
            http,
            method_base: format!(
                "{}/bot{}",
                api_base.trim_end_matches('/'),
                token.expose_secret()
            ),
        })
    }

    async fn call<T, P>(
        &self,
        method: &str,
        payload: &P,
        budget: Duration,
    ) -> Result<T, TransportError>
    where
        T: serde::de::DeserializeOwned,
        P: serde::Serialize,
    {
        let response = self
            .http
            .post(format!("{}/{method}", self.method_base))
            .timeout(budget)
            .json(payload)
            .send()
            .await
            .map_err(|error| TransportError::Request(scrub(error)))?;

        let envelope: ApiResponse<T> =
            response.json().await.map_err(|error| TransportError::Decode(scrub(error)))?;
        envelope
            .into_result()
            .map_err(|rejection| TransportError::Rejected(rejection.to_string()))
    }
}

// reqwest errors display their URL, which here embeds the bot token.
fn scrub(error: reqwest::Error) -> String {
    error.without_url().to_string()
}

#[async_trait]
impl UpdateTransport for HttpUpdateTransport {
    async fn poll_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        let payload = GetUpdatesPayload {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        };
        // The server holds the connection open for the whole poll window,
        // so the request budget sits above it.
        self.call("getUpdates", &payload, timeout + Duration::from_secs(10)).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
        let payload = SendMessagePayload { chat_id, text, parse_mode: PARSE_MODE_MARKDOWN_V2 };
        self.call::<Message, _>("sendMessage", &payload, Duration::from_secs(15)).await.map(|_| ())
    }
}

/// Backoff for consecutive poll failures. Once `max_failures` consecutive
/// polls have failed the runner gives up and returns, leaving the rest of
/// the process (reconciler, health endpoint) running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_failures: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_failures: 10, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, failure: u32) -> Duration {
        let exponent = failure.min(16);
        let multiplier = 1_u64 << exponent;
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms))
    }
}

/// The chat front-end's main loop: long-poll updates, feed text messages
/// through the command router, send the replies back. Updates are handled
/// one at a time, in order, so a chat's conversation can never interleave
/// with itself.
pub struct LongPollRunner<S> {
    transport: Arc<dyn UpdateTransport>,
    router: CommandRouter<S>,
    poll_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl<S> LongPollRunner<S>
where
    S: BotCommandService,
{
    pub fn new(
        transport: Arc<dyn UpdateTransport>,
        service: S,
        poll_timeout: Duration,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self { transport, router: CommandRouter::new(service), poll_timeout, reconnect }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "telegram.poll.started",
            poll_timeout_secs = self.poll_timeout.as_secs(),
            "telegram long-poll loop started"
        );

        let mut offset: Option<i64> = None;
        let mut failures: u32 = 0;

        loop {
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                batch = self.transport.poll_updates(offset, self.poll_timeout) => batch,
            };

            match batch {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        self.handle_update(&update).await;
                    }
                }
                Err(error) => {
                    failures += 1;
                    warn!(
                        event_name = "telegram.poll.failed",
                        consecutive_failures = failures,
                        error = %error,
                        "update poll failed"
                    );
                    if failures > self.reconnect.max_failures {
                        warn!(
                            event_name = "telegram.poll.abandoned",
                            max_failures = self.reconnect.max_failures,
                            "poll failures exhausted; chat surface going dark"
                        );
                        break;
                    }
                    let delay = self.reconnect.backoff(failures - 1);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        info!(event_name = "telegram.poll.stopped", "telegram long-poll loop stopped");
    }

    async fn handle_update(&self, update: &Update) {
        let Some(incoming) = update.text_message() else {
            return;
        };

        // Message bodies stay out of the logs: a create conversation reply
        // can contain a bot token.
        debug!(
            event_name = "telegram.update_received",
            update_id = update.update_id,
            chat_id = incoming.chat_id,
            text_chars = incoming.text.chars().count(),
            "handling text update"
        );

        let chat = ChatContext { chat_id: incoming.chat_id, sender_id: incoming.sender_id };
        let reply = match self.router.handle_text(&chat, incoming.text).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(error) => {
                warn!(
                    event_name = "telegram.route_failed",
                    chat_id = chat.chat_id,
                    error = %error,
                    "command routing failed"
                );
                format::error_message("something went wrong on our side", true)
            }
        };

        if let Err(error) = self.transport.send_message(chat.chat_id, &reply).await {
            warn!(
                event_name = "telegram.send_failed",
                chat_id = chat.chat_id,
                error = %error,
                "reply could not be delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{watch, Mutex};

    use super::{
        LongPollRunner, NoopUpdateTransport, ReconnectPolicy, TransportError, UpdateTransport,
    };
    use crate::api::{Chat, Message, Update, User};
    use crate::commands::NoopBotCommandService;

    fn update(update_id: i64, chat_id: i64, text: &str) -> Update {
        Update {
            update_id,
            message: Some(Message {
                message_id: update_id * 10,
                from: Some(User { id: chat_id, username: None }),
                chat: Chat { id: chat_id },
                text: Some(text.to_owned()),
            }),
        }
    }

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        polls: VecDeque<Result<Vec<Update>, TransportError>>,
        offsets_seen: Vec<Option<i64>>,
        sent: Vec<(i64, String)>,
    }

    impl ScriptedTransport {
        fn with_polls(polls: Vec<Result<Vec<Update>, TransportError>>) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    polls: polls.into(),
                    offsets_seen: Vec::new(),
                    sent: Vec::new(),
                }),
            }
        }

        async fn offsets_seen(&self) -> Vec<Option<i64>> {
            self.state.lock().await.offsets_seen.clone()
        }

        async fn sent(&self) -> Vec<(i64, String)> {
            self.state.lock().await.sent.clone()
        }
    }

    #[async_trait]
    impl UpdateTransport for ScriptedTransport {
        async fn poll_updates(
            &self,
            offset: Option<i64>,
            _timeout: Duration,
        ) -> Result<Vec<Update>, TransportError> {
            let mut state = self.state.lock().await;
            state.offsets_seen.push(offset);
            state
                .polls
                .pop_front()
                .unwrap_or(Err(TransportError::Request("script exhausted".to_owned())))
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.sent.push((chat_id, text.to_owned()));
            Ok(())
        }
    }

    fn strict_policy() -> ReconnectPolicy {
        ReconnectPolicy { max_failures: 0, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn replies_flow_back_through_the_transport() {
        let transport =
            Arc::new(ScriptedTransport::with_polls(vec![Ok(vec![update(41, 7, "/help")])]));
        let runner = LongPollRunner::new(
            transport.clone(),
            NoopBotCommandService,
            Duration::from_secs(1),
            strict_policy(),
        );

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await;

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
        assert!(sent[0].1.contains("botforge commands"));
    }

    #[tokio::test]
    async fn offset_advances_past_every_update_even_without_text() {
        let silent = Update { update_id: 90, message: None };
        let transport = Arc::new(ScriptedTransport::with_polls(vec![Ok(vec![
            silent,
            update(91, 7, "/list"),
        ])]));
        let runner = LongPollRunner::new(
            transport.clone(),
            NoopBotCommandService,
            Duration::from_secs(1),
            strict_policy(),
        );

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await;

        // First poll has no offset; the second asks past the whole batch.
        assert_eq!(transport.offsets_seen().await, vec![None, Some(92)]);
        assert_eq!(transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn consecutive_failures_exhaust_the_reconnect_policy() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![
            Err(TransportError::Request("down".to_owned())),
            Err(TransportError::Request("still down".to_owned())),
            Err(TransportError::Request("dead".to_owned())),
        ]));
        let runner = LongPollRunner::new(
            transport.clone(),
            NoopBotCommandService,
            Duration::from_secs(1),
            ReconnectPolicy { max_failures: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await;

        assert_eq!(transport.offsets_seen().await.len(), 3);
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn a_successful_poll_resets_the_failure_count() {
        let transport = Arc::new(ScriptedTransport::with_polls(vec![
            Err(TransportError::Request("blip".to_owned())),
            Ok(vec![update(50, 7, "/help")]),
            Err(TransportError::Request("blip".to_owned())),
        ]));
        let runner = LongPollRunner::new(
            transport.clone(),
            NoopBotCommandService,
            Duration::from_secs(1),
            ReconnectPolicy { max_failures: 1, base_delay_ms: 0, max_delay_ms: 0 },
        );

        let (_tx, rx) = watch::channel(false);
        runner.run(rx).await;

        // blip, success, blip, exhausted-script error: four polls total, and
        // the intermediate success kept the second blip from ending the run.
        assert_eq!(transport.offsets_seen().await.len(), 4);
        assert_eq!(transport.sent().await.len(), 1);
    }

    struct StalledTransport;

    #[async_trait]
    impl UpdateTransport for StalledTransport {
        async fn poll_updates(
            &self,
            _offset: Option<i64>,
            _timeout: Duration,
        ) -> Result<Vec<Update>, TransportError> {
            std::future::pending().await
        }

        async fn send_message(&self, _chat_id: i64, _text: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_an_in_flight_poll() {
        let runner = LongPollRunner::new(
            Arc::new(StalledTransport),
            NoopBotCommandService,
            Duration::from_secs(30),
            ReconnectPolicy::default(),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        tx.send(true).expect("signal shutdown");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("runner should stop on shutdown")
            .expect("runner task");
    }

    #[tokio::test]
    async fn noop_transport_idles_and_swallows_sends() {
        let transport = NoopUpdateTransport;
        let updates = transport
            .poll_updates(None, Duration::from_millis(5))
            .await
            .expect("noop poll");
        assert!(updates.is_empty());
        transport.send_message(7, "hello").await.expect("noop send");
    }

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let policy = ReconnectPolicy { max_failures: 5, base_delay_ms: 250, max_delay_ms: 5_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }
}
