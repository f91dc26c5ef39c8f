//! Notification delivery: console, generic webhook, Slack webhook and Slack bot.

use crate::config::{SlackBotConfig, WatchConfig};
use crate::error::NotifyError;
use crate::types::{Event, EventKind, SectionChange, SectionStatus, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Slack Web API base URL.
const SLACK_API_BASE: &str = "https://slack.com/api";

/// Timeout for a single delivery request.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A destination for availability events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Delivers one event.
    async fn notify(&self, event: &Event) -> Result<(), NotifyError>;

    /// Reports the status of every section after a poll. Most notifiers ignore this.
    async fn notify_status(&self, _snapshot: &Snapshot) -> Result<(), NotifyError> {
        Ok(())
    }
}

fn status_label(status: Option<SectionStatus>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("-")
}

fn format_change(change: &SectionChange) -> String {
    format!(
        "{}: {} -> {}",
        change.id,
        status_label(change.previous),
        status_label(change.current)
    )
}

fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// One-line poll summary, e.g. `[2026-01-05 08:00:00] Lec 1: OPEN | Dis 1A: CLOSED`.
pub fn format_status_line(snapshot: &Snapshot) -> String {
    format!("[{}] {}", format_time(&snapshot.captured_at), snapshot.summary())
}

/// Slack `mrkdwn` text for an event.
pub fn format_slack_message(event: &Event, source_url: &str, ping_user_id: Option<&str>) -> String {
    let mut lines = vec![match event.kind {
        EventKind::BecameAvailable => "*CLASS AVAILABLE*".to_string(),
        EventKind::BecameUnavailable => "*Class no longer available*".to_string(),
    }];
    lines.extend(event.changes.iter().map(|c| format!("  {}", format_change(c))));
    lines.push(format!("  Time: {}", format_time(&event.timestamp)));
    lines.push(format!("  URL: <{source_url}|View SOC>"));

    with_ping(lines.join("\n"), ping_user_id)
}

/// Slack `mrkdwn` text for a per-poll status check.
pub fn format_slack_status(
    snapshot: &Snapshot,
    source_url: &str,
    ping_user_id: Option<&str>,
) -> String {
    let mut lines = vec!["*Status check*".to_string()];
    lines.extend(
        snapshot
            .sections()
            .iter()
            .map(|s| format!("  {}: {}", s.id, s.status)),
    );
    lines.push(format!("  Time: {}", format_time(&snapshot.captured_at)));
    lines.push(format!("  URL: <{source_url}|View SOC>"));

    with_ping(lines.join("\n"), ping_user_id)
}

fn with_ping(text: String, ping_user_id: Option<&str>) -> String {
    match ping_user_id {
        Some(user) => format!("<@{user}> {text}"),
        None => text,
    }
}

/// Prints events to stdout. The per-poll status line goes to stdout, or to the
/// log when `log_status` is set.
#[derive(Debug, Clone)]
pub struct ConsoleNotifier {
    source_url: String,
    log_status: bool,
}

impl ConsoleNotifier {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            log_status: false,
        }
    }

    /// Console notifier for `config`; verbose mode logs the status line.
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.url.as_str()).with_log_status(config.verbose)
    }

    pub fn with_log_status(mut self, log_status: bool) -> Self {
        self.log_status = log_status;
        self
    }

    pub fn logs_status(&self) -> bool {
        self.log_status
    }

    /// Text printed for an event.
    pub fn render(&self, event: &Event) -> String {
        let mut lines = vec![String::new()];
        match event.kind {
            EventKind::BecameAvailable => lines.push("CLASS AVAILABLE".to_string()),
            EventKind::BecameUnavailable => lines.push("Class no longer available".to_string()),
        }
        lines.extend(event.changes.iter().map(|c| format!("  {}", format_change(c))));
        lines.push(format!("  Time: {}", format_time(&event.timestamp)));
        lines.push(format!("  URL: {}", self.source_url));
        lines.join("\n")
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        println!("{}", self.render(event));
        Ok(())
    }

    async fn notify_status(&self, snapshot: &Snapshot) -> Result<(), NotifyError> {
        let line = format_status_line(snapshot);
        if self.log_status {
            info!("{line}");
        } else {
            println!("{line}");
        }
        Ok(())
    }
}

/// JSON body posted by [`WebhookNotifier`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub sections: Vec<SectionChange>,
}

impl WebhookPayload {
    pub fn new(event: &Event, source_url: &str) -> Self {
        Self {
            kind: event.kind,
            timestamp: event.timestamp,
            url: source_url.to_string(),
            sections: event.changes.clone(),
        }
    }
}

/// POSTs a JSON description of each event to an arbitrary URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
    source_url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, endpoint: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            source_url: source_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let payload = WebhookPayload::new(event, &self.source_url);
        post_json(&self.client, &self.endpoint, None, &payload, self.name()).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SlackText<'a> {
    text: &'a str,
}

/// Posts to a Slack Incoming Webhook.
#[derive(Debug, Clone)]
pub struct SlackWebhookNotifier {
    client: Client,
    webhook_url: String,
    source_url: String,
    status_every_poll: bool,
}

impl SlackWebhookNotifier {
    pub fn new(
        client: Client,
        webhook_url: impl Into<String>,
        source_url: impl Into<String>,
        status_every_poll: bool,
    ) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
            source_url: source_url.into(),
            status_every_poll,
        }
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    fn name(&self) -> &'static str {
        "slack-webhook"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let text = format_slack_message(event, &self.source_url, None);
        let body = SlackText { text: &text };
        post_json(&self.client, &self.webhook_url, None, &body, self.name()).await?;
        Ok(())
    }

    async fn notify_status(&self, snapshot: &Snapshot) -> Result<(), NotifyError> {
        if !self.status_every_poll {
            return Ok(());
        }
        let text = format_slack_status(snapshot, &self.source_url, None);
        let body = SlackText { text: &text };
        post_json(&self.client, &self.webhook_url, None, &body, self.name()).await?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct OpenConversation<'a> {
    users: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<SlackChannel>,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
}

/// Posts through the Slack Web API as a bot, to a channel or a direct message.
#[derive(Debug)]
pub struct SlackBotNotifier {
    client: Client,
    api_base: String,
    config: SlackBotConfig,
    source_url: String,
    status_every_poll: bool,
    /// DM channel opened via `conversations.open`, cached after first use
    dm_channel: Mutex<Option<String>>,
}

impl SlackBotNotifier {
    pub fn new(
        client: Client,
        config: SlackBotConfig,
        source_url: impl Into<String>,
        status_every_poll: bool,
    ) -> Self {
        Self::with_api_base(client, SLACK_API_BASE, config, source_url, status_every_poll)
    }

    /// Creates a notifier talking to a different Slack API root.
    pub fn with_api_base(
        client: Client,
        api_base: impl Into<String>,
        config: SlackBotConfig,
        source_url: impl Into<String>,
        status_every_poll: bool,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            config,
            source_url: source_url.into(),
            status_every_poll,
            dm_channel: Mutex::new(None),
        }
    }

    /// Channel to post into: the configured channel, else the (cached) DM channel.
    async fn channel(&self) -> Result<String, NotifyError> {
        if let Some(channel) = &self.config.channel {
            return Ok(channel.clone());
        }

        let mut cached = self.dm_channel.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let response = self
            .call(
                "conversations.open",
                &OpenConversation {
                    users: [self.config.user_id.as_str()],
                },
            )
            .await?;
        let id = response
            .channel
            .map(|c| c.id)
            .ok_or_else(|| NotifyError::SlackApi {
                notifier: self.name(),
                error: "conversations.open returned no channel".to_string(),
            })?;

        debug!(channel = %id, "Opened Slack DM channel");
        *cached = Some(id.clone());
        Ok(id)
    }

    async fn call<T: Serialize + Sync>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<SlackResponse, NotifyError> {
        let url = format!("{}/{}", self.api_base, method);
        let bearer = format!("Bearer {}", self.config.token);
        let response = post_json(&self.client, &url, Some(&bearer), body, self.name()).await?;

        let parsed: SlackResponse = response.json().await.map_err(|e| NotifyError::Network {
            notifier: self.name(),
            message: e.to_string(),
        })?;

        if !parsed.ok {
            return Err(NotifyError::SlackApi {
                notifier: self.name(),
                error: parsed.error.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        Ok(parsed)
    }

    async fn post_text(&self, text: &str) -> Result<(), NotifyError> {
        let channel = self.channel().await?;
        self.call("chat.postMessage", &PostMessage { channel: &channel, text })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackBotNotifier {
    fn name(&self) -> &'static str {
        "slack-bot"
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let ping = Some(self.config.user_id.as_str());
        let text = format_slack_message(event, &self.source_url, ping);
        self.post_text(&text).await
    }

    async fn notify_status(&self, snapshot: &Snapshot) -> Result<(), NotifyError> {
        if !self.status_every_poll {
            return Ok(());
        }
        let ping = Some(self.config.user_id.as_str());
        let text = format_slack_status(snapshot, &self.source_url, ping);
        self.post_text(&text).await
    }
}

async fn post_json<T: Serialize + ?Sized + Sync>(
    client: &Client,
    url: &str,
    authorization: Option<&str>,
    body: &T,
    notifier: &'static str,
) -> Result<reqwest::Response, NotifyError> {
    let mut request = client.post(url).timeout(DELIVERY_TIMEOUT).json(body);
    if let Some(value) = authorization {
        request = request.header(AUTHORIZATION, value);
    }

    let response = request.send().await.map_err(|e| NotifyError::Network {
        notifier,
        message: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(NotifyError::Status {
            notifier,
            status: response.status().as_u16(),
        });
    }

    Ok(response)
}

/// Every configured notifier, delivered to in order.
pub struct Notifiers {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Console output plus whatever webhooks and Slack targets are configured.
    pub fn from_config(config: &WatchConfig, client: &Client) -> Self {
        let source_url = config.url.to_string();
        let mut notifiers: Vec<Box<dyn Notifier>> =
            vec![Box::new(ConsoleNotifier::from_config(config))];

        if let Some(endpoint) = &config.webhook_url {
            notifiers.push(Box::new(WebhookNotifier::new(
                client.clone(),
                endpoint.as_str(),
                &source_url,
            )));
        }
        if let Some(webhook) = &config.slack_webhook_url {
            notifiers.push(Box::new(SlackWebhookNotifier::new(
                client.clone(),
                webhook.as_str(),
                &source_url,
                config.slack_status_every_poll,
            )));
        }
        if let Some(bot) = &config.slack_bot {
            notifiers.push(Box::new(SlackBotNotifier::new(
                client.clone(),
                bot.clone(),
                &source_url,
                config.slack_status_every_poll,
            )));
        }

        info!(
            notifiers = ?notifiers.iter().map(|n| n.name()).collect::<Vec<_>>(),
            "Configured notifiers"
        );
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Sends every event to every notifier. Returns the number of failed deliveries.
    pub async fn dispatch(&self, events: &[Event]) -> usize {
        let mut failures = 0;
        for event in events {
            for notifier in &self.notifiers {
                if let Err(e) = notifier.notify(event).await {
                    error!(
                        notifier = notifier.name(),
                        kind = %event.kind,
                        error = %e,
                        "Notification failed"
                    );
                    failures += 1;
                }
            }
        }
        failures
    }

    /// Sends the post-poll status to every notifier. Returns the number of failures.
    pub async fn status(&self, snapshot: &Snapshot) -> usize {
        let mut failures = 0;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_status(snapshot).await {
                error!(notifier = notifier.name(), error = %e, "Status notification failed");
                failures += 1;
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Section;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SOURCE: &str = "https://sa.ucla.edu/ro/public/soc/Results";

    fn event() -> Event {
        Event {
            kind: EventKind::BecameAvailable,
            timestamp: DateTime::parse_from_rfc3339("2026-01-05T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            changes: vec![SectionChange {
                id: "Lec 1".to_string(),
                previous: Some(SectionStatus::Closed),
                current: Some(SectionStatus::Open),
            }],
        }
    }

    fn bot_config(channel: Option<&str>) -> SlackBotConfig {
        SlackBotConfig {
            token: "xoxb-test".to_string(),
            user_id: "U0123".to_string(),
            channel: channel.map(str::to_string),
        }
    }

    #[test]
    fn test_slack_message_format() {
        let text = format_slack_message(&event(), SOURCE, Some("U0123"));

        assert!(text.starts_with("<@U0123> *CLASS AVAILABLE*"));
        assert!(text.contains("Lec 1: CLOSED -> OPEN"));
        assert!(text.contains("Time: 2026-01-05 08:00:00"));
        assert!(text.contains(&format!("<{SOURCE}|View SOC>")));
    }

    #[test]
    fn test_status_line() {
        let snapshot = Snapshot::new(
            event().timestamp,
            vec![
                Section::new("Lec 1", SectionStatus::Open),
                Section::new("Dis 1A", SectionStatus::Closed),
            ],
        );
        assert_eq!(
            format_status_line(&snapshot),
            "[2026-01-05 08:00:00] Lec 1: OPEN | Dis 1A: CLOSED"
        );
    }

    #[test]
    fn test_webhook_payload_shape() {
        let payload = serde_json::to_value(WebhookPayload::new(&event(), SOURCE)).unwrap();

        assert_eq!(payload["kind"], "BECAME_AVAILABLE");
        assert_eq!(payload["url"], SOURCE);
        assert_eq!(payload["sections"][0]["id"], "Lec 1");
        assert_eq!(payload["sections"][0]["previous"], "CLOSED");
        assert_eq!(payload["sections"][0]["current"], "OPEN");
    }

    #[tokio::test]
    async fn test_webhook_posts_payload() {
        let server = MockServer::start().await;
        let expected = serde_json::to_value(WebhookPayload::new(&event(), SOURCE)).unwrap();
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            WebhookNotifier::new(Client::new(), format!("{}/hook", server.uri()), SOURCE);
        notifier.notify(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Client::new(), server.uri(), SOURCE);
        let err = notifier.notify(&event()).await.unwrap_err();

        assert!(matches!(err, NotifyError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_slack_bot_opens_dm_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations.open"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "channel": {"id": "D999"}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_string_contains("D999"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = SlackBotNotifier::with_api_base(
            Client::new(),
            server.uri(),
            bot_config(None),
            SOURCE,
            false,
        );
        notifier.notify(&event()).await.unwrap();
        notifier.notify(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_slack_bot_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": false, "error": "channel_not_found"})),
            )
            .mount(&server)
            .await;

        let notifier = SlackBotNotifier::with_api_base(
            Client::new(),
            server.uri(),
            bot_config(Some("#classes")),
            SOURCE,
            false,
        );
        let err = notifier.notify(&event()).await.unwrap_err();

        assert!(matches!(
            err,
            NotifyError::SlackApi { ref error, .. } if error == "channel_not_found"
        ));
    }

    #[tokio::test]
    async fn test_slack_status_only_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = Snapshot::new(
            event().timestamp,
            vec![Section::new("Lec 1", SectionStatus::Open)],
        );
        let quiet = SlackWebhookNotifier::new(Client::new(), server.uri(), SOURCE, false);
        let chatty = SlackWebhookNotifier::new(Client::new(), server.uri(), SOURCE, true);

        quiet.notify_status(&snapshot).await.unwrap();
        chatty.notify_status(&snapshot).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_continues_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifiers = Notifiers::new(vec![
            Box::new(WebhookNotifier::new(Client::new(), server.uri(), SOURCE)),
            Box::new(ConsoleNotifier::new(SOURCE)),
        ]);

        assert_eq!(notifiers.dispatch(&[event()]).await, 1);
    }

    #[tokio::test]
    async fn test_console_status_follows_verbose() {
        let mut config = WatchConfig::new(url::Url::parse(SOURCE).unwrap());
        assert!(!ConsoleNotifier::from_config(&config).logs_status());

        config.verbose = true;
        let console = ConsoleNotifier::from_config(&config);
        assert!(console.logs_status());

        let snapshot = Snapshot::new(
            event().timestamp,
            vec![Section::new("Lec 1", SectionStatus::Open)],
        );
        assert!(console.notify_status(&snapshot).await.is_ok());
    }
}
