//! Poll loop: fetch -> parse -> detect -> notify -> persist -> sleep.

use crate::config::WatchConfig;
use crate::detector::Detector;
use crate::error::WatchError;
use crate::fetcher::SocClient;
use crate::notifier::Notifiers;
use crate::parser;
use crate::state::StateStore;
use crate::types::{Event, Snapshot};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Installs the Ctrl-C handler right away and returns a stop future for [`Watcher::run`].
///
/// Must be called from within a Tokio runtime.
pub fn ctrl_c_stop() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
    stop_when_sent(rx)
}

/// Resolves once `rx` receives. A dropped sender never stops the loop.
pub async fn stop_when_sent(rx: oneshot::Receiver<()>) {
    if rx.await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// What a successful poll produced.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub events: Vec<Event>,
    pub sections: usize,
    pub failed_notifications: usize,
}

/// Drives polls for one page, holding the last good snapshot between them.
pub struct Watcher {
    url: String,
    interval: Duration,
    client: SocClient,
    detector: Detector,
    store: StateStore,
    notifiers: Notifiers,
    last: Option<Snapshot>,
}

impl Watcher {
    /// Builds a watcher from configuration and loads the persisted last snapshot.
    pub async fn from_config(config: &WatchConfig) -> Result<Self, WatchError> {
        let client = SocClient::new()?;
        let notifiers = Notifiers::from_config(config, client.http());
        let store = StateStore::new(&config.state_path);

        Ok(Self::new(
            config.url.to_string(),
            config.interval,
            client,
            Detector::new(config.rule.clone()),
            store,
            notifiers,
        )
        .await)
    }

    /// Assembles a watcher from parts and loads the persisted last snapshot.
    pub async fn new(
        url: String,
        interval: Duration,
        client: SocClient,
        detector: Detector,
        store: StateStore,
        notifiers: Notifiers,
    ) -> Self {
        let last = store.load().await;
        info!(
            url = %url,
            rule = %detector.rule(),
            interval_secs = interval.as_secs(),
            has_previous = last.is_some(),
            "Watcher ready"
        );

        Self {
            url,
            interval,
            client,
            detector,
            store,
            notifiers,
            last,
        }
    }

    /// Last good snapshot, if any.
    pub fn last(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Runs one poll cycle.
    ///
    /// On a fetch or parse failure the previous snapshot is kept, nothing is
    /// persisted and no events are emitted. Notification failures are logged and
    /// do not prevent the new snapshot from being saved.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, WatchError> {
        let start = Instant::now();

        let html = self.client.fetch_html(&self.url).await.map_err(|e| {
            warn!(url = %self.url, error = %e, "Fetch failed; will retry next poll");
            e
        })?;

        let snapshot = parser::parse(&html).map_err(|e| {
            error!(error = %e, "Parse failed; keeping last good state");
            e
        })?;
        let sections = snapshot.len();

        let observation = self.detector.observe(self.last.take(), snapshot);
        let current = observation.last;

        let mut failed_notifications = self.notifiers.dispatch(&observation.events).await;
        failed_notifications += self.notifiers.status(&current).await;

        let saved = self.store.save(&current).await;
        self.last = Some(current);
        if let Err(e) = saved {
            error!(path = %self.store.path().display(), error = %e, "Failed to persist state");
            return Err(e.into());
        }

        debug!(
            sections,
            events = observation.events.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Poll complete"
        );

        Ok(PollOutcome {
            events: observation.events,
            sections,
            failed_notifications,
        })
    }

    /// Polls until `stop` resolves. The stop signal is honoured between polls and
    /// interrupts the sleep; a poll in progress always finishes.
    pub async fn run<F>(&mut self, stop: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);

        loop {
            if let Err(e) = self.poll_once().await {
                debug!(recoverable = e.is_recoverable(), "Poll did not complete");
            }

            tokio::select! {
                _ = &mut stop => {
                    info!("Stop requested; exiting poll loop");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{Notifier, WebhookNotifier};
    use crate::rules::AvailabilityRule;
    use crate::types::{EventKind, SectionStatus};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLOSED_PAGE: &str = r#"
        <table>
          <tr><td>Lec 1</td><td>Closed</td></tr>
          <tr><td>Dis 1A</td><td>Closed</td></tr>
        </table>
    "#;

    const OPEN_PAGE: &str = r#"
        <table>
          <tr><td>Lec 1</td><td>Open</td></tr>
          <tr><td>Dis 1A</td><td>Closed</td></tr>
        </table>
    "#;

    async fn watcher(
        server: &MockServer,
        state: &std::path::Path,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> Watcher {
        Watcher::new(
            format!("{}/soc", server.uri()),
            Duration::from_millis(10),
            SocClient::new().unwrap(),
            Detector::new(AvailabilityRule::any_open()),
            StateStore::new(state),
            Notifiers::new(notifiers),
        )
        .await
    }

    async fn serve(server: &MockServer, body: &str) {
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/soc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_poll_detects_opening_and_persists() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        let mut watcher = watcher(&server, &state, Vec::new()).await;

        serve(&server, CLOSED_PAGE).await;
        let outcome = watcher.poll_once().await.unwrap();
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.sections, 2);

        serve(&server, OPEN_PAGE).await;
        let outcome = watcher.poll_once().await.unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, EventKind::BecameAvailable);

        let persisted = StateStore::new(&state).load().await.unwrap();
        assert_eq!(persisted.status_of("Lec 1"), Some(SectionStatus::Open));
    }

    #[tokio::test]
    async fn test_state_bridges_restarts() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        serve(&server, OPEN_PAGE).await;

        let mut first = watcher(&server, &state, Vec::new()).await;
        assert_eq!(first.poll_once().await.unwrap().events.len(), 1);

        let mut restarted = watcher(&server, &state, Vec::new()).await;
        assert!(restarted.last().is_some());
        assert!(restarted.poll_once().await.unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_state() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        let mut watcher = watcher(&server, &state, Vec::new()).await;

        serve(&server, OPEN_PAGE).await;
        watcher.poll_once().await.unwrap();

        serve(&server, "<html><body>Temporarily unavailable</body></html>").await;
        let err = watcher.poll_once().await.unwrap_err();
        assert!(matches!(err, WatchError::Parse(_)));
        assert_eq!(watcher.last().unwrap().status_of("Lec 1"), Some(SectionStatus::Open));

        serve(&server, OPEN_PAGE).await;
        assert!(watcher.poll_once().await.unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recoverable() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        let mut watcher = watcher(&server, &state, Vec::new()).await;

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = watcher.poll_once().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(!state.exists());
    }

    #[tokio::test]
    async fn test_notification_failure_still_persists() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/soc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(OPEN_PAGE))
            .mount(&server)
            .await;

        let hook = WebhookNotifier::new(
            reqwest::Client::new(),
            format!("{}/hook", server.uri()),
            server.uri(),
        );
        let mut watcher = watcher(&server, &state, vec![Box::new(hook)]).await;

        let outcome = watcher.poll_once().await.unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.failed_notifications, 1);
        assert!(state.exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, CLOSED_PAGE).await;
        let mut watcher = watcher(&server, &dir.path().join("last.json"), Vec::new()).await;

        tokio::time::timeout(Duration::from_secs(5), watcher.run(async {}))
            .await
            .unwrap();
        assert!(watcher.last().is_some());
    }

    #[tokio::test]
    async fn test_stop_sent_before_first_poll_finishes_it() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last.json");
        serve(&server, OPEN_PAGE).await;
        let mut watcher = watcher(&server, &state, Vec::new()).await;

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), watcher.run(stop_when_sent(rx)))
            .await
            .unwrap();
        assert!(state.exists());
        assert_eq!(watcher.last().unwrap().status_of("Lec 1"), Some(SectionStatus::Open));
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_stop() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_millis(50), stop_when_sent(rx)).await;
        assert!(waited.is_err());
    }
}
