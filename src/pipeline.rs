use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task;

use crate::config::{tracked_entities, AppConfig};
use crate::db::{Store, StoreError};
use crate::digest::Digest;
use crate::dispatch::{self, DispatchReport};
use crate::mailer::Mailer;
use crate::matching::matched_users;
use crate::models::{Entity, RawEvent, UserSubscription};
use crate::reconcile::{reconcile, Classification};
use crate::scraping::{self, EventSource};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("reconciler task failed: {0}")]
    Reconciler(String),
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub entities_checked: usize,
    pub entities_failed: usize,
    pub new_events: usize,
    pub resurfaced_events: usize,
    pub store_errors: usize,
    pub dispatch: DispatchReport,
}

enum FetchStatus {
    Done,
    Failed,
    Cancelled,
}

/// One full poll run: walk the tracked entities, reconcile every scraped
/// event against the store, aggregate digests, commit, dispatch.
///
/// Fetching is fanned out over a bounded pool of blocking workers; all store
/// mutations and digest appends happen on one dedicated task fed by a
/// channel, so no key and no digest ever has two writers. The store commit
/// happens before dispatch: a mail failure never rolls back event discovery,
/// and a cancelled run still commits what it decided.
pub async fn run(
    config: &AppConfig,
    source: Arc<dyn EventSource>,
    mailer: Arc<dyn Mailer>,
    store: Store,
    users: Vec<UserSubscription>,
    cancel: watch::Receiver<bool>,
) -> Result<RunReport, RunError> {
    let entities = tracked_entities(&users);
    tracing::info!("polling {} tracked entities", entities.len());

    let semaphore = Arc::new(Semaphore::new(config.fetch_concurrency.max(1)));
    let (tx, rx) = mpsc::channel::<RawEvent>(EVENT_CHANNEL_CAPACITY);

    let mut workers = Vec::with_capacity(entities.len());
    for entity in entities {
        workers.push(spawn_fetch_worker(
            entity,
            Arc::clone(&source),
            Arc::clone(&semaphore),
            tx.clone(),
            cancel.clone(),
        ));
    }
    drop(tx);

    let reconciler = spawn_reconciler(rx, store, Arc::clone(&source), users);

    let mut report = RunReport::default();
    for worker in workers {
        match worker.await {
            Ok(FetchStatus::Done) => report.entities_checked += 1,
            Ok(FetchStatus::Failed) => report.entities_failed += 1,
            Ok(FetchStatus::Cancelled) => {}
            Err(err) => {
                tracing::warn!("fetch worker died: {err}");
                report.entities_failed += 1;
            }
        }
    }

    let outcome = reconciler
        .await
        .map_err(|err| RunError::Reconciler(err.to_string()))?;
    report.new_events = outcome.new_events;
    report.resurfaced_events = outcome.resurfaced_events;
    report.store_errors = outcome.store_errors;

    outcome.store.commit()?;
    tracing::info!(
        "{} new and {} resurfaced events found at {}",
        report.new_events,
        report.resurfaced_events,
        Utc::now().to_rfc3339()
    );

    report.dispatch = dispatch::dispatch_all(mailer, outcome.digests, &cancel).await;
    Ok(report)
}

fn spawn_fetch_worker(
    entity: Entity,
    source: Arc<dyn EventSource>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<RawEvent>,
    cancel: watch::Receiver<bool>,
) -> task::JoinHandle<FetchStatus> {
    task::spawn(async move {
        let _permit = semaphore
            .acquire_owned()
            .await
            .expect("fetch semaphore closed");
        if *cancel.borrow() {
            return FetchStatus::Cancelled;
        }

        tracing::info!(
            "checking {} {}...",
            entity.kind.as_str(),
            entity.name.as_str()
        );
        let entity_name = entity.name.clone();
        let fetched = task::spawn_blocking(move || {
            scraping::fetch_events_with_retry(source.as_ref(), &entity)
        })
        .await;

        match fetched {
            Ok(Ok(events)) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                FetchStatus::Done
            }
            Ok(Err(err)) => {
                tracing::warn!(entity = entity_name.as_str(), "skipping entity: {err}");
                FetchStatus::Failed
            }
            Err(err) => {
                tracing::warn!(entity = entity_name.as_str(), "fetch task failed: {err}");
                FetchStatus::Failed
            }
        }
    })
}

struct ReconcileOutcome {
    store: Store,
    digests: Vec<Digest>,
    new_events: usize,
    resurfaced_events: usize,
    store_errors: usize,
}

/// The single writer: owns the store and every digest for the whole run.
fn spawn_reconciler(
    mut rx: mpsc::Receiver<RawEvent>,
    store: Store,
    source: Arc<dyn EventSource>,
    users: Vec<UserSubscription>,
) -> task::JoinHandle<ReconcileOutcome> {
    task::spawn_blocking(move || {
        let mut digests: HashMap<String, Digest> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut new_events = 0;
        let mut resurfaced_events = 0;
        let mut store_errors = 0;

        while let Some(event) = rx.blocking_recv() {
            if event.event_id.is_empty() {
                tracing::warn!("dropping event without an id: {}", event.name);
                continue;
            }

            let outcome = match reconcile(&store, &event, || {
                source.fetch_tickets(&event.event_url)
            }) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(
                        event_id = event.event_id.as_str(),
                        "skipping event after store failure: {err}"
                    );
                    store_errors += 1;
                    continue;
                }
            };

            match outcome.classification {
                Classification::New => new_events += 1,
                Classification::Resurfaced => resurfaced_events += 1,
                Classification::Suppressed => continue,
            }
            tracing::info!(
                event_id = event.event_id.as_str(),
                "notifying about {} ({:?})",
                event.name,
                outcome.classification
            );

            for user in matched_users(&event, &users) {
                let digest = digests.entry(user.email.clone()).or_insert_with(|| {
                    order.push(user.email.clone());
                    Digest::new(user.clone())
                });
                digest.push_event(&event, &outcome.tickets);
            }
        }

        let digests = order
            .into_iter()
            .filter_map(|email| digests.remove(&email))
            .collect();

        ReconcileOutcome {
            store,
            digests,
            new_events,
            resurfaced_events,
            store_errors,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::models::{EntityKind, Interest, TicketQuote};

    struct StubSource {
        events: Mutex<HashMap<String, Vec<RawEvent>>>,
        tickets: Mutex<HashMap<String, Vec<TicketQuote>>>,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                events: Mutex::new(HashMap::new()),
                tickets: Mutex::new(HashMap::new()),
            }
        }

        fn add_event(&self, entity_tag: &str, event: RawEvent) {
            self.events
                .lock()
                .expect("events mutex")
                .entry(entity_tag.to_string())
                .or_default()
                .push(event);
        }

        fn set_tickets(&self, event_url: &str, quotes: Vec<TicketQuote>) {
            self.tickets
                .lock()
                .expect("tickets mutex")
                .insert(event_url.to_string(), quotes);
        }
    }

    impl EventSource for StubSource {
        fn fetch_events(
            &self,
            entity: &Entity,
        ) -> Result<Vec<RawEvent>, scraping::FetchError> {
            Ok(self
                .events
                .lock()
                .expect("events mutex")
                .get(&entity.tag)
                .cloned()
                .unwrap_or_default())
        }

        fn fetch_tickets(&self, event_url: &str) -> Vec<TicketQuote> {
            self.tickets
                .lock()
                .expect("tickets mutex")
                .get(event_url)
                .cloned()
                .unwrap_or_default()
        }
    }

    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingMailer {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().expect("sent mutex").clone()
        }
    }

    impl Mailer for RecordingMailer {
        fn send(
            &self,
            recipient: &str,
            _subject: &str,
            body: &str,
        ) -> Result<(), crate::mailer::MailError> {
            self.sent
                .lock()
                .expect("sent mutex")
                .push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn warehouse_subscriber() -> UserSubscription {
        UserSubscription {
            name: "Ada".to_string(),
            nickname: "ada".to_string(),
            email: "ada@example.com".to_string(),
            venues: vec![Interest {
                name: "Warehouse".to_string(),
                tag: "123".to_string(),
            }],
            ..UserSubscription::default()
        }
    }

    fn warehouse_event(event_id: &str) -> RawEvent {
        RawEvent {
            name: "Opening Night".to_string(),
            date: "Fri, 12 Jun".to_string(),
            event_id: event_id.to_string(),
            event_url: format!("https://www.residentadvisor.net/events/{event_id}"),
            event_type: EntityKind::Venue,
            venue: "Warehouse".to_string(),
            lineup: "Residents".to_string(),
            artist: String::new(),
            promoter: String::new(),
        }
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn store_at(name: &str) -> (std::path::PathBuf, Store) {
        let path = std::env::temp_dir().join(format!(
            "ra-notify-test-{}-{name}.sqlite",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let store = Store::open(&path).expect("open store");
        (path, store)
    }

    #[tokio::test]
    async fn event_lifecycle_across_three_runs() {
        let (path, _) = store_at("lifecycle");
        let source = Arc::new(StubSource::new());
        source.add_event("123", warehouse_event("ev001"));
        let users = vec![warehouse_subscriber()];
        let config = AppConfig::default();

        // run 1: brand new event, no tickets yet
        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &config,
            Arc::clone(&source) as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Store::open(&path).expect("open store"),
            users.clone(),
            not_cancelled(),
        )
        .await
        .expect("run 1");

        assert_eq!(report.new_events, 1);
        assert_eq!(report.dispatch.sent, 1);
        let sent = mailer.sent();
        assert_eq!(sent[0].0, "ada@example.com");
        assert!(sent[0].1.contains("New event at <b>Warehouse</b>"));
        assert!(!sent[0].1.contains("Tickets currently on sale"));

        // run 2: tickets appeared, resurfaced exactly once
        source.set_tickets(
            "https://www.residentadvisor.net/events/ev001",
            vec![TicketQuote {
                label: "Early Bird".to_string(),
                price: "£10".to_string(),
            }],
        );
        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &config,
            Arc::clone(&source) as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Store::open(&path).expect("open store"),
            users.clone(),
            not_cancelled(),
        )
        .await
        .expect("run 2");

        assert_eq!(report.new_events, 0);
        assert_eq!(report.resurfaced_events, 1);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("<u>Early Bird</u>: £10"));

        // run 3: nothing changed, nothing sent
        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &config,
            Arc::clone(&source) as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Store::open(&path).expect("open store"),
            users,
            not_cancelled(),
        )
        .await
        .expect("run 3");

        assert_eq!(report.new_events + report.resurfaced_events, 0);
        assert_eq!(report.dispatch, DispatchReport::default());
        assert!(mailer.sent().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn duplicate_listing_items_notify_once() {
        let (path, store) = store_at("duplicate");
        let source = Arc::new(StubSource::new());
        // pagination overlap: the same event shows up twice on one page
        source.add_event("123", warehouse_event("ev010"));
        source.add_event("123", warehouse_event("ev010"));

        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &AppConfig::default(),
            source as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            store,
            vec![warehouse_subscriber()],
            not_cancelled(),
        )
        .await
        .expect("run");

        assert_eq!(report.new_events, 1);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.matches("New event at").count(), 1);

        let _ = std::fs::remove_file(&path);
    }

    struct RejectingMailer;

    impl Mailer for RejectingMailer {
        fn send(
            &self,
            _recipient: &str,
            _subject: &str,
            _body: &str,
        ) -> Result<(), crate::mailer::MailError> {
            Err(crate::mailer::MailError::Permanent("bad recipient".into()))
        }
    }

    #[tokio::test]
    async fn mail_failure_does_not_roll_back_the_commit() {
        let (path, _) = store_at("mail-failure");
        let source = Arc::new(StubSource::new());
        source.add_event("123", warehouse_event("ev011"));
        let users = vec![warehouse_subscriber()];
        let config = AppConfig::default();

        let report = run(
            &config,
            Arc::clone(&source) as Arc<dyn EventSource>,
            Arc::new(RejectingMailer) as Arc<dyn Mailer>,
            Store::open(&path).expect("open store"),
            users.clone(),
            not_cancelled(),
        )
        .await
        .expect("run survives the rejection");
        assert_eq!(report.new_events, 1);
        assert_eq!(report.dispatch.failed, 1);

        // the event was committed, so the next run stays quiet
        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &config,
            source as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Store::open(&path).expect("open store"),
            users,
            not_cancelled(),
        )
        .await
        .expect("second run");
        assert_eq!(report.new_events, 0);
        assert!(mailer.sent().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn user_without_matches_gets_no_mail() {
        let (path, store) = store_at("no-match");
        let source = Arc::new(StubSource::new());
        source.add_event("123", warehouse_event("ev002"));

        let mut stranger = warehouse_subscriber();
        stranger.email = "basho@example.com".to_string();
        stranger.venues = vec![Interest {
            name: "Tresor".to_string(),
            tag: "tresor".to_string(),
        }];
        // the walker still polls Warehouse via Ada's subscription
        let users = vec![warehouse_subscriber(), stranger];

        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &AppConfig::default(),
            source as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            store,
            users,
            not_cancelled(),
        )
        .await
        .expect("run");

        assert_eq!(report.new_events, 1);
        assert_eq!(report.dispatch.sent, 1);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn events_without_ids_are_dropped() {
        let (path, store) = store_at("no-id");
        let source = Arc::new(StubSource::new());
        let mut event = warehouse_event("ev003");
        event.event_id = String::new();
        source.add_event("123", event);

        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &AppConfig::default(),
            source as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            store,
            vec![warehouse_subscriber()],
            not_cancelled(),
        )
        .await
        .expect("run");

        assert_eq!(report.new_events, 0);
        assert!(mailer.sent().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn cancelled_run_fetches_and_sends_nothing() {
        let (path, store) = store_at("cancelled");
        let source = Arc::new(StubSource::new());
        source.add_event("123", warehouse_event("ev004"));

        let (_tx, cancelled) = watch::channel(true);
        let mailer = Arc::new(RecordingMailer::new());
        let report = run(
            &AppConfig::default(),
            source as Arc<dyn EventSource>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            store,
            vec![warehouse_subscriber()],
            cancelled,
        )
        .await
        .expect("run still commits");

        assert_eq!(report.new_events, 0);
        assert!(mailer.sent().is_empty());

        let _ = std::fs::remove_file(&path);
    }
}
