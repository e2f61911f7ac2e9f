//! Integration tests for batch sequencing.
//!
//! These drive a real `Sequencer` against in-memory `SQLite` repositories,
//! a temporary marker directory and a scripted mailer.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use tempfile::TempDir;

use funnelmail_core::{
    Advance, DedupKey, Delivery, DueSubscribers, DuplicateGuard, Error, Mailer, MailerError,
    MarkerDirectory, OutgoingMessage, SentRecord, SentRecordRepository, SentStore, Sequencer,
    SequencerOptions, Subscriber, SubscriberRepository, SubscriberStore, TemplateSet,
};

/// Mailer that records every message and fails on chosen call numbers.
#[derive(Default)]
struct ScriptedMailer {
    sent: Mutex<Vec<OutgoingMessage>>,
    fail_on: HashSet<usize>,
}

impl ScriptedMailer {
    fn failing_on(calls: &[usize]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_on: calls.iter().copied().collect(),
        }
    }

    fn calls(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn send(&self, message: &OutgoingMessage) -> Result<Delivery, MailerError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        let call = sent.len();
        if self.fail_on.contains(&call) {
            Err(MailerError::Send(format!("421 try again later (call {call})")))
        } else {
            Ok(Delivery::new(format!("msg-{call}")))
        }
    }
}

/// Store whose fetch always fails.
struct UnreachableStore;

#[async_trait]
impl SubscriberStore for UnreachableStore {
    async fn fetch_due(&self, _now: DateTime<Utc>) -> funnelmail_core::Result<DueSubscribers> {
        Err(Error::Io(std::io::Error::other("connection refused")))
    }

    async fn get(&self, _email: &str) -> funnelmail_core::Result<Option<Subscriber>> {
        Ok(None)
    }

    async fn advance(&self, _update: &Advance) -> funnelmail_core::Result<bool> {
        Ok(false)
    }
}

struct Harness {
    _dir: TempDir,
    repo: SubscriberRepository,
    shared: SentRecordRepository,
    local: Arc<MarkerDirectory>,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = SubscriberRepository::in_memory().await.unwrap();
        let shared = SentRecordRepository::from_pool(repo.pool()).await.unwrap();
        let local = Arc::new(MarkerDirectory::new(dir.path().join("SENT")));
        Self {
            _dir: dir,
            repo,
            shared,
            local,
        }
    }

    fn guard(&self) -> DuplicateGuard {
        DuplicateGuard::new(self.local.clone(), Arc::new(self.shared.clone()))
    }

    fn sequencer(&self, templates: TemplateSet, mailer: Arc<ScriptedMailer>) -> Sequencer {
        self.sequencer_with(templates, mailer, options())
    }

    fn sequencer_with(
        &self,
        templates: TemplateSet,
        mailer: Arc<ScriptedMailer>,
        options: SequencerOptions,
    ) -> Sequencer {
        Sequencer::new(
            Arc::new(self.repo.clone()),
            Arc::new(templates),
            mailer,
            self.guard(),
            options,
        )
    }

    async fn add(&self, email: &str, index: u32, next: Option<DateTime<Utc>>) -> Subscriber {
        let mut sub = Subscriber::new(email.split('@').next().unwrap(), email, tuesday());
        sub.sequence_index = index;
        sub.welcome_sent = index > 0;
        sub.next_send_time = next;
        self.repo.upsert(&sub).await.unwrap();
        self.get(email).await
    }

    async fn get(&self, email: &str) -> Subscriber {
        self.repo.get(email).await.unwrap().unwrap()
    }
}

fn options() -> SequencerOptions {
    SequencerOptions {
        from: "Team <team@x.com>".into(),
        send_time: NaiveTime::from_hms_opt(9, 0, 0),
        ..SequencerOptions::default()
    }
}

fn templates() -> TemplateSet {
    TemplateSet::new("Hi ${name},", "-- Team")
        .with_message("Welcome", "First message")
        .with_message("Getting started", "Second message")
        .with_named("launch", "Launch day, ${name}", "We are live")
}

/// 2026-10-13 10:00 UTC, a Tuesday.
fn tuesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 13, 10, 0, 0).unwrap()
}

/// 2026-10-16 10:00 UTC, a Friday.
fn friday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()
}

#[tokio::test]
async fn first_email_on_tuesday_schedules_wednesday() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.processed(), 1);

    let calls = mailer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].to, "a@x.com");
    assert_eq!(calls[0].from, "Team <team@x.com>");
    assert_eq!(calls[0].subject, "Welcome");
    assert_eq!(calls[0].body, "Hi a,\n\nFirst message\n\n-- Team");

    let sub = h.get("a@x.com").await;
    assert_eq!(sub.sequence_index, 1);
    assert!(sub.welcome_sent);
    assert_eq!(
        sub.next_send_time,
        Some(Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn friday_send_schedules_monday() {
    let h = Harness::new().await;
    h.add("a@x.com", 1, None).await;
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(friday())
        .await
        .unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(mailer.calls()[0].subject, "Getting started");

    let sub = h.get("a@x.com").await;
    assert_eq!(sub.sequence_index, 2);
    let next = sub.next_send_time.unwrap();
    assert_eq!(next.weekday(), Weekday::Mon);
    assert_eq!(next, Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn second_run_at_same_time_sends_nothing() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    h.add("b@x.com", 0, Some(tuesday())).await;
    let mailer = Arc::new(ScriptedMailer::default());
    let sequencer = h.sequencer(templates(), mailer.clone());

    let first = sequencer.run_batch(tuesday()).await.unwrap();
    let second = sequencer.run_batch(tuesday()).await.unwrap();

    assert_eq!(first.sent, 2);
    assert_eq!(second.processed(), 0);
    assert_eq!(mailer.calls().len(), 2);
}

#[tokio::test]
async fn lost_progress_is_caught_by_duplicate_guard() {
    let h = Harness::new().await;
    let original = h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::default());
    let sequencer = h.sequencer(templates(), mailer.clone());

    sequencer.run_batch(tuesday()).await.unwrap();

    // Simulate a crash between send and state update.
    h.repo.upsert(&original).await.unwrap();

    let summary = sequencer.run_batch(tuesday()).await.unwrap();
    assert_eq!(summary.skipped_duplicate, 1);
    assert_eq!(summary.sent, 0);
    assert_eq!(mailer.calls().len(), 1);
    assert_eq!(h.get("a@x.com").await, original);
}

#[tokio::test]
async fn completed_subscriber_is_never_touched() {
    let h = Harness::new().await;
    let before = h.add("done@x.com", 2, None).await;
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.skipped_complete, 1);
    assert!(mailer.calls().is_empty());
    assert_eq!(h.get("done@x.com").await, before);
}

#[tokio::test]
async fn mailer_failure_is_isolated() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    let b_before = h.add("b@x.com", 1, None).await;
    h.add("c@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::failing_on(&[2]));

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].email, "b@x.com");
    assert!(summary.failures[0].detail.contains("421"));

    assert_eq!(h.get("a@x.com").await.sequence_index, 1);
    assert_eq!(h.get("c@x.com").await.sequence_index, 1);
    assert_eq!(h.get("b@x.com").await, b_before);

    // The failed subscriber is still due and goes out on the next run.
    let retry = h
        .sequencer(templates(), Arc::new(ScriptedMailer::default()))
        .run_batch(tuesday())
        .await
        .unwrap();
    assert_eq!(retry.sent, 1);
    assert_eq!(h.get("b@x.com").await.sequence_index, 2);
}

#[tokio::test]
async fn prerecorded_send_is_skipped_without_calling_mailer() {
    let h = Harness::new().await;
    let before = h.add("a@x.com", 0, None).await;
    h.shared
        .insert(&SentRecord::new("a@x.com", "Welcome", "old-id", tuesday()))
        .await
        .unwrap();
    let mailer = Arc::new(ScriptedMailer::default());
    let sequencer = h.sequencer(templates(), mailer.clone());

    for _ in 0..2 {
        let summary = sequencer.run_batch(tuesday()).await.unwrap();
        assert_eq!(summary.skipped_duplicate, 1);
    }

    assert!(mailer.calls().is_empty());
    assert_eq!(h.get("a@x.com").await, before);
}

#[tokio::test]
async fn missing_template_is_a_warning() {
    let h = Harness::new().await;
    let before = h.add("a@x.com", 0, None).await;
    let set = TemplateSet::new("", "").with_gap().with_message("Two", "Body");
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(set, mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.skipped_missing_template, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.warnings.len(), 1);
    assert!(mailer.calls().is_empty());
    assert_eq!(h.get("a@x.com").await, before);
}

#[tokio::test]
async fn malformed_record_is_skipped() {
    let h = Harness::new().await;
    let mut broken = Subscriber::new("Broken", "broken", tuesday());
    broken.next_send_time = None;
    h.repo.upsert(&broken).await.unwrap();
    h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.skipped_malformed, 1);
    assert_eq!(summary.sent, 1);
    assert_eq!(h.get("broken").await.sequence_index, 0);
}

#[tokio::test]
async fn transient_failure_is_retried_within_batch() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::failing_on(&[1]));
    let options = SequencerOptions {
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
        ..options()
    };

    let summary = h
        .sequencer_with(templates(), mailer.clone(), options)
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(mailer.calls().len(), 2);
    assert_eq!(h.get("a@x.com").await.sequence_index, 1);
}

#[tokio::test]
async fn exhausted_retries_report_failure() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::failing_on(&[1, 2]));
    let options = SequencerOptions {
        max_attempts: 2,
        ..options()
    };

    let summary = h
        .sequencer_with(templates(), mailer.clone(), options)
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(mailer.calls().len(), 2);
    assert_eq!(h.get("a@x.com").await.sequence_index, 0);
}

#[tokio::test]
async fn personalized_subjects_are_deduplicated_separately() {
    let h = Harness::new().await;
    h.add("ada@x.com", 0, None).await;
    h.add("bob@x.com", 0, None).await;
    let set = TemplateSet::new("", "").with_message("Welcome ${name}", "Body");
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(set, mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.sent, 2);
    let subjects: Vec<String> = mailer.calls().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["Welcome ada", "Welcome bob"]);
}

#[tokio::test]
async fn stop_signal_ends_batch_before_next_subscriber() {
    let h = Harness::new().await;
    let before = h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::default());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let sequencer = h.sequencer(templates(), mailer.clone()).with_stop_signal(rx);

    tx.send(true).unwrap();
    let summary = sequencer.run_batch(tuesday()).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.processed(), 0);
    assert!(mailer.calls().is_empty());
    assert_eq!(h.get("a@x.com").await, before);
}

#[tokio::test]
async fn store_failure_fails_the_batch() {
    let h = Harness::new().await;
    let mailer = Arc::new(ScriptedMailer::default());
    let sequencer = Sequencer::new(
        Arc::new(UnreachableStore),
        Arc::new(templates()),
        mailer.clone(),
        h.guard(),
        options(),
    );

    assert!(sequencer.run_batch(tuesday()).await.is_err());
    assert!(mailer.calls().is_empty());
}

#[tokio::test]
async fn sent_markers_are_written_locally() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;

    h.sequencer(templates(), Arc::new(ScriptedMailer::default()))
        .run_batch(tuesday())
        .await
        .unwrap();

    let key = DedupKey::derive("a@x.com", "Welcome");
    assert!(h.local.contains(&key).await.unwrap());
    let record = h.shared.get(&key).await.unwrap().unwrap();
    assert_eq!(record.message_id, "msg-1");
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let h = Harness::new().await;
    let before = h.add("a@x.com", 0, None).await;
    let mailer = Arc::new(ScriptedMailer::default());
    let dry = SequencerOptions {
        dry_run: true,
        ..options()
    };

    let summary = h
        .sequencer_with(templates(), mailer.clone(), dry)
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.would_send, 1);
    assert_eq!(summary.sent, 0);
    assert!(mailer.calls().is_empty());
    assert_eq!(h.get("a@x.com").await, before);

    let key = DedupKey::derive("a@x.com", "Welcome");
    assert!(!h.local.contains(&key).await.unwrap());
    assert!(!h.shared.contains(&key).await.unwrap());

    // A real run afterwards is not mistaken for a duplicate.
    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(h.get("a@x.com").await.sequence_index, 1);
}

#[tokio::test]
async fn unreadable_rows_count_as_malformed() {
    let h = Harness::new().await;
    h.add("a@x.com", 0, None).await;
    sqlx::query(
        "INSERT INTO subscribers (email, joined_at, next_send_time) \
         VALUES ('bad@x.com', 'last week', NULL)",
    )
    .execute(&h.repo.pool())
    .await
    .unwrap();
    let mailer = Arc::new(ScriptedMailer::default());

    let summary = h
        .sequencer(templates(), mailer.clone())
        .run_batch(tuesday())
        .await
        .unwrap();

    assert_eq!(summary.sent, 1);
    assert_eq!(summary.skipped_malformed, 1);
    assert!(summary.warnings.iter().any(|w| w.email == "bad@x.com"));
}

#[tokio::test]
async fn named_template_goes_out_once_per_recipient() {
    let h = Harness::new().await;
    let before = h.add("ada@x.com", 1, None).await;
    let mailer = Arc::new(ScriptedMailer::default());
    let sequencer = h.sequencer(templates(), mailer.clone());
    let recipients = vec![
        "ada@x.com".to_string(),
        "new@x.com".to_string(),
        " ADA@x.com ".to_string(),
        "nobody".to_string(),
    ];

    let first = sequencer
        .send_named("launch", &recipients, tuesday())
        .await
        .unwrap();
    assert_eq!(first.sent, 2);
    assert_eq!(first.skipped_malformed, 1);

    let subjects: Vec<String> = mailer.calls().into_iter().map(|m| m.subject).collect();
    assert_eq!(subjects, vec!["Launch day, ada", "Launch day, "]);

    let second = sequencer
        .send_named("launch", &recipients, tuesday())
        .await
        .unwrap();
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped_duplicate, 2);
    assert_eq!(mailer.calls().len(), 2);

    assert_eq!(h.get("ada@x.com").await, before);
}

#[tokio::test]
async fn unknown_named_template_is_an_error() {
    let h = Harness::new().await;
    let mailer = Arc::new(ScriptedMailer::default());

    let result = h
        .sequencer(templates(), mailer.clone())
        .send_named("nope", &["a@x.com".to_string()], tuesday())
        .await;

    assert!(matches!(result, Err(Error::Template(_))));
    assert!(mailer.calls().is_empty());
}
