//! Component tests for the processing cache, the delivery path, and the
//! scheduler, over the in-memory store with scripted channel/extractor
//! doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use excerpt_courier::cache::{DocumentSource, ProcessingCache};
use excerpt_courier::config::{ProcessingConfig, SchedulerConfig, SegmentingConfig};
use excerpt_courier::deliver::{DeliverError, Delivered, Deliverer, RetryPolicy};
use excerpt_courier::error::{DeliveryError, ExtractionError};
use excerpt_courier::extract::{SourceLocator, TextExtractor};
use excerpt_courier::format::DeliveryMeta;
use excerpt_courier::models::{
    Document, Excerpt, Frequency, ProcessingState, ProgressStatus, Schedule, SourceFormat, User,
};
use excerpt_courier::notify::Notifier;
use excerpt_courier::scheduler::DeliveryScheduler;
use excerpt_courier::store::{memory::MemoryStore, AdvanceOutcome, Store};

// ── doubles ──────────────────────────────────────────────────────────────

/// Counts extraction runs; optionally dawdles to widen race windows.
struct CountingExtractor {
    calls: AtomicUsize,
    text: String,
    delay: Duration,
}

impl CountingExtractor {
    fn new(text: &str, delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            text: text.to_string(),
            delay,
        }
    }
}

impl TextExtractor for CountingExtractor {
    fn extract(&self, _locator: &SourceLocator) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(self.text.clone())
    }
}

/// Always fails extraction, counting the attempts.
struct FailingExtractor {
    calls: AtomicUsize,
}

impl TextExtractor for FailingExtractor {
    fn extract(&self, _locator: &SourceLocator) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractionError::NoText)
    }
}

/// Records every sent message; fails the first `fail_first` sends with a
/// transient error.
struct ScriptedNotifier {
    fail_first: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl ScriptedNotifier {
    fn new(fail_first: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(fail_first),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for ScriptedNotifier {
    async fn send_formatted(
        &self,
        _user_id: i64,
        text: &str,
        _meta: &DeliveryMeta,
    ) -> Result<(), DeliveryError> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeliveryError::Transient("channel unreachable".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ── fixtures ─────────────────────────────────────────────────────────────

fn segmenting() -> SegmentingConfig {
    SegmentingConfig {
        target_chars: 800,
        hard_cap_chars: 3500,
    }
}

fn processing() -> ProcessingConfig {
    ProcessingConfig {
        timeout_secs: 10,
        max_file_size_mb: 100,
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

fn source(identity_tag: &str) -> DocumentSource {
    DocumentSource {
        identity: format!("{identity_tag:0>64}"),
        display_name: "fixture".to_string(),
        author: None,
        size_bytes: 1024,
        format: SourceFormat::Pdf,
        locator: SourceLocator {
            path: "/nonexistent/fixture.pdf".into(),
            format: SourceFormat::Pdf,
        },
    }
}

/// Ten paragraphs, each long enough that the segmenter closes one excerpt
/// per paragraph junction.
fn ten_paragraph_text() -> String {
    (0..10)
        .map(|i| {
            (0..18)
                .map(|j| format!("Paragraph {i} sentence {j} fills out the running text."))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn seed_ready_document(store: &MemoryStore, identity: &str, excerpts: usize, user: i64) {
    let now = Utc::now().timestamp();
    store
        .upsert_user(&User {
            chat_id: user,
            display_name: None,
            created_at: now,
        })
        .await
        .unwrap();
    store
        .insert_document(&Document {
            identity: identity.to_string(),
            display_name: "Ten Chapters".to_string(),
            author: Some("A. Writer".to_string()),
            size_bytes: 4096,
            format: SourceFormat::Epub,
            state: ProcessingState::Pending,
            failure_reason: None,
            excerpt_count: 0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let rows: Vec<Excerpt> = (0..excerpts)
        .map(|i| Excerpt {
            document_identity: identity.to_string(),
            seq_index: i as i64,
            text: format!("Excerpt number {i} of the fixture document."),
            paragraph_count: 1,
        })
        .collect();
    store.commit_ready(identity, &rows).await.unwrap();
    store.activate_progress(user, identity).await.unwrap();
}

fn deliverer(
    store: Arc<MemoryStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
) -> Deliverer {
    let extractor = Arc::new(CountingExtractor::new("unused", Duration::ZERO));
    let cache = Arc::new(ProcessingCache::new(
        store.clone(),
        extractor,
        segmenting(),
        &processing(),
    ));
    Deliverer::new(store, cache, notifier, retry, 4096)
}

// ── processing cache ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_extract_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(CountingExtractor::new(
        &ten_paragraph_text(),
        Duration::from_millis(50),
    ));
    let cache = Arc::new(ProcessingCache::new(
        store.clone(),
        extractor.clone(),
        segmenting(),
        &processing(),
    ));

    let src = source("a1");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let src = src.clone();
        handles.push(tokio::spawn(async move {
            cache.request_processing(&src).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    let first = &results[0];
    assert!(first.excerpts.len() > 1);
    for r in &results {
        assert_eq!(r.document.identity, first.document.identity);
        assert_eq!(r.excerpts.len(), first.excerpts.len());
        assert_eq!(r.excerpts, first.excerpts);
    }
    // Sequence indices are contiguous from zero.
    for (i, e) in first.excerpts.iter().enumerate() {
        assert_eq!(e.seq_index, i as i64);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_identities_process_in_parallel() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(CountingExtractor::new(
        "One sentence here. Another sentence there.",
        Duration::from_millis(80),
    ));
    let cache = Arc::new(ProcessingCache::new(
        store.clone(),
        extractor.clone(),
        segmenting(),
        &processing(),
    ));

    let started = std::time::Instant::now();
    let src_b1 = source("b1");
    let src_b2 = source("b2");
    let a = cache.request_processing(&src_b1);
    let b = cache.request_processing(&src_b2);
    let (ra, rb) = tokio::join!(a, b);
    ra.unwrap();
    rb.unwrap();

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    // Two 80ms extractions overlapping, not serialized behind one lock.
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn ready_documents_come_from_the_cache() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(CountingExtractor::new(
        "A first sentence. A second sentence.",
        Duration::ZERO,
    ));
    let cache = ProcessingCache::new(store.clone(), extractor.clone(), segmenting(), &processing());

    let src = source("c1");
    cache.request_processing(&src).await.unwrap();
    cache.request_processing(&src).await.unwrap();
    cache.request_processing(&src).await.unwrap();

    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_identity_stays_failed_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let extractor = Arc::new(FailingExtractor {
        calls: AtomicUsize::new(0),
    });
    let cache = ProcessingCache::new(store.clone(), extractor.clone(), segmenting(), &processing());

    let src = source("d1");
    assert!(cache.request_processing(&src).await.is_err());
    // Every later caller gets the captured failure; extraction never reruns.
    assert!(cache.request_processing(&src).await.is_err());
    assert!(cache.request_processing(&src).await.is_err());
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

    let doc = store.get_document(&src.identity).await.unwrap().unwrap();
    assert_eq!(doc.state, ProcessingState::Failed);
    assert!(doc.failure_reason.is_some());
}

// ── progress semantics ───────────────────────────────────────────────────

#[tokio::test]
async fn advance_is_monotonic_and_idempotent_after_completion() {
    let store = MemoryStore::new();
    seed_ready_document(&store, "doc-adv", 3, 7).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        match store.advance_progress(7, "doc-adv").await.unwrap() {
            AdvanceOutcome::Advanced(p) | AdvanceOutcome::JustCompleted(p) => {
                seen.push(p.current_index)
            }
            AdvanceOutcome::NoFurtherContent => panic!("completed too early"),
        }
    }
    assert_eq!(seen, vec![1, 2, 3]);

    let progress = store.get_active_progress(7).await.unwrap().unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);

    // Advancing past the end never errors and never mutates.
    for _ in 0..3 {
        assert!(matches!(
            store.advance_progress(7, "doc-adv").await.unwrap(),
            AdvanceOutcome::NoFurtherContent
        ));
    }
    let after = store.get_active_progress(7).await.unwrap().unwrap();
    assert_eq!(after.current_index, 3);
}

#[tokio::test]
async fn reselecting_any_document_resets_to_zero() {
    let store = MemoryStore::new();
    seed_ready_document(&store, "doc-reset", 5, 9).await;

    store.advance_progress(9, "doc-reset").await.unwrap();
    store.advance_progress(9, "doc-reset").await.unwrap();
    assert_eq!(
        store.get_active_progress(9).await.unwrap().unwrap().current_index,
        2
    );

    // Reselecting the active document goes back to the beginning.
    let progress = store.activate_progress(9, "doc-reset").await.unwrap();
    assert_eq!(progress.current_index, 0);
    assert_eq!(progress.status, ProgressStatus::NotStarted);
}

#[tokio::test]
async fn switching_documents_preserves_the_previous_progress() {
    let store = MemoryStore::new();
    seed_ready_document(&store, "doc-one", 5, 11).await;
    store.advance_progress(11, "doc-one").await.unwrap();

    let now = Utc::now().timestamp();
    store
        .insert_document(&Document {
            identity: "doc-two".to_string(),
            display_name: "Second".to_string(),
            author: None,
            size_bytes: 1,
            format: SourceFormat::Pdf,
            state: ProcessingState::Pending,
            failure_reason: None,
            excerpt_count: 0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    store
        .commit_ready(
            "doc-two",
            &[Excerpt {
                document_identity: "doc-two".to_string(),
                seq_index: 0,
                text: "Only excerpt.".to_string(),
                paragraph_count: 1,
            }],
        )
        .await
        .unwrap();

    store.activate_progress(11, "doc-two").await.unwrap();
    let active = store.get_active_progress(11).await.unwrap().unwrap();
    assert_eq!(active.document_identity, "doc-two");
    assert_eq!(active.current_index, 0);
}

// ── delivery path ────────────────────────────────────────────────────────

#[tokio::test]
async fn ten_excerpt_walkthrough_completes_with_notice() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-walk", 10, 42).await;
    let notifier = Arc::new(ScriptedNotifier::new(0));
    let deliverer = deliverer(store.clone(), notifier.clone(), fast_retry(3));

    for expected in 1..=10i64 {
        match deliverer.deliver_next(42, Utc::now()).await.unwrap() {
            Delivered::Excerpt {
                position,
                total,
                completed,
            } => {
                assert_eq!(position, expected);
                assert_eq!(total, 10);
                assert_eq!(completed, expected == 10);
            }
            Delivered::NoFurtherContent => panic!("ran out early at {expected}"),
        }
    }

    // The eleventh call is a calm no-op.
    assert!(matches!(
        deliverer.deliver_next(42, Utc::now()).await.unwrap(),
        Delivered::NoFurtherContent
    ));

    // Ten excerpts plus one completion notice.
    assert_eq!(notifier.sent_count(), 11);
    let sent = notifier.sent.lock().unwrap();
    assert!(sent[0].contains("1/10 excerpts"));
    assert!(sent[9].contains("10/10 excerpts"));
    assert!(sent[10].contains("You finished"));
}

#[tokio::test]
async fn transient_failures_retry_then_advance_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-flaky", 10, 5).await;
    let now = Utc::now();
    let schedule = Schedule {
        user_id: 5,
        time_of_day: "08:00".parse().unwrap(),
        frequency: Frequency::Daily,
        timezone: "UTC".to_string(),
        active: true,
        last_delivery_at: None,
        created_at: now.timestamp() - 86_400,
        updated_at: now.timestamp(),
    };
    store.upsert_schedule(&schedule).await.unwrap();

    // Fails twice, then succeeds on the third attempt.
    let notifier = Arc::new(ScriptedNotifier::new(2));
    let deliverer = deliverer(store.clone(), notifier.clone(), fast_retry(5));

    let outcome = deliverer.deliver_next(5, now).await.unwrap();
    assert!(matches!(outcome, Delivered::Excerpt { position: 1, .. }));

    // One confirmed send; index and the timestamp moved exactly once.
    assert_eq!(notifier.sent_count(), 1);
    let progress = store.get_active_progress(5).await.unwrap().unwrap();
    assert_eq!(progress.current_index, 1);
    let stored = store.get_schedule(5).await.unwrap().unwrap();
    assert_eq!(stored.last_delivery_at, Some(now.timestamp()));
}

#[tokio::test]
async fn exhausted_retries_leave_progress_untouched() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-down", 10, 6).await;
    let notifier = Arc::new(ScriptedNotifier::new(usize::MAX));
    let deliverer = deliverer(store.clone(), notifier.clone(), fast_retry(3));

    let err = deliverer.deliver_next(6, Utc::now()).await.unwrap_err();
    assert!(matches!(
        err,
        DeliverError::ChannelFailed { attempts: 3, .. }
    ));
    assert_eq!(notifier.sent_count(), 0);
    let progress = store.get_active_progress(6).await.unwrap().unwrap();
    assert_eq!(progress.current_index, 0);
    assert_eq!(progress.status, ProgressStatus::NotStarted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_on_demand_and_scheduled_deliveries_never_duplicate() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-race", 10, 8).await;
    let notifier = Arc::new(ScriptedNotifier::new(0));
    let deliverer = Arc::new(deliverer(store.clone(), notifier.clone(), fast_retry(3)));

    let now = Utc::now();
    let a = {
        let d = deliverer.clone();
        tokio::spawn(async move { d.deliver_next(8, now).await.unwrap() })
    };
    let b = {
        let d = deliverer.clone();
        tokio::spawn(async move { d.deliver_next(8, now).await.unwrap() })
    };
    let (ra, rb) = (a.await.unwrap(), b.await.unwrap());

    // Both succeed, but they deliver *different* excerpts in sequence.
    let positions: Vec<i64> = [ra, rb]
        .iter()
        .map(|o| match o {
            Delivered::Excerpt { position, .. } => *position,
            Delivered::NoFurtherContent => panic!("unexpected no-content"),
        })
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2]);
    assert_eq!(notifier.sent_count(), 2);
}

// ── scheduler ────────────────────────────────────────────────────────────

#[tokio::test]
async fn due_schedule_fires_once_per_window() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-sched", 10, 12).await;
    let now = Utc::now();
    store
        .upsert_schedule(&Schedule {
            user_id: 12,
            time_of_day: "00:00".parse().unwrap(),
            frequency: Frequency::Daily,
            timezone: "UTC".to_string(),
            active: true,
            last_delivery_at: None,
            created_at: (now - ChronoDuration::days(2)).timestamp(),
            updated_at: now.timestamp(),
        })
        .await
        .unwrap();

    let notifier = Arc::new(ScriptedNotifier::new(0));
    let deliverer = Arc::new(deliverer(store.clone(), notifier.clone(), fast_retry(3)));
    let scheduler = DeliveryScheduler::new(store.clone(), deliverer, &SchedulerConfig::default());

    assert_eq!(scheduler.tick(now).await, 1);
    // Repeated polls inside the same window stay quiet.
    assert_eq!(scheduler.tick(now + ChronoDuration::minutes(1)).await, 0);
    assert_eq!(scheduler.tick(now + ChronoDuration::hours(2)).await, 0);
    assert_eq!(notifier.sent_count(), 1);
}

#[tokio::test]
async fn on_demand_delivery_suppresses_the_scheduled_one() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-ondemand", 10, 13).await;
    let now = Utc::now();
    store
        .upsert_schedule(&Schedule {
            user_id: 13,
            time_of_day: "00:00".parse().unwrap(),
            frequency: Frequency::Daily,
            timezone: "UTC".to_string(),
            active: true,
            last_delivery_at: None,
            created_at: (now - ChronoDuration::days(2)).timestamp(),
            updated_at: now.timestamp(),
        })
        .await
        .unwrap();

    let notifier = Arc::new(ScriptedNotifier::new(0));
    let deliverer = Arc::new(deliverer(store.clone(), notifier.clone(), fast_retry(3)));
    let scheduler =
        DeliveryScheduler::new(store.clone(), deliverer.clone(), &SchedulerConfig::default());

    // The user asks for the next excerpt before the poll loop gets there.
    deliverer.deliver_next(13, now).await.unwrap();

    // The scheduler sees the window already served.
    assert_eq!(scheduler.tick(now + ChronoDuration::minutes(1)).await, 0);
    assert_eq!(notifier.sent_count(), 1);
}

#[tokio::test]
async fn paused_schedules_are_not_polled() {
    let store = Arc::new(MemoryStore::new());
    seed_ready_document(&store, "doc-paused", 10, 14).await;
    let now = Utc::now();
    store
        .upsert_schedule(&Schedule {
            user_id: 14,
            time_of_day: "00:00".parse().unwrap(),
            frequency: Frequency::Daily,
            timezone: "UTC".to_string(),
            active: true,
            last_delivery_at: None,
            created_at: (now - ChronoDuration::days(2)).timestamp(),
            updated_at: now.timestamp(),
        })
        .await
        .unwrap();
    assert!(store.set_schedule_active(14, false).await.unwrap());

    let notifier = Arc::new(ScriptedNotifier::new(0));
    let deliverer = Arc::new(deliverer(store.clone(), notifier.clone(), fast_retry(3)));
    let scheduler = DeliveryScheduler::new(store.clone(), deliverer, &SchedulerConfig::default());

    assert_eq!(scheduler.tick(now).await, 0);
    assert_eq!(notifier.sent_count(), 0);

    // Resuming puts the schedule back into the poll set.
    assert!(store.set_schedule_active(14, true).await.unwrap());
    assert_eq!(scheduler.tick(now).await, 1);
}
