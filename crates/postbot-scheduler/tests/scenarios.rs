// End-to-end behaviour of schedule -> tick -> caption -> publish against a
// real SQLite store, with scripted collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postbot_core::config::SchedulerConfig;
use postbot_core::{
    Credential, MediaBlob, PostId, PostRecord, PostSnapshot, PostStatus,
};
use postbot_scheduler::engine::STALE_PROCESSING_REASON;
use postbot_scheduler::{
    CaptionGenerator, GenerationError, PublishError, Publisher, ScheduleRequest,
    SchedulerEngine, SchedulerError, SchedulerHandle, TickOutcome, TickReport,
};
use postbot_store::{ChangeEntry, PostStore, SqlitePostStore, StoreError, ViewSync};
use tokio::sync::{mpsc, watch, Notify};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

enum CaptionScript {
    Text(&'static str),
    Fail(&'static str),
}

struct ScriptedCaption {
    script: CaptionScript,
    calls: AtomicUsize,
}

impl ScriptedCaption {
    fn text(s: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script: CaptionScript::Text(s),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(reason: &'static str) -> Arc<Self> {
        Arc::new(Self {
            script: CaptionScript::Fail(reason),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CaptionGenerator for ScriptedCaption {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_caption(&self, _: &[u8], _: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            CaptionScript::Text(s) => Ok(s.to_string()),
            CaptionScript::Fail(reason) => Err(GenerationError::new(reason)),
        }
    }
}

/// Blocks inside the caption call until released.
struct GatedCaption {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl CaptionGenerator for GatedCaption {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate_caption(&self, _: &[u8], _: &str) -> Result<String, GenerationError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("worth the wait".into())
    }
}

struct RecordingPublisher {
    fail_with: Option<&'static str>,
    published: std::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail_with: None,
            published: Default::default(),
        })
    }

    fn failing(reason: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason),
            published: Default::default(),
        })
    }

    fn calls(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(
        &self,
        caption: &str,
        _: &MediaBlob,
        credential: &Credential,
    ) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap()
            .push((caption.to_string(), credential.expose().to_string()));
        match self.fail_with {
            Some(reason) => Err(PublishError::new(reason)),
            None => Ok(()),
        }
    }
}

/// A store whose medium has gone away.
struct UnavailableStore;

impl PostStore for UnavailableStore {
    fn medium(&self) -> &str {
        "gone"
    }
    fn append(&self, _: &PostRecord) -> postbot_store::Result<()> {
        Err(StoreError::Unavailable("disk detached".into()))
    }
    fn list(&self) -> postbot_store::Result<Vec<PostSnapshot>> {
        Err(StoreError::Unavailable("disk detached".into()))
    }
    fn get(&self, id: &PostId) -> postbot_store::Result<PostRecord> {
        Err(StoreError::NotFound { id: id.clone() })
    }
    fn update(
        &self,
        _: &PostId,
        _: &dyn Fn(&PostRecord) -> postbot_store::Result<PostRecord>,
    ) -> postbot_store::Result<PostRecord> {
        Err(StoreError::Unavailable("disk detached".into()))
    }
    fn changes_since(&self, _: u64) -> postbot_store::Result<Vec<ChangeEntry>> {
        Ok(Vec::new())
    }
    fn latest_change(&self) -> postbot_store::Result<u64> {
        Ok(0)
    }
}

/// Delegates to a real store, but refuses to commit `broken_id` into
/// `fail_into`.
struct BrokenWriteStore {
    inner: Arc<dyn PostStore>,
    broken_id: PostId,
    fail_into: PostStatus,
}

impl PostStore for BrokenWriteStore {
    fn medium(&self) -> &str {
        self.inner.medium()
    }
    fn append(&self, record: &PostRecord) -> postbot_store::Result<()> {
        self.inner.append(record)
    }
    fn list(&self) -> postbot_store::Result<Vec<PostSnapshot>> {
        self.inner.list()
    }
    fn get(&self, id: &PostId) -> postbot_store::Result<PostRecord> {
        self.inner.get(id)
    }
    fn update(
        &self,
        id: &PostId,
        mutate: &dyn Fn(&PostRecord) -> postbot_store::Result<PostRecord>,
    ) -> postbot_store::Result<PostRecord> {
        self.inner.update(id, &|r| {
            let next = mutate(r)?;
            if *id == self.broken_id && next.status == self.fail_into {
                return Err(StoreError::Unavailable("write rejected".into()));
            }
            Ok(next)
        })
    }
    fn changes_since(&self, after: u64) -> postbot_store::Result<Vec<ChangeEntry>> {
        self.inner.changes_since(after)
    }
    fn latest_change(&self) -> postbot_store::Result<u64> {
        self.inner.latest_change()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_secs: 1,
        ..Default::default()
    }
}

fn memory_store() -> Arc<dyn PostStore> {
    Arc::new(SqlitePostStore::open_in_memory().unwrap())
}

fn schedule(handle: &SchedulerHandle, now: DateTime<Utc>, in_secs: i64) -> PostId {
    handle
        .schedule_post_at(
            ScheduleRequest {
                id: None,
                media: MediaBlob::new("image/png", vec![0x89, b'P', b'N', b'G']),
                schedule_time: now + chrono::Duration::seconds(in_secs),
                credential: Credential::new("page-token"),
            },
            now,
        )
        .unwrap()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn due_post_is_captioned_and_published() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let publisher = RecordingPublisher::ok();
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("Sunset over the bay #sunset #bay 🌅"),
        publisher.clone(),
        &config(),
    );

    let now = Utc::now();
    let id = schedule(&handle, now, 60);
    let report = engine.tick_at(now + chrono::Duration::seconds(61)).await.unwrap();

    assert_eq!(report.selected, 1);
    assert_eq!(report.posted, 1);
    assert_eq!(report.outcome(), TickOutcome::Changed);

    let post = handle.list_posts().unwrap().remove(0);
    assert_eq!(post.id, id);
    assert_eq!(post.status, PostStatus::Posted);
    assert_eq!(post.caption.as_deref(), Some("Sunset over the bay #sunset #bay 🌅"));
    assert!(post.error_detail.is_none());

    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(
        published,
        vec![(
            "Sunset over the bay #sunset #bay 🌅".to_string(),
            "page-token".to_string()
        )]
    );
}

#[tokio::test]
async fn rate_limited_caption_fails_without_publishing() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let publisher = RecordingPublisher::ok();
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::failing("rate limited"),
        publisher.clone(),
        &config(),
    );

    let now = Utc::now();
    schedule(&handle, now, 1);
    let report = engine.tick_at(now + chrono::Duration::seconds(2)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.outcome(), TickOutcome::ChangedWithFailures);

    let post = handle.list_posts().unwrap().remove(0);
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.error_detail.as_deref(), Some("rate limited"));
    assert!(post.caption.is_none());
    assert_eq!(publisher.calls(), 0);
}

#[tokio::test]
async fn network_failure_while_publishing_keeps_caption() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("morning run"),
        RecordingPublisher::failing("network"),
        &config(),
    );

    let now = Utc::now();
    schedule(&handle, now, 1);
    engine.tick_at(now + chrono::Duration::seconds(5)).await.unwrap();

    let post = handle.list_posts().unwrap().remove(0);
    assert_eq!(post.status, PostStatus::Failed);
    assert_eq!(post.caption.as_deref(), Some("morning run"));
    assert_eq!(post.error_detail.as_deref(), Some("network"));
}

#[tokio::test]
async fn processing_is_visible_while_caption_is_outstanding() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let sync = ViewSync::new(Arc::clone(&store));
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let engine = Arc::new(SchedulerEngine::new(
        Arc::clone(&store),
        Arc::new(GatedCaption {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
        RecordingPublisher::ok(),
        &config(),
    ));

    let now = Utc::now();
    let id = schedule(&handle, now, 1);
    let tick_at = now + chrono::Duration::seconds(2);
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.tick_at(tick_at).await })
    };

    tokio::time::timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("caption call never started");
    let during = sync.snapshot().unwrap().remove(0);
    assert_eq!(during.id, id);
    assert_eq!(during.status, PostStatus::Processing);
    assert!(during.caption.is_none());

    release.notify_one();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.posted, 1);
    assert_eq!(sync.snapshot().unwrap()[0].status, PostStatus::Posted);
}

#[tokio::test]
async fn tick_before_schedule_time_changes_nothing() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let captioner = ScriptedCaption::text("too early");
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        captioner.clone(),
        RecordingPublisher::ok(),
        &config(),
    );

    let now = Utc::now();
    schedule(&handle, now, 3600);
    let before = handle.list_posts().unwrap();
    let log_before = store.latest_change().unwrap();

    let report = engine.tick_at(now + chrono::Duration::seconds(10)).await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(report.outcome(), TickOutcome::NoChange);
    assert_eq!(handle.list_posts().unwrap(), before);
    assert_eq!(store.latest_change().unwrap(), log_before);
    assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_tick_after_completion_is_a_no_op() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let publisher = RecordingPublisher::ok();
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("once"),
        publisher.clone(),
        &config(),
    );

    let now = Utc::now();
    schedule(&handle, now, 1);
    schedule(&handle, now, 2);
    let later = now + chrono::Duration::seconds(30);

    let first = engine.tick_at(later).await.unwrap();
    assert_eq!(first.posted, 2);
    let after_first = handle.list_posts().unwrap();

    let second = engine.tick_at(later + chrono::Duration::seconds(30)).await.unwrap();
    assert!(!second.changed());
    assert_eq!(second.selected, 0);
    assert_eq!(handle.list_posts().unwrap(), after_first);
    assert_eq!(publisher.calls(), 2);
}

#[tokio::test]
async fn post_claimed_elsewhere_is_left_alone() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("ok"),
        RecordingPublisher::ok(),
        &config(),
    );

    let now = Utc::now();
    let first = schedule(&handle, now, 1);
    let second = schedule(&handle, now, 1);
    // someone else already claimed the first one
    store
        .update(&first, &|r| Ok(r.claim(now)?))
        .unwrap();

    let report = engine.tick_at(now + chrono::Duration::seconds(5)).await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.posted, 1);

    let posts = handle.list_posts().unwrap();
    let by_id = |id: &PostId| posts.iter().find(|p| &p.id == id).unwrap().status;
    assert_eq!(by_id(&first), PostStatus::Processing);
    assert_eq!(by_id(&second), PostStatus::Posted);
}

/// Two due posts; writes for the first one fail at `fail_into`.
async fn tick_with_one_broken_post(
    fail_into: PostStatus,
) -> (TickReport, Vec<PostSnapshot>, PostId, PostId) {
    let inner = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&inner), 1024);
    let now = Utc::now();
    let broken = schedule(&handle, now, 1);
    let healthy = schedule(&handle, now, 1);

    let store: Arc<dyn PostStore> = Arc::new(BrokenWriteStore {
        inner: Arc::clone(&inner),
        broken_id: broken.clone(),
        fail_into,
    });
    let engine = SchedulerEngine::new(
        store,
        ScriptedCaption::text("still going"),
        RecordingPublisher::ok(),
        &config(),
    );

    let report = engine
        .tick_at(now + chrono::Duration::seconds(5))
        .await
        .expect("per-post store errors must not fail the tick");
    (report, handle.list_posts().unwrap(), broken, healthy)
}

#[tokio::test]
async fn failed_claim_does_not_stop_the_tick() {
    let (report, posts, broken, healthy) = tick_with_one_broken_post(PostStatus::Processing).await;
    assert_eq!(report.selected, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.interrupted, 0);
    assert_eq!(report.posted, 1);

    let by_id = |id: &PostId| posts.iter().find(|p| &p.id == id).unwrap().status;
    assert_eq!(by_id(&broken), PostStatus::Scheduled);
    assert_eq!(by_id(&healthy), PostStatus::Posted);
}

#[tokio::test]
async fn lost_checkpoint_does_not_stop_the_tick() {
    let (report, posts, broken, healthy) = tick_with_one_broken_post(PostStatus::Posted).await;
    assert_eq!(report.selected, 2);
    assert_eq!(report.interrupted, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(report.posted, 1);
    assert!(report.changed());

    let by_id = |id: &PostId| posts.iter().find(|p| &p.id == id).unwrap().status;
    assert_eq!(by_id(&broken), PostStatus::Processing);
    assert_eq!(by_id(&healthy), PostStatus::Posted);
}

#[tokio::test]
async fn unlistable_store_is_fatal_to_the_loop() {
    let store: Arc<dyn PostStore> = Arc::new(UnavailableStore);
    let engine = SchedulerEngine::new(
        store,
        ScriptedCaption::text("never"),
        RecordingPublisher::ok(),
        &config(),
    );

    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Store(StoreError::Unavailable(_))));

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let result = tokio::time::timeout(Duration::from_secs(5), engine.run(shutdown_rx))
        .await
        .expect("engine kept running after a fatal error");
    assert!(result.is_err());
}

#[tokio::test]
async fn running_engine_reports_and_stops_on_shutdown() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let (reports_tx, mut reports_rx) = mpsc::channel(8);
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("live"),
        RecordingPublisher::ok(),
        &config(),
    )
    .with_reports(reports_tx);

    // scheduled a moment in the past relative to the engine's clock
    let now = Utc::now() - chrono::Duration::seconds(10);
    schedule(&handle, now, 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(engine.run(shutdown_rx));

    let report = tokio::time::timeout(Duration::from_secs(5), reports_rx.recv())
        .await
        .expect("no tick report")
        .unwrap();
    assert_eq!(report.posted, 1);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stale_processing_posts_are_failed_not_rerun() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let publisher = RecordingPublisher::ok();
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("unused"),
        publisher.clone(),
        &SchedulerConfig {
            stale_processing_secs: Some(300),
            ..config()
        },
    );

    let now = Utc::now();
    let stale = schedule(&handle, now, 1);
    let fresh = schedule(&handle, now, 1);
    let claimed_at = now + chrono::Duration::seconds(2);
    store.update(&stale, &|r| Ok(r.claim(claimed_at)?)).unwrap();
    let recent = claimed_at + chrono::Duration::seconds(590);
    store.update(&fresh, &|r| Ok(r.claim(recent)?)).unwrap();

    let report = engine
        .tick_at(claimed_at + chrono::Duration::seconds(600))
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.outcome(), TickOutcome::ChangedWithFailures);

    let stale_rec = store.get(&stale).unwrap();
    assert_eq!(stale_rec.status, PostStatus::Failed);
    assert_eq!(stale_rec.error_detail.as_deref(), Some(STALE_PROCESSING_REASON));
    assert_eq!(store.get(&fresh).unwrap().status, PostStatus::Processing);
    assert_eq!(publisher.calls(), 0);
}

#[tokio::test]
async fn stale_recovery_is_off_by_default() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let engine = SchedulerEngine::new(
        Arc::clone(&store),
        ScriptedCaption::text("unused"),
        RecordingPublisher::ok(),
        &config(),
    );

    let now = Utc::now();
    let id = schedule(&handle, now, 1);
    store.update(&id, &|r| Ok(r.claim(now)?)).unwrap();

    let report = engine
        .tick_at(now + chrono::Duration::days(7))
        .await
        .unwrap();
    assert_eq!(report.recovered, 0);
    assert_eq!(store.get(&id).unwrap().status, PostStatus::Processing);
}

#[tokio::test]
async fn unrepresentable_stale_threshold_never_recovers() {
    let store = memory_store();
    let handle = SchedulerHandle::new(Arc::clone(&store), 1024);
    let now = Utc::now();
    let id = schedule(&handle, now, 1);
    store.update(&id, &|r| Ok(r.claim(now)?)).unwrap();

    for secs in [u64::MAX, 10_000_000_000_000] {
        let engine = SchedulerEngine::new(
            Arc::clone(&store),
            ScriptedCaption::text("unused"),
            RecordingPublisher::ok(),
            &SchedulerConfig {
                stale_processing_secs: Some(secs),
                ..config()
            },
        );
        let report = engine.tick_at(now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(report.recovered, 0, "threshold {secs}");
        assert_eq!(store.get(&id).unwrap().status, PostStatus::Processing);
    }
}

#[tokio::test]
async fn two_observers_see_engine_writes_from_another_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.db");
    let open = || -> Arc<dyn PostStore> {
        Arc::new(SqlitePostStore::open(path.to_str().unwrap(), Duration::from_secs(5)).unwrap())
    };

    let engine_store = open();
    let handle = SchedulerHandle::new(Arc::clone(&engine_store), 1024);
    let engine = SchedulerEngine::new(
        Arc::clone(&engine_store),
        ScriptedCaption::text("shared"),
        RecordingPublisher::ok(),
        &config(),
    );
    let now = Utc::now();
    let id = schedule(&handle, now, 1);

    let observers = [ViewSync::new(open()), ViewSync::new(open())];
    let mut receivers: Vec<_> = observers.iter().map(|o| o.subscribe()).collect();
    let mut watchers: Vec<_> = observers
        .iter()
        .map(|o| o.watcher(Duration::from_millis(50)).unwrap())
        .collect();

    engine.tick_at(now + chrono::Duration::seconds(5)).await.unwrap();

    for ((observer, watcher), rx) in observers.iter().zip(&mut watchers).zip(&mut receivers) {
        // claim + posted
        assert_eq!(watcher.poll().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap().post_id, id);
        let view = observer.snapshot().unwrap();
        assert_eq!(view[0].status, PostStatus::Posted);
        assert_eq!(view[0].caption.as_deref(), Some("shared"));
    }
}
