use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::connectivity::Connectivity;
use crate::queue::{BackoffPolicy, OfflineQueue, QueueItem, QueueItemKind};
use crate::remote::{MatchWriter, RemoteWriteError};
use crate::stores::QueueStore;

/// Outcome of a single drain pass. Items skipped because of backoff aren't counted anywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,

    /// Failed items removed by the failure policy, also counted in `failed`.
    pub dead_lettered: usize,

    /// Set when the pass didn't run because the environment reported being offline.
    pub skipped: bool,
}

/// Decides whether a failed item should be given up on instead of retried.
pub trait FailurePolicy {
    /// `item` still carries the attempt count from before this failure.
    fn should_dead_letter(&self, item: &QueueItem, error: &RemoteWriteError) -> bool;
}

/// Never give up. Network failures and rejected writes are retried alike, forever, at the backoff
/// ceiling.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryForever;

impl FailurePolicy for RetryForever {
    fn should_dead_letter(&self, _item: &QueueItem, _error: &RemoteWriteError) -> bool {
        false
    }
}

/// Drops items once they've failed `max_attempts` times. With `permanent_only` set only failures
/// the backend classified as permanent count towards giving up.
#[derive(Clone, Copy, Debug)]
pub struct DeadLetterAfter {
    pub max_attempts: u32,
    pub permanent_only: bool,
}

impl FailurePolicy for DeadLetterAfter {
    fn should_dead_letter(&self, item: &QueueItem, error: &RemoteWriteError) -> bool {
        if self.permanent_only && !error.is_permanent() {
            return false;
        }

        item.attempts().saturating_add(1) >= self.max_attempts
    }
}

type ItemCallback = Box<dyn Fn(&QueueItem)>;
type ItemErrorCallback = Box<dyn Fn(&QueueItem, &RemoteWriteError)>;

/// Optional notifications from a drain, e.g. to update a pending-writes badge in the UI.
#[derive(Default)]
pub struct DrainHooks {
    on_success: Option<ItemCallback>,
    on_error: Option<ItemErrorCallback>,
    on_dead_letter: Option<ItemErrorCallback>,
}

impl DrainHooks {
    pub fn on_dead_letter(mut self, callback: impl Fn(&QueueItem, &RemoteWriteError) + 'static) -> Self {
        self.on_dead_letter = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&QueueItem, &RemoteWriteError) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&QueueItem) + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }
}

/// Delivers pending queue items to the backend.
///
/// Items are attempted one at a time, oldest first, skipping any still inside their backoff
/// window. Only one pass runs at a time per drainer, overlapping triggers (an online event plus a
/// manual sync button) turn into no-ops. A drain never fails, every per item problem becomes
/// queue state plus a hook call.
pub struct QueueDrainer<S: QueueStore, W: MatchWriter> {
    queue: OfflineQueue<S>,
    writer: Rc<W>,
    connectivity: Rc<dyn Connectivity>,

    backoff: BackoffPolicy,
    failure_policy: Box<dyn FailurePolicy>,
    hooks: DrainHooks,

    draining: AtomicBool,
}

impl<S: QueueStore, W: MatchWriter> QueueDrainer<S, W> {
    async fn deliver(&self, item: &QueueItem) -> Result<(), RemoteWriteError> {
        match item.kind() {
            QueueItemKind::MatchLogAppend(entry) => self.writer.append_match_log(entry).await,
            QueueItemKind::ScoreUpdate(update) => self.writer.set_match_score(update).await,
        }
    }

    pub async fn drain(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::SeqCst) {
            tracing::debug!("drain already in progress, ignoring trigger");
            return DrainReport::default();
        }

        let _guard = DrainGuard(&self.draining);

        if !self.connectivity.is_online() {
            tracing::debug!("offline, skipping drain");
            return DrainReport {
                skipped: true,
                ..Default::default()
            };
        }

        let items = match self.queue.list_offline_queue().await {
            Ok(items) => items,
            Err(err) => {
                tracing::error!("unable to list offline queue for draining: {err}");
                return DrainReport::default();
            }
        };

        let now = self.queue.clock().now_ms();
        let mut report = DrainReport::default();

        for item in items {
            if !self.backoff.is_eligible(&item, now) {
                tracing::trace!(item_id = item.id(), attempts = item.attempts(), "item still backing off");
                continue;
            }

            report.processed += 1;

            match self.deliver(&item).await {
                Ok(()) => {
                    report.succeeded += 1;
                    self.handle_success(&item).await;
                }
                Err(err) => {
                    report.failed += 1;
                    if self.handle_failure(&item, &err).await {
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                "offline queue drain finished"
            );
        }

        report
    }

    /// Drains once per event until the stream ends. Hand it the connectivity's online events, a
    /// timer, or both merged together.
    pub async fn drain_on_events<E>(&self, events: E)
    where
        E: Stream<Item = ()>,
    {
        futures::pin_mut!(events);

        while events.next().await.is_some() {
            self.drain().await;
        }
    }

    async fn handle_failure(&self, item: &QueueItem, err: &RemoteWriteError) -> bool {
        tracing::warn!(item_id = item.id(), kind = item.kind().name(), attempts = item.attempts(), "delivery failed: {err}");

        if let Some(on_error) = &self.hooks.on_error {
            on_error(item, err);
        }

        if self.failure_policy.should_dead_letter(item, err) {
            tracing::error!(item_id = item.id(), kind = item.kind().name(), "giving up on queued write: {err}");

            if let Err(remove_err) = self.queue.remove_offline_queue_item(item.id()).await {
                tracing::error!(item_id = item.id(), "failed to remove dead lettered item: {remove_err}");
            }

            if let Some(on_dead_letter) = &self.hooks.on_dead_letter {
                on_dead_letter(item, err);
            }

            return true;
        }

        if let Err(mark_err) = self.queue.mark_offline_queue_failure(item.id()).await {
            tracing::error!(item_id = item.id(), "failed to record delivery failure: {mark_err}");
        }

        false
    }

    async fn handle_success(&self, item: &QueueItem) {
        tracing::debug!(item_id = item.id(), kind = item.kind().name(), "delivered queued write");

        // If this fails the item gets delivered again later, the backend tolerates that
        if let Err(err) = self.queue.remove_offline_queue_item(item.id()).await {
            tracing::warn!(item_id = item.id(), "failed to remove delivered item: {err}");
        }

        if let Some(on_success) = &self.hooks.on_success {
            on_success(item);
        }
    }

    pub fn new(queue: OfflineQueue<S>, writer: W, connectivity: impl Connectivity + 'static) -> Self {
        Self {
            queue,
            writer: Rc::new(writer),
            connectivity: Rc::new(connectivity),

            backoff: BackoffPolicy::default(),
            failure_policy: Box::new(RetryForever),
            hooks: DrainHooks::default(),

            draining: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &OfflineQueue<S> {
        &self.queue
    }

    /// Drains every time the connectivity reports coming back online. Runs for as long as the
    /// connectivity keeps the subscription open.
    pub async fn run_on_reconnect(&self) {
        let events = self.connectivity.subscribe_online();
        self.drain_on_events(events).await
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_failure_policy(mut self, policy: impl FailurePolicy + 'static) -> Self {
        self.failure_policy = Box::new(policy);
        self
    }

    pub fn with_hooks(mut self, hooks: DrainHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

/// Releases the single flight flag even when the drain future is dropped midway.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};

    use async_trait::async_trait;
    use futures::channel::oneshot;

    use crate::clock::{Clock, ManualClock};
    use crate::connectivity::ManualConnectivity;
    use crate::queue::{EnqueueOptions, MatchLogEntry, ScoreUpdate};
    use crate::stores::MemoryQueueStore;

    #[derive(Default)]
    struct ScriptedWriter {
        fail_with: RefCell<Option<RemoteWriteError>>,
        calls: RefCell<Vec<String>>,
        gate: RefCell<Option<oneshot::Receiver<()>>>,
    }

    impl ScriptedWriter {
        fn failing(err: RemoteWriteError) -> Self {
            let writer = Self::default();
            *writer.fail_with.borrow_mut() = Some(err);
            writer
        }

        async fn record(&self, call: String) -> Result<(), RemoteWriteError> {
            let gate = self.gate.borrow_mut().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }

            self.calls.borrow_mut().push(call);

            match self.fail_with.borrow().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait(?Send)]
    impl MatchWriter for ScriptedWriter {
        async fn append_match_log(&self, entry: &MatchLogEntry) -> Result<(), RemoteWriteError> {
            self.record(format!("log:{}:{}", entry.match_id, entry.event_code))
                .await
        }

        async fn set_match_score(&self, update: &ScoreUpdate) -> Result<(), RemoteWriteError> {
            self.record(format!(
                "score:{}:{}-{}",
                update.match_id, update.score_a, update.score_b
            ))
            .await
        }
    }

    fn drainer(
        writer: ScriptedWriter,
        online: bool,
    ) -> (
        QueueDrainer<MemoryQueueStore, ScriptedWriter>,
        ManualClock,
        ManualConnectivity,
    ) {
        let clock = ManualClock::new(10_000);
        let connectivity = ManualConnectivity::new(online);
        let queue = OfflineQueue::with_clock(MemoryQueueStore::default(), clock.clone());

        (
            QueueDrainer::new(queue, writer, connectivity.clone()),
            clock,
            connectivity,
        )
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_successful_drain_empties_queue_in_order() {
        let (drainer, clock, _) = drainer(ScriptedWriter::default(), true);
        let queue = drainer.queue().clone();

        queue
            .enqueue_match_log_entry(MatchLogEntry::new("M1", "pull", 1), EnqueueOptions::default())
            .await
            .unwrap();
        clock.advance(5);
        queue
            .upsert_score_update(ScoreUpdate::new("M1", 1, 0), EnqueueOptions::default())
            .await
            .unwrap();
        clock.advance(5);
        queue
            .enqueue_match_log_entry(MatchLogEntry::new("M1", "goal", 2), EnqueueOptions::default())
            .await
            .unwrap();

        let report = drainer.drain().await;
        assert_eq!(
            report,
            DrainReport {
                processed: 3,
                succeeded: 3,
                ..Default::default()
            }
        );
        assert_eq!(
            *drainer.writer().calls.borrow(),
            vec!["log:M1:pull", "score:M1:1-0", "log:M1:goal"]
        );

        assert!(queue.list_offline_queue().await.unwrap().is_empty());
        assert_eq!(drainer.drain().await, DrainReport::default());
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_offline_drain_is_skipped() {
        let (drainer, _, connectivity) = drainer(ScriptedWriter::default(), false);
        drainer
            .queue()
            .upsert_score_update(ScoreUpdate::new("M1", 1, 0), EnqueueOptions::default())
            .await
            .unwrap();

        let report = drainer.drain().await;
        assert!(report.skipped);
        assert_eq!(report.processed, 0);
        assert!(drainer.writer().calls.borrow().is_empty());

        connectivity.set_online(true);
        assert_eq!(drainer.drain().await.succeeded, 1);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_failures_back_off_and_fire_hooks() {
        let errors = Rc::new(Cell::new(0));
        let hook_errors = errors.clone();

        let (drainer, clock, _) = drainer(
            ScriptedWriter::failing(RemoteWriteError::transient("connection reset")),
            true,
        );
        let drainer = drainer.with_hooks(DrainHooks::default().on_error(move |_, _| {
            hook_errors.set(hook_errors.get() + 1);
        }));

        let item = drainer
            .queue()
            .upsert_score_update(ScoreUpdate::new("M1", 3, 3), EnqueueOptions::default())
            .await
            .unwrap();

        let report = drainer.drain().await;
        assert_eq!((report.processed, report.failed), (1, 1));
        assert_eq!(errors.get(), 1);

        // One failure means a 4s wait before the next attempt
        clock.advance(3_999);
        assert_eq!(drainer.drain().await.processed, 0);

        clock.advance(1);
        assert_eq!(drainer.drain().await.failed, 1);

        let stored = drainer
            .queue()
            .get_offline_queue_item(item.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts(), 2);
        assert_eq!(stored.last_attempt_at(), Some(clock.now_ms()));
        assert_eq!(errors.get(), 2);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_dead_letter_policy_removes_permanent_failures() {
        let dead = Rc::new(RefCell::new(Vec::new()));
        let hook_dead = dead.clone();

        let (drainer, _, _) = drainer(
            ScriptedWriter::failing(RemoteWriteError::permanent("unknown match")),
            true,
        );
        let drainer = drainer
            .with_failure_policy(DeadLetterAfter {
                max_attempts: 1,
                permanent_only: true,
            })
            .with_hooks(DrainHooks::default().on_dead_letter(move |item, _| {
                hook_dead.borrow_mut().push(item.id().to_string());
            }));

        let item = drainer
            .queue()
            .enqueue_match_log_entry(MatchLogEntry::new("M404", "goal", 1), EnqueueOptions::default())
            .await
            .unwrap();

        let report = drainer.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(*dead.borrow(), vec![item.id().to_string()]);
        assert_eq!(drainer.queue().pending_count().await.unwrap(), 0);
    }

    #[test]
    fn test_dead_letter_policy_ignores_transient_when_asked() {
        let policy = DeadLetterAfter {
            max_attempts: 3,
            permanent_only: true,
        };
        let mut item = QueueItem::new(
            "a".into(),
            QueueItemKind::ScoreUpdate(ScoreUpdate::new("M1", 0, 0)),
            0,
        );
        for at in 0..10 {
            item.record_failure(at);
        }

        assert!(!policy.should_dead_letter(&item, &RemoteWriteError::transient("timeout")));
        assert!(policy.should_dead_letter(&item, &RemoteWriteError::permanent("bad id")));
        assert!(!RetryForever.should_dead_letter(&item, &RemoteWriteError::permanent("bad id")));
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_overlapping_drains_are_single_flight() {
        let writer = ScriptedWriter::default();
        let (release, gate) = oneshot::channel();
        *writer.gate.borrow_mut() = Some(gate);

        let (drainer, _, _) = drainer(writer, true);
        drainer
            .queue()
            .upsert_score_update(ScoreUpdate::new("M1", 1, 0), EnqueueOptions::default())
            .await
            .unwrap();

        let first = drainer.drain();
        let second = async {
            // Runs while the first pass is parked on the gate
            let report = drainer.drain().await;
            release.send(()).unwrap();
            report
        };

        let (first, second) = futures::join!(first, second);
        assert_eq!(first.succeeded, 1);
        assert_eq!(second, DrainReport::default());
        assert_eq!(drainer.writer().calls.borrow().len(), 1);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_drains_on_each_event() {
        let (drainer, _, _) = drainer(ScriptedWriter::default(), true);
        drainer
            .queue()
            .upsert_score_update(ScoreUpdate::new("M1", 1, 0), EnqueueOptions::default())
            .await
            .unwrap();

        drainer
            .drain_on_events(futures::stream::iter(vec![(), ()]))
            .await;

        assert_eq!(drainer.writer().calls.borrow().len(), 1);
        assert_eq!(drainer.queue().pending_count().await.unwrap(), 0);
    }
}
