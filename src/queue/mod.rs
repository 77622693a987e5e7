//! The offline write queue: score updates and match log events that couldn't be confirmed
//! against the backend, kept durable until a drain delivers them.

mod backoff;
mod drain;
mod item;

pub use backoff::BackoffPolicy;
pub use drain::{
    DeadLetterAfter, DrainHooks, DrainReport, FailurePolicy, QueueDrainer, RetryForever,
};
pub use item::{MatchLogEntry, QueueItem, QueueItemKind, ScoreUpdate};

use std::rc::Rc;

use crate::clock::{Clock, SystemClock};
use crate::stores::{QueueStore, QueueStoreError};

/// Per call overrides when enqueuing.
#[derive(Clone, Debug, Default)]
pub struct EnqueueOptions {
    /// Reuse a known id instead of generating one. Replaying an enqueue with the same id
    /// overwrites the earlier item instead of duplicating it.
    pub id: Option<String>,

    /// Creation time to record instead of the current time.
    pub created_at: Option<i64>,
}

impl EnqueueOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            created_at: None,
        }
    }
}

/// Owns the lifetime of every [`QueueItem`]. Clones share the same store and clock.
pub struct OfflineQueue<S: QueueStore> {
    store: Rc<S>,
    clock: Rc<dyn Clock>,
}

impl<S: QueueStore> OfflineQueue<S> {
    fn build_item(
        &self,
        kind: QueueItemKind,
        options: EnqueueOptions,
    ) -> Result<QueueItem, OfflineQueueError> {
        if kind.match_id().trim().is_empty() {
            return Err(OfflineQueueError::MissingMatchId);
        }

        if let QueueItemKind::MatchLogAppend(entry) = &kind {
            if entry.event_code.trim().is_empty() {
                return Err(OfflineQueueError::MissingEventCode);
            }
        }

        let created_at = options.created_at.unwrap_or_else(|| self.clock.now_ms());
        let id = match options.id {
            Some(id) if id.trim().is_empty() => return Err(OfflineQueueError::InvalidId),
            Some(id) => id,
            None => QueueItem::generate_id(created_at),
        };

        Ok(QueueItem::new(id, kind, created_at))
    }

    pub(crate) fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Records a match event for later delivery. Every call produces its own item, events are
    /// never merged with one another.
    pub async fn enqueue_match_log_entry(
        &self,
        entry: MatchLogEntry,
        options: EnqueueOptions,
    ) -> Result<QueueItem, OfflineQueueError> {
        let item = self.build_item(QueueItemKind::MatchLogAppend(entry), options)?;
        self.store.put(item.clone()).await?;

        tracing::debug!(item_id = item.id(), match_id = item.match_id(), "queued match log entry");

        Ok(item)
    }

    pub async fn get_offline_queue_item(
        &self,
        id: &str,
    ) -> Result<Option<QueueItem>, OfflineQueueError> {
        Ok(self.store.get(id).await?)
    }

    /// All pending items, oldest first.
    pub async fn list_offline_queue(&self) -> Result<Vec<QueueItem>, OfflineQueueError> {
        let mut items = self.store.get_all().await?;
        items.sort_by(QueueItem::queue_order);
        Ok(items)
    }

    /// Records a failed delivery attempt against the item. Does nothing when the item is already
    /// gone, a concurrent drain may have delivered it in the meantime.
    pub async fn mark_offline_queue_failure(&self, id: &str) -> Result<(), OfflineQueueError> {
        let mut item = match self.store.get(id).await? {
            Some(item) => item,
            None => return Ok(()),
        };

        item.record_failure(self.clock.now_ms());
        tracing::debug!(item_id = id, attempts = item.attempts(), "recorded delivery failure");

        self.store.put(item).await?;

        Ok(())
    }

    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }

    pub async fn pending_count(&self) -> Result<usize, OfflineQueueError> {
        Ok(self.store.get_all().await?.len())
    }

    pub async fn remove_offline_queue_item(&self, id: &str) -> Result<(), OfflineQueueError> {
        self.store.delete(id).await?;
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Queues the latest score for a match, replacing any score for the same match that is still
    /// pending. Only the newest score is ever worth delivering.
    pub async fn upsert_score_update(
        &self,
        update: ScoreUpdate,
        options: EnqueueOptions,
    ) -> Result<QueueItem, OfflineQueueError> {
        let item = self.build_item(QueueItemKind::ScoreUpdate(update), options)?;
        self.store.upsert_superseding(item.clone()).await?;

        tracing::debug!(item_id = item.id(), match_id = item.match_id(), "queued score update");

        Ok(item)
    }

    pub fn with_clock(store: S, clock: impl Clock + 'static) -> Self {
        Self {
            store: Rc::new(store),
            clock: Rc::new(clock),
        }
    }
}

impl<S: QueueStore> Clone for OfflineQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OfflineQueueError {
    #[error("a supplied queue item id must not be blank")]
    InvalidId,

    #[error("match log entries need an event code")]
    MissingEventCode,

    #[error("queued writes need a match id")]
    MissingMatchId,

    #[error("queue storage failed: {0}")]
    Store(#[from] QueueStoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::stores::MemoryQueueStore;

    fn queue_at(start_ms: i64) -> (OfflineQueue<MemoryQueueStore>, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let queue = OfflineQueue::with_clock(MemoryQueueStore::default(), clock.clone());
        (queue, clock)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_score_updates_keep_only_latest_per_match() {
        let (queue, clock) = queue_at(1_000);

        for score_a in 1..=5 {
            queue
                .upsert_score_update(ScoreUpdate::new("M1", score_a, 2), EnqueueOptions::default())
                .await
                .unwrap();
            clock.advance(10);
        }
        queue
            .upsert_score_update(ScoreUpdate::new("M2", 0, 1), EnqueueOptions::default())
            .await
            .unwrap();

        let items = queue.list_offline_queue().await.unwrap();
        assert_eq!(items.len(), 2);

        let m1: Vec<_> = items.iter().filter(|item| item.match_id() == "M1").collect();
        assert_eq!(m1.len(), 1);
        assert_eq!(
            m1[0].kind(),
            &QueueItemKind::ScoreUpdate(ScoreUpdate::new("M1", 5, 2))
        );
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_log_entries_accumulate_in_creation_order() {
        // Same millisecond on purpose, ordering has to come from the id sequence
        let (queue, _clock) = queue_at(5_000);

        for code in ["pull", "turnover", "goal", "goal"] {
            queue
                .enqueue_match_log_entry(MatchLogEntry::new("M1", code, 5_000), Default::default())
                .await
                .unwrap();
        }

        let codes: Vec<_> = queue
            .list_offline_queue()
            .await
            .unwrap()
            .into_iter()
            .map(|item| match item.kind() {
                QueueItemKind::MatchLogAppend(entry) => entry.event_code.clone(),
                other => panic!("unexpected item {other:?}"),
            })
            .collect();

        assert_eq!(codes, vec!["pull", "turnover", "goal", "goal"]);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_supplied_id_replays_idempotently() {
        let (queue, _clock) = queue_at(1);
        let entry = MatchLogEntry::new("M1", "goal", 1);

        queue
            .enqueue_match_log_entry(entry.clone(), EnqueueOptions::with_id("goal-1"))
            .await
            .unwrap();
        queue
            .enqueue_match_log_entry(entry, EnqueueOptions::with_id("goal-1"))
            .await
            .unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert!(queue.get_offline_queue_item("goal-1").await.unwrap().is_some());
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_enqueue_validation() {
        let (queue, _clock) = queue_at(1);

        let missing_match = queue
            .upsert_score_update(ScoreUpdate::new("  ", 1, 0), Default::default())
            .await;
        assert!(matches!(missing_match, Err(OfflineQueueError::MissingMatchId)));

        let missing_code = queue
            .enqueue_match_log_entry(MatchLogEntry::new("M1", "", 1), Default::default())
            .await;
        assert!(matches!(missing_code, Err(OfflineQueueError::MissingEventCode)));

        let blank_id = queue
            .enqueue_match_log_entry(
                MatchLogEntry::new("M1", "goal", 1),
                EnqueueOptions::with_id(""),
            )
            .await;
        assert!(matches!(blank_id, Err(OfflineQueueError::InvalidId)));

        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_mark_failure_updates_attempts_only() {
        let (queue, clock) = queue_at(100);
        let item = queue
            .upsert_score_update(ScoreUpdate::new("M1", 1, 0), Default::default())
            .await
            .unwrap();

        clock.set(2_500);
        queue.mark_offline_queue_failure(item.id()).await.unwrap();
        clock.set(4_000);
        queue.mark_offline_queue_failure(item.id()).await.unwrap();

        let stored = queue
            .get_offline_queue_item(item.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts(), 2);
        assert_eq!(stored.last_attempt_at(), Some(4_000));
        assert_eq!(stored.created_at(), 100);
        assert_eq!(stored.kind(), item.kind());

        // Gone items are ignored
        queue.remove_offline_queue_item(item.id()).await.unwrap();
        queue.mark_offline_queue_failure(item.id()).await.unwrap();
        assert!(queue.get_offline_queue_item(item.id()).await.unwrap().is_none());
    }
}
