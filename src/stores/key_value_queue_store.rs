use async_trait::async_trait;

use crate::queue::QueueItem;
use crate::stores::traits::{KeyValueSlot, QueueStore, QueueStoreError};

/// The slot the whole queue is serialized into.
pub const QUEUE_SLOT_KEY: &str = "scorekeeper-offline-queue";

const PROBE_SLOT_KEY: &str = "scorekeeper-offline-queue.probe";

/// Keeps the entire queue as one JSON array in a single key-value slot. Every read deserializes
/// the full array and every write reserializes and overwrites it. Slot access is synchronous so
/// each operation's read-modify-write can't interleave with another on the same thread.
pub struct KeyValueQueueStore<S: KeyValueSlot> {
    slot: S,
}

impl<S: KeyValueSlot> KeyValueQueueStore<S> {
    /// Wraps the slot after checking it can actually be written to. Browsers with storage disabled
    /// happily hand out a `Storage` object that throws on every write.
    pub fn open(slot: S) -> Result<Self, QueueStoreError> {
        slot.set_item(PROBE_SLOT_KEY, "1")?;
        slot.remove_item(PROBE_SLOT_KEY)?;

        Ok(Self { slot })
    }

    fn read_items(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        let raw = match self.slot.get_item(QUEUE_SLOT_KEY)? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        serde_json::from_str(&raw).map_err(|err| {
            tracing::error!("queue slot holds undecodable data: {err}");
            QueueStoreError::Corrupt(err.to_string())
        })
    }

    fn write_items(&self, items: &[QueueItem]) -> Result<(), QueueStoreError> {
        let raw = serde_json::to_string(items)
            .map_err(|err| QueueStoreError::Implementation(err.to_string()))?;

        self.slot.set_item(QUEUE_SLOT_KEY, &raw)?;

        Ok(())
    }
}

#[async_trait(?Send)]
impl<S: KeyValueSlot> QueueStore for KeyValueQueueStore<S> {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        let mut items = self.read_items()?;
        let original_len = items.len();
        items.retain(|item| item.id() != id);

        if items.len() != original_len {
            self.write_items(&items)?;
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        let items = self.read_items()?;
        Ok(items.into_iter().find(|item| item.id() == id))
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        self.read_items()
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let mut items = self.read_items()?;

        match items.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }

        self.write_items(&items)
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let mut items = self.read_items()?;
        items.retain(|existing| existing.id() != item.id() && !item.supersedes(existing));
        items.push(item);

        self.write_items(&items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::queue::{MatchLogEntry, QueueItemKind, ScoreUpdate};
    use crate::stores::{MemorySlot, SlotError};

    struct ReadOnlySlot;

    impl KeyValueSlot for ReadOnlySlot {
        fn get_item(&self, _key: &str) -> Result<Option<String>, SlotError> {
            Ok(None)
        }

        fn keys(&self) -> Result<Vec<String>, SlotError> {
            Ok(Vec::new())
        }

        fn remove_item(&self, _key: &str) -> Result<(), SlotError> {
            Err(SlotError::Write("quota exceeded".into()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), SlotError> {
            Err(SlotError::Write("quota exceeded".into()))
        }
    }

    fn log_item(id: &str) -> QueueItem {
        QueueItem::new(
            id.to_string(),
            QueueItemKind::MatchLogAppend(MatchLogEntry::new("M1", "goal", 3)),
            3,
        )
    }

    #[test]
    fn test_open_rejects_unwritable_slot() {
        let result = KeyValueQueueStore::open(ReadOnlySlot);
        assert!(matches!(result, Err(QueueStoreError::WriteFailure(_))));
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_whole_queue_lives_in_one_slot() {
        let store = KeyValueQueueStore::open(MemorySlot::default()).unwrap();
        store.put(log_item("a")).await.unwrap();
        store.put(log_item("b")).await.unwrap();

        let raw = store.slot.get_item(QUEUE_SLOT_KEY).unwrap().unwrap();
        let decoded: Vec<QueueItem> = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(store.slot.get_item(PROBE_SLOT_KEY).unwrap().is_none());

        store.delete("a").await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_put_overwrites_same_id() {
        let store = KeyValueQueueStore::open(MemorySlot::default()).unwrap();
        let mut item = log_item("a");
        store.put(item.clone()).await.unwrap();

        item.record_failure(99);
        store.put(item).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].attempts(), 1);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_upsert_rewrites_without_superseded_score() {
        let store = KeyValueQueueStore::open(MemorySlot::default()).unwrap();
        let first = QueueItem::new(
            "s1".into(),
            QueueItemKind::ScoreUpdate(ScoreUpdate::new("M1", 1, 0)),
            1,
        );
        let second = QueueItem::new(
            "s2".into(),
            QueueItemKind::ScoreUpdate(ScoreUpdate::new("M1", 2, 0)),
            2,
        );

        store.put(log_item("a")).await.unwrap();
        store.upsert_superseding(first).await.unwrap();
        store.upsert_superseding(second).await.unwrap();

        let mut ids: Vec<_> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|item| item.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "s2"]);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_corrupt_slot_is_reported() {
        let slot = MemorySlot::default();
        let store = KeyValueQueueStore::open(slot).unwrap();
        store.slot.set_item(QUEUE_SLOT_KEY, "{not json").unwrap();

        assert!(matches!(
            store.get_all().await,
            Err(QueueStoreError::Corrupt(_))
        ));
    }
}
