use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use async_std::sync::Mutex;
use async_trait::async_trait;

use crate::queue::QueueItem;
use crate::stores::traits::{KeyValueSlot, QueueStore, QueueStoreError, SlotError, StoreOpener};
use crate::stores::{KeyValueQueueStore, MemoryQueueStore};

/// The durability tiers the queue can end up on, best first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Transactional record store (IndexedDB in the browser, a file per item natively).
    RecordStore,

    /// A single key-value slot holding the serialized queue (`localStorage` in the browser).
    KeyValue,

    /// Process memory, nothing survives a restart.
    Memory,
}

impl Display for StoreBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreBackend::RecordStore => "record-store",
            StoreBackend::KeyValue => "key-value",
            StoreBackend::Memory => "memory",
        };

        f.write_str(name)
    }
}

/// A selected backend paired with an in-memory safety net.
///
/// Writes that fail on the selected backend (quota exceeded, storage revoked mid session) land in
/// memory instead of surfacing an error, losing durability for that item but keeping the write
/// path working. Reads merge both tiers with the memory copy taking precedence since it is always
/// the more recent write.
///
/// An upsert that only reached memory keeps hiding the older items it superseded on the selected
/// backend, even after it has been delivered and removed, until a later upsert for the same
/// target reaches the backend again.
pub struct FallbackQueueStore {
    backend: StoreBackend,
    primary: Option<Box<dyn QueueStore>>,
    memory: MemoryQueueStore,
    shadows: RefCell<Vec<QueueItem>>,
}

impl FallbackQueueStore {
    pub fn backend(&self) -> StoreBackend {
        self.backend
    }

    pub fn memory_only() -> Self {
        Self {
            backend: StoreBackend::Memory,
            primary: None,
            memory: MemoryQueueStore::default(),
            shadows: RefCell::new(Vec::new()),
        }
    }

    pub fn new(backend: StoreBackend, primary: Box<dyn QueueStore>) -> Self {
        Self {
            backend,
            primary: Some(primary),
            memory: MemoryQueueStore::default(),
            shadows: RefCell::new(Vec::new()),
        }
    }

    fn is_shadowed(&self, item: &QueueItem) -> bool {
        self.shadows.borrow().iter().any(|newer| {
            newer.supersedes(item) && QueueItem::queue_order(item, newer) == Ordering::Less
        })
    }

    /// Best effort removal of the items `item` supersedes from the selected backend after the
    /// upsert itself had to go to memory. Whatever can't be removed stays hidden by the shadow.
    async fn purge_superseded(&self, primary: &dyn QueueStore, item: &QueueItem) {
        let existing = match primary.get_all().await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::warn!(item_id = item.id(), backend = %self.backend, "unable to list superseded queue items: {err}");
                return;
            }
        };

        for old in existing.iter().filter(|old| item.supersedes(old)) {
            if let Err(err) = primary.delete(old.id()).await {
                tracing::warn!(item_id = old.id(), backend = %self.backend, "failed to remove superseded queue item: {err}");
            }
        }
    }
}

#[async_trait(?Send)]
impl QueueStore for FallbackQueueStore {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        if let Some(primary) = &self.primary {
            if let Err(err) = primary.delete(id).await {
                // The item may be delivered again later, which the backend tolerates
                tracing::warn!(item_id = id, backend = %self.backend, "failed to delete queue item: {err}");
            }
        }

        self.memory.delete(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        if let Some(item) = self.memory.get(id).await? {
            return Ok(Some(item));
        }

        let primary = match &self.primary {
            Some(primary) => primary,
            None => return Ok(None),
        };

        match primary.get(id).await {
            Ok(item) => Ok(item.filter(|item| !self.is_shadowed(item))),
            Err(err) => {
                tracing::warn!(item_id = id, backend = %self.backend, "failed to read queue item: {err}");
                Ok(None)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        let memory_items = self.memory.get_all().await?;

        let primary_items = match &self.primary {
            Some(primary) => primary.get_all().await.unwrap_or_else(|err| {
                tracing::warn!(backend = %self.backend, "failed to list queue items: {err}");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut merged: HashMap<String, QueueItem> = primary_items
            .into_iter()
            .filter(|item| !memory_items.iter().any(|newer| newer.supersedes(item)))
            .filter(|item| !self.is_shadowed(item))
            .map(|item| (item.id().to_string(), item))
            .collect();

        for item in memory_items {
            merged.insert(item.id().to_string(), item);
        }

        Ok(merged.into_values().collect())
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let primary = match &self.primary {
            Some(primary) => primary,
            None => return self.memory.put(item).await,
        };

        match primary.put(item.clone()).await {
            Ok(()) => self.memory.delete(item.id()).await,
            Err(err) => {
                tracing::warn!(item_id = item.id(), backend = %self.backend, "falling back to memory for queue write: {err}");
                self.memory.put(item).await
            }
        }
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let primary = match &self.primary {
            Some(primary) => primary,
            None => return self.memory.upsert_superseding(item).await,
        };

        match primary.upsert_superseding(item.clone()).await {
            Ok(()) => {
                self.shadows
                    .borrow_mut()
                    .retain(|shadow| !item.supersedes(shadow));
                self.memory.remove_superseded_by(&item).await;
                self.memory.delete(item.id()).await
            }
            Err(err) => {
                tracing::warn!(item_id = item.id(), backend = %self.backend, "falling back to memory for queue upsert: {err}");
                self.memory.upsert_superseding(item.clone()).await?;
                self.shadows.borrow_mut().push(item.clone());
                self.purge_superseded(&**primary, &item).await;
                Ok(())
            }
        }
    }
}

/// Picks the storage tier the first time it's needed and keeps using it for the lifetime of this
/// value. Openers are tried in order, the first one to open successfully wins. When they all fail
/// the queue runs purely in memory.
pub struct LazyQueueStore {
    state: Mutex<LazyState>,
}

enum LazyState {
    Pending(Vec<Box<dyn StoreOpener>>),
    Ready(Rc<FallbackQueueStore>),
}

impl LazyQueueStore {
    pub async fn active_backend(&self) -> StoreBackend {
        self.resolve().await.backend()
    }

    pub fn new(openers: Vec<Box<dyn StoreOpener>>) -> Self {
        Self {
            state: Mutex::new(LazyState::Pending(openers)),
        }
    }

    async fn resolve(&self) -> Rc<FallbackQueueStore> {
        // Holding the lock across the opens keeps concurrent first callers from racing to open
        // two different backends.
        let mut state = self.state.lock().await;

        let store = match &mut *state {
            LazyState::Ready(store) => return store.clone(),
            LazyState::Pending(openers) => Rc::new(select_store(std::mem::take(openers)).await),
        };

        *state = LazyState::Ready(store.clone());
        store
    }
}

#[async_trait(?Send)]
impl QueueStore for LazyQueueStore {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        self.resolve().await.delete(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        self.resolve().await.get(id).await
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        self.resolve().await.get_all().await
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        self.resolve().await.put(item).await
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        self.resolve().await.upsert_superseding(item).await
    }
}

/// Tries each opener in order and wraps the first backend that opens in a
/// [`FallbackQueueStore`].
pub async fn select_store(openers: Vec<Box<dyn StoreOpener>>) -> FallbackQueueStore {
    for opener in openers {
        let backend = opener.backend();

        if backend == StoreBackend::Memory {
            tracing::info!("offline queue running in memory only");
            return FallbackQueueStore::memory_only();
        }

        match opener.open().await {
            Ok(store) => {
                tracing::info!(%backend, "offline queue storage selected");
                return FallbackQueueStore::new(backend, store);
            }
            Err(err) => {
                tracing::warn!(%backend, "offline queue storage unavailable: {err}");
            }
        }
    }

    tracing::warn!("no offline queue storage could be opened, items won't survive a restart");
    FallbackQueueStore::memory_only()
}

/// Always succeeds, terminates an opener chain.
pub struct MemoryOpener;

#[async_trait(?Send)]
impl StoreOpener for MemoryOpener {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
        Ok(Box::new(MemoryQueueStore::default()))
    }
}

type SlotFactory = Box<dyn Fn() -> Result<Box<dyn KeyValueSlot>, SlotError>>;

/// Opens a [`KeyValueQueueStore`] over whatever slot the factory produces.
pub struct KeyValueOpener {
    factory: SlotFactory,
}

impl KeyValueOpener {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn KeyValueSlot>, SlotError> + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

#[async_trait(?Send)]
impl StoreOpener for KeyValueOpener {
    fn backend(&self) -> StoreBackend {
        StoreBackend::KeyValue
    }

    async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
        let slot = (self.factory)()?;
        Ok(Box::new(KeyValueQueueStore::open(slot)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use crate::queue::{MatchLogEntry, QueueItemKind, ScoreUpdate};
    use crate::stores::MemorySlot;

    /// A backend that opened fine but fails every operation afterwards.
    struct BrokenStore;

    #[async_trait(?Send)]
    impl QueueStore for BrokenStore {
        async fn delete(&self, _id: &str) -> Result<(), QueueStoreError> {
            Err(QueueStoreError::WriteFailure("quota exceeded".into()))
        }

        async fn get(&self, _id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
            Err(QueueStoreError::Implementation("broken".into()))
        }

        async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
            Err(QueueStoreError::Implementation("broken".into()))
        }

        async fn put(&self, _item: QueueItem) -> Result<(), QueueStoreError> {
            Err(QueueStoreError::WriteFailure("quota exceeded".into()))
        }

        async fn upsert_superseding(&self, _item: QueueItem) -> Result<(), QueueStoreError> {
            Err(QueueStoreError::WriteFailure("quota exceeded".into()))
        }
    }

    /// Reads always work, writes and deletes only while the switches allow them.
    #[derive(Clone, Default)]
    struct ReadOnlyAfterSwitch {
        inner: Rc<MemoryQueueStore>,
        writes_fail: Rc<Cell<bool>>,
        deletes_fail: Rc<Cell<bool>>,
    }

    #[async_trait(?Send)]
    impl QueueStore for ReadOnlyAfterSwitch {
        async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
            if self.deletes_fail.get() {
                return Err(QueueStoreError::WriteFailure("read only".into()));
            }

            self.inner.delete(id).await
        }

        async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
            self.inner.get(id).await
        }

        async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
            self.inner.get_all().await
        }

        async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
            if self.writes_fail.get() {
                return Err(QueueStoreError::WriteFailure("quota exceeded".into()));
            }

            self.inner.put(item).await
        }

        async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
            if self.writes_fail.get() {
                return Err(QueueStoreError::WriteFailure("quota exceeded".into()));
            }

            self.inner.upsert_superseding(item).await
        }
    }

    struct UnavailableOpener;

    #[async_trait(?Send)]
    impl StoreOpener for UnavailableOpener {
        fn backend(&self) -> StoreBackend {
            StoreBackend::RecordStore
        }

        async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
            Err(QueueStoreError::Unavailable("no indexeddb here".into()))
        }
    }

    struct CountingOpener(Rc<Cell<usize>>);

    #[async_trait(?Send)]
    impl StoreOpener for CountingOpener {
        fn backend(&self) -> StoreBackend {
            StoreBackend::RecordStore
        }

        async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
            self.0.set(self.0.get() + 1);
            Ok(Box::new(MemoryQueueStore::default()))
        }
    }

    fn log_item(id: &str) -> QueueItem {
        QueueItem::new(
            id.to_string(),
            QueueItemKind::MatchLogAppend(MatchLogEntry::new("M1", "goal", 1)),
            1,
        )
    }

    fn score_item(id: &str, score_a: u32) -> QueueItem {
        QueueItem::new(
            id.to_string(),
            QueueItemKind::ScoreUpdate(ScoreUpdate::new("M1", score_a, 0)),
            score_a as i64,
        )
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_selection_skips_unavailable_backends() {
        let openers: Vec<Box<dyn StoreOpener>> = vec![
            Box::new(UnavailableOpener),
            Box::new(KeyValueOpener::new(|| {
                Ok(Box::new(MemorySlot::default()) as Box<dyn KeyValueSlot>)
            })),
            Box::new(MemoryOpener),
        ];

        let store = LazyQueueStore::new(openers);
        assert_eq!(store.active_backend().await, StoreBackend::KeyValue);

        store.put(log_item("a")).await.unwrap();
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        assert_eq!(store.active_backend().await, StoreBackend::KeyValue);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_exhausted_chain_runs_in_memory() {
        let openers: Vec<Box<dyn StoreOpener>> = vec![
            Box::new(UnavailableOpener),
            Box::new(KeyValueOpener::new(|| {
                Err(SlotError::Unavailable("storage disabled".into()))
            })),
        ];

        let store = LazyQueueStore::new(openers);
        assert_eq!(store.active_backend().await, StoreBackend::Memory);

        store.put(log_item("a")).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_selection_happens_once() {
        let opens = Rc::new(Cell::new(0));
        let store = LazyQueueStore::new(vec![
            Box::new(CountingOpener(opens.clone())),
            Box::new(MemoryOpener),
        ]);

        store.put(log_item("a")).await.unwrap();
        store.get_all().await.unwrap();
        assert_eq!(store.active_backend().await, StoreBackend::RecordStore);
        assert_eq!(opens.get(), 1);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_failed_writes_land_in_memory() {
        let store = FallbackQueueStore::new(StoreBackend::RecordStore, Box::new(BrokenStore));

        store.put(log_item("a")).await.unwrap();
        store.upsert_superseding(score_item("s1", 1)).await.unwrap();
        store.upsert_superseding(score_item("s2", 2)).await.unwrap();

        let mut ids: Vec<_> = store
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|item| item.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "s2"]);

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_memory_copy_shadows_stale_primary_copy() {
        let primary = MemoryQueueStore::default();
        let stale = score_item("s1", 1);
        primary.put(stale.clone()).await.unwrap();

        let store = FallbackQueueStore::new(StoreBackend::RecordStore, Box::new(primary));

        // Simulate a newer copy that only made it to memory
        let mut newer = stale.clone();
        newer.record_failure(50);
        store.memory.put(newer.clone()).await.unwrap();

        assert_eq!(store.get("s1").await.unwrap(), Some(newer.clone()));
        assert_eq!(store.get_all().await.unwrap(), vec![newer]);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_memory_upsert_removes_superseded_primary_copy() {
        let primary = ReadOnlyAfterSwitch::default();
        let store = FallbackQueueStore::new(StoreBackend::RecordStore, Box::new(primary.clone()));

        store.upsert_superseding(score_item("s1", 1)).await.unwrap();
        primary.writes_fail.set(true);
        store.upsert_superseding(score_item("s2", 2)).await.unwrap();

        assert!(primary.inner.get("s1").await.unwrap().is_none());
        assert_eq!(store.get_all().await.unwrap(), vec![score_item("s2", 2)]);
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen_test::wasm_bindgen_test)]
    #[cfg_attr(not(target_arch = "wasm32"), tokio::test)]
    async fn test_superseded_primary_copy_stays_hidden_after_delivery() {
        let primary = ReadOnlyAfterSwitch::default();
        let store = FallbackQueueStore::new(StoreBackend::RecordStore, Box::new(primary.clone()));

        store.upsert_superseding(score_item("s1", 1)).await.unwrap();
        primary.writes_fail.set(true);
        primary.deletes_fail.set(true);
        store.upsert_superseding(score_item("s2", 2)).await.unwrap();

        // The stale copy is still on disk but must never come back
        assert!(primary.inner.get("s1").await.unwrap().is_some());
        assert_eq!(store.get_all().await.unwrap(), vec![score_item("s2", 2)]);

        store.delete("s2").await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
        assert!(store.get("s1").await.unwrap().is_none());

        // A newer upsert that reaches the backend again is visible as usual
        primary.writes_fail.set(false);
        primary.deletes_fail.set(false);
        store.upsert_superseding(score_item("s3", 3)).await.unwrap();

        assert_eq!(store.get_all().await.unwrap(), vec![score_item("s3", 3)]);
        assert!(primary.inner.get("s1").await.unwrap().is_none());
    }
}
