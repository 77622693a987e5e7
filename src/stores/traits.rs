use async_trait::async_trait;

use crate::queue::QueueItem;
use crate::stores::StoreBackend;

/// The core storage trait for the offline queue. Every durability tier (IndexedDB, a single
/// serialized key-value slot, plain process memory) implements this so the queue never needs to
/// know which one it ended up with.
///
/// All operations are asynchronous regardless of the backend. Implementors should keep each call
/// self-contained (open, act, close) and never hold locks between calls.
#[async_trait(?Send)]
pub trait QueueStore {
    /// Remove the item with the provided id. Removing an id that isn't present is not an error.
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError>;

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError>;

    /// Returns every stored item. No ordering is guaranteed, callers that care about creation
    /// order need to sort the result themselves.
    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError>;

    /// Insert or overwrite the item keyed by its id.
    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError>;

    /// Stores the item and removes every existing item it supersedes (see
    /// [`QueueItem::supersedes`]) as a single step. Implementors must not expose a state where
    /// both the new item and a superseded one are visible, or where neither is.
    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError>;
}

/// Synchronous string slots, modelled on the browser's `localStorage`. Used both as the simple
/// durability tier for the queue (one slot holding the whole serialized queue) and as the
/// persistent tier of the query cache.
pub trait KeyValueSlot {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError>;

    /// All keys currently present. Used for prefix invalidation so it doesn't need to be cheap.
    fn keys(&self) -> Result<Vec<String>, SlotError>;

    fn remove_item(&self, key: &str) -> Result<(), SlotError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError>;
}

/// One entry in the ordered list of backends tried when the queue storage is first needed. The
/// first opener that succeeds is used for the rest of the process lifetime.
#[async_trait(?Send)]
pub trait StoreOpener {
    fn backend(&self) -> StoreBackend;

    async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError>;
}

#[async_trait(?Send)]
impl<S: QueueStore + ?Sized> QueueStore for Box<S> {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        (**self).delete(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        (**self).get(id).await
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        (**self).get_all().await
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        (**self).put(item).await
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        (**self).upsert_superseding(item).await
    }
}

impl<S: KeyValueSlot + ?Sized> KeyValueSlot for Box<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError> {
        (**self).get_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, SlotError> {
        (**self).keys()
    }

    fn remove_item(&self, key: &str) -> Result<(), SlotError> {
        (**self).remove_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError> {
        (**self).set_item(key, value)
    }
}

impl<S: KeyValueSlot + ?Sized> KeyValueSlot for std::rc::Rc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError> {
        (**self).get_item(key)
    }

    fn keys(&self) -> Result<Vec<String>, SlotError> {
        (**self).keys()
    }

    fn remove_item(&self, key: &str) -> Result<(), SlotError> {
        (**self).remove_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError> {
        (**self).set_item(key, value)
    }
}

/// Various common errors that can be produced by any of the queue storage backends.
#[derive(Debug, thiserror::Error)]
pub enum QueueStoreError {
    /// An error that couldn't be represented by one of the standard error types, representing some
    /// kind of error specific to the underlying implementation.
    #[error("implementation specific error: {0}")]
    Implementation(String),

    /// Stored data couldn't be decoded back into queue items. The slot or record is left alone so
    /// it can be inspected, but the backend should be considered unusable until it is fixed.
    #[error("stored queue data is corrupt: {0}")]
    Corrupt(String),

    /// The backend doesn't exist in this environment or refused to open (private browsing,
    /// storage disabled, missing data directory).
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// The backend accepted the request but failed to persist it, quota errors end up here.
    #[error("failed to write queue data: {0}")]
    WriteFailure(String),
}

impl From<SlotError> for QueueStoreError {
    fn from(err: SlotError) -> Self {
        match err {
            SlotError::Unavailable(msg) => QueueStoreError::Unavailable(msg),
            SlotError::Write(msg) => QueueStoreError::WriteFailure(msg),
            SlotError::Read(msg) => QueueStoreError::Implementation(msg),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("failed to read slot: {0}")]
    Read(String),

    #[error("key-value storage unavailable: {0}")]
    Unavailable(String),

    #[error("failed to write slot: {0}")]
    Write(String),
}
