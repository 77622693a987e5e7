//! Storage seams for the offline queue and the query cache, plus the backends available on every
//! target. Browser specific backends live under `crate::wasm::browser_store`.

mod fallback_store;
mod key_value_queue_store;
mod memory_queue_store;
mod memory_slot;
mod traits;

#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
mod file_slot;
#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
mod local_queue_store;

pub use fallback_store::{
    select_store, FallbackQueueStore, KeyValueOpener, LazyQueueStore, MemoryOpener, StoreBackend,
};
pub use key_value_queue_store::{KeyValueQueueStore, QUEUE_SLOT_KEY};
pub use memory_queue_store::MemoryQueueStore;
pub use memory_slot::MemorySlot;
pub use traits::{KeyValueSlot, QueueStore, QueueStoreError, SlotError, StoreOpener};

#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
pub use file_slot::FileSlot;
#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
pub use local_queue_store::LocalQueueStore;

#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
fn default_data_dir() -> Result<std::path::PathBuf, QueueStoreError> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("org", "Scorekeeper", "scorekeeper-sync").ok_or_else(|| {
        QueueStoreError::Unavailable("no home directory to place the data directory in".into())
    })?;

    Ok(proj_dirs.data_dir().to_owned())
}

/// Opens the record-per-file store in the platform data directory.
#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
pub struct LocalOpener;

#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
#[async_trait::async_trait(?Send)]
impl StoreOpener for LocalOpener {
    fn backend(&self) -> StoreBackend {
        StoreBackend::RecordStore
    }

    async fn open(&self) -> Result<Box<dyn QueueStore>, QueueStoreError> {
        Ok(Box::new(LocalQueueStore::open_default()?))
    }
}

/// The backend chain used when the caller doesn't provide one: the best durable store available
/// on this target, then a single key-value slot, then memory.
#[cfg(all(feature = "local-store", not(target_arch = "wasm32")))]
pub fn default_openers() -> Vec<Box<dyn StoreOpener>> {
    vec![
        Box::new(LocalOpener),
        Box::new(KeyValueOpener::new(|| {
            Ok(Box::new(FileSlot::open_default("slots")?) as Box<dyn KeyValueSlot>)
        })),
        Box::new(MemoryOpener),
    ]
}

#[cfg(all(not(feature = "local-store"), not(target_arch = "wasm32")))]
pub fn default_openers() -> Vec<Box<dyn StoreOpener>> {
    vec![Box::new(MemoryOpener)]
}

#[cfg(target_arch = "wasm32")]
pub fn default_openers() -> Vec<Box<dyn StoreOpener>> {
    crate::wasm::browser_store::browser_openers()
}
