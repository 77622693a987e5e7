use std::collections::HashMap;

use async_std::sync::RwLock;
use async_trait::async_trait;

use crate::queue::QueueItem;
use crate::stores::traits::{QueueStore, QueueStoreError};

/// Last resort tier: items only live as long as the process. Never fails.
#[derive(Default)]
pub struct MemoryQueueStore {
    items: RwLock<HashMap<String, QueueItem>>,
}

impl MemoryQueueStore {
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    pub(crate) async fn remove_superseded_by(&self, item: &QueueItem) {
        self.items
            .write()
            .await
            .retain(|_, existing| !item.supersedes(existing));
    }
}

#[async_trait(?Send)]
impl QueueStore for MemoryQueueStore {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        self.items.write().await.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        self.items.write().await.insert(item.id().to_string(), item);
        Ok(())
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let mut items = self.items.write().await;
        items.retain(|_, existing| !item.supersedes(existing));
        items.insert(item.id().to_string(), item);
        Ok(())
    }
}
