use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::queue::QueueItem;
use crate::stores::traits::{QueueStore, QueueStoreError};

const ITEM_EXTENSION: &str = "item";

/// Record-per-file store used as the durable tier on native targets. Each queue item lives in its
/// own JSON file named after its (base64url encoded) id so writes never touch unrelated items.
pub struct LocalQueueStore {
    data_dir: PathBuf,
}

impl LocalQueueStore {
    fn item_path(&self, id: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(id.as_bytes());
        self.data_dir.join(format!("{name}.{ITEM_EXTENSION}"))
    }

    /// Opens (creating if needed) the queue directory inside the platform data directory.
    pub fn open_default() -> Result<Self, QueueStoreError> {
        let data_dir = super::default_data_dir()?.join("queue");
        Self::open(data_dir)
    }

    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, QueueStoreError> {
        let data_dir = data_dir.into();

        std::fs::create_dir_all(&data_dir).map_err(|err| {
            QueueStoreError::Unavailable(format!("{}: {err}", data_dir.display()))
        })?;

        Ok(Self { data_dir })
    }

    fn read_item(path: &Path) -> Result<Option<QueueItem>, QueueStoreError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(QueueStoreError::Implementation(err.to_string())),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| QueueStoreError::Corrupt(format!("{}: {err}", path.display())))
    }

    fn write_item(&self, item: &QueueItem) -> Result<(), QueueStoreError> {
        let path = self.item_path(item.id());
        let tmp_path = path.with_extension("tmp");

        let raw = serde_json::to_vec(item)
            .map_err(|err| QueueStoreError::Implementation(err.to_string()))?;

        // Write then rename so a crash mid write never leaves a half item behind
        std::fs::write(&tmp_path, raw)
            .map_err(|err| QueueStoreError::WriteFailure(err.to_string()))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|err| QueueStoreError::WriteFailure(err.to_string()))?;

        Ok(())
    }
}

#[async_trait(?Send)]
impl QueueStore for LocalQueueStore {
    async fn delete(&self, id: &str) -> Result<(), QueueStoreError> {
        match std::fs::remove_file(self.item_path(id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(QueueStoreError::WriteFailure(err.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueStoreError> {
        Self::read_item(&self.item_path(id))
    }

    async fn get_all(&self) -> Result<Vec<QueueItem>, QueueStoreError> {
        let entries = std::fs::read_dir(&self.data_dir)
            .map_err(|err| QueueStoreError::Implementation(err.to_string()))?;

        let mut items = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| QueueStoreError::Implementation(err.to_string()))?
                .path();

            if path.extension().and_then(|ext| ext.to_str()) != Some(ITEM_EXTENSION) {
                continue;
            }

            if let Some(item) = Self::read_item(&path)? {
                items.push(item);
            }
        }

        Ok(items)
    }

    async fn put(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        self.write_item(&item)
    }

    async fn upsert_superseding(&self, item: QueueItem) -> Result<(), QueueStoreError> {
        let superseded: Vec<String> = self
            .get_all()
            .await?
            .into_iter()
            .filter(|existing| item.supersedes(existing))
            .map(|existing| existing.id().to_string())
            .collect();

        // The new item goes down first, an interrupted upsert can leave a stale duplicate score
        // behind but never loses the latest one.
        self.write_item(&item)?;

        for id in superseded {
            self.delete(&id).await?;
        }

        Ok(())
    }
}
