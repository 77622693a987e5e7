use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::stores::traits::{KeyValueSlot, SlotError};

const SLOT_EXTENSION: &str = "slot";

/// Native counterpart to `localStorage`: one small file per key in a directory.
pub struct FileSlot {
    data_dir: PathBuf,
}

impl FileSlot {
    fn key_path(&self, key: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.data_dir.join(format!("{name}.{SLOT_EXTENSION}"))
    }

    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, SlotError> {
        let data_dir = data_dir.into();

        std::fs::create_dir_all(&data_dir)
            .map_err(|err| SlotError::Unavailable(format!("{}: {err}", data_dir.display())))?;

        Ok(Self { data_dir })
    }

    /// Slots in the platform data directory under the provided namespace (for example `slots` or
    /// `query-cache`).
    pub fn open_default(namespace: &str) -> Result<Self, SlotError> {
        let data_dir = super::default_data_dir()
            .map_err(|err| SlotError::Unavailable(err.to_string()))?
            .join(namespace);

        Self::open(data_dir)
    }
}

impl KeyValueSlot for FileSlot {
    fn get_item(&self, key: &str) -> Result<Option<String>, SlotError> {
        match std::fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SlotError::Read(err.to_string())),
        }
    }

    fn keys(&self) -> Result<Vec<String>, SlotError> {
        let entries =
            std::fs::read_dir(&self.data_dir).map_err(|err| SlotError::Read(err.to_string()))?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| SlotError::Read(err.to_string()))?.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some(SLOT_EXTENSION) {
                continue;
            }

            let decoded = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| URL_SAFE_NO_PAD.decode(stem).ok())
                .and_then(|raw| String::from_utf8(raw).ok());

            match decoded {
                Some(key) => keys.push(key),
                None => tracing::warn!(path = %path.display(), "ignoring unrecognized slot file"),
            }
        }

        Ok(keys)
    }

    fn remove_item(&self, key: &str) -> Result<(), SlotError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SlotError::Write(err.to_string())),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), SlotError> {
        let path = self.key_path(key);
        let tmp_path = path.with_extension("tmp");

        std::fs::write(&tmp_path, value).map_err(|err| SlotError::Write(err.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|err| SlotError::Write(err.to_string()))
    }
}
