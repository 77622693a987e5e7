use async_trait::async_trait;

use crate::queue::{MatchLogEntry, ScoreUpdate};

/// The two backend writes the offline queue delivers. Both must tolerate being called more than
/// once for the same logical write: setting a score is naturally idempotent, appending a log
/// entry may at worst produce a single duplicate record.
#[async_trait(?Send)]
pub trait MatchWriter {
    async fn append_match_log(&self, entry: &MatchLogEntry) -> Result<(), RemoteWriteError>;

    /// Overwrites the authoritative score of the match, last write wins.
    async fn set_match_score(&self, update: &ScoreUpdate) -> Result<(), RemoteWriteError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Worth retrying later: connectivity, timeouts, server errors, rate limiting.
    Transient,

    /// The backend rejected the write itself and will keep doing so.
    Permanent,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind:?} remote write failure: {message}")]
pub struct RemoteWriteError {
    kind: RemoteErrorKind,
    message: String,
}

impl RemoteWriteError {
    pub fn is_permanent(&self) -> bool {
        self.kind == RemoteErrorKind::Permanent
    }

    pub fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            message: message.into(),
        }
    }
}
