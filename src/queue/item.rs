use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

const QUEUE_ID_PREFIX: &str = "oq";

static QUEUE_ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A discrete event recorded against a match (goal, turnover, timeout, ...). These are appended
/// to the remote match log exactly as recorded and are never merged with one another.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchLogEntry {
    pub match_id: String,
    pub event_code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    /// Players involved in the event, in the order the scorekeeper entered them (e.g. scorer
    /// then assist).
    #[serde(default)]
    pub actor_ids: Vec<String>,

    /// When the event happened on the field, unix milliseconds.
    pub recorded_at: i64,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MatchLogEntry {
    pub fn new(match_id: impl Into<String>, event_code: impl Into<String>, recorded_at: i64) -> Self {
        Self {
            match_id: match_id.into(),
            event_code: event_code.into(),
            team_id: None,
            actor_ids: Vec::new(),
            recorded_at,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_ids.push(actor_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = Some(team_id.into());
        self
    }
}

/// The authoritative score of a match. Only the latest one for any match is worth delivering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub match_id: String,
    pub score_a: u32,
    pub score_b: u32,
}

impl ScoreUpdate {
    pub fn new(match_id: impl Into<String>, score_a: u32, score_b: u32) -> Self {
        Self {
            match_id: match_id.into(),
            score_a,
            score_b,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueItemKind {
    MatchLogAppend(MatchLogEntry),
    ScoreUpdate(ScoreUpdate),
}

impl QueueItemKind {
    pub fn match_id(&self) -> &str {
        match self {
            QueueItemKind::MatchLogAppend(entry) => &entry.match_id,
            QueueItemKind::ScoreUpdate(update) => &update.match_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueItemKind::MatchLogAppend(_) => "match_log_append",
            QueueItemKind::ScoreUpdate(_) => "score_update",
        }
    }
}

/// A remote write that hasn't been confirmed by the backend yet.
///
/// Everything except the attempt bookkeeping is fixed at creation, and only the drain processor
/// records failures through [`QueueItem::record_failure`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    id: String,
    kind: QueueItemKind,
    created_at: i64,
    attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<i64>,
}

impl QueueItem {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Generates a fresh storage id: prefix, creation time, a process local sequence number (so
    /// items created within the same millisecond still sort in creation order) and a random tail.
    pub fn generate_id(created_at: i64) -> String {
        let sequence = QUEUE_ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!(
            "{QUEUE_ID_PREFIX}_{created_at}_{sequence:06}_{}",
            crate::utils::random_suffix(8)
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &QueueItemKind {
        &self.kind
    }

    pub fn last_attempt_at(&self) -> Option<i64> {
        self.last_attempt_at
    }

    pub fn match_id(&self) -> &str {
        self.kind.match_id()
    }

    pub fn new(id: String, kind: QueueItemKind, created_at: i64) -> Self {
        Self {
            id,
            kind,
            created_at,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Ordering used when draining, oldest first. Ties on the creation time fall back to the id
    /// which embeds the creation sequence.
    pub(crate) fn queue_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }

    pub(crate) fn record_failure(&mut self, now_ms: i64) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now_ms);
    }

    /// Whether storing `self` should evict `other`. Score updates replace any older pending score
    /// update for the same match, log appends never replace anything.
    pub fn supersedes(&self, other: &QueueItem) -> bool {
        match (&self.kind, &other.kind) {
            (QueueItemKind::ScoreUpdate(new), QueueItemKind::ScoreUpdate(old)) => {
                new.match_id == old.match_id && self.id != other.id
            }
            _ => false,
        }
    }
}
