//! Local durable queue: recorded plays that the remote store has not
//! yet acknowledged. Survives process restarts; shrinks only when a
//! sync round acknowledges specific events.
//!
//! Persistence is an injected strategy ([`PendingStore`]) so tests can
//! substitute [`MemoryStore`] for the JSON file used in production.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::event::{EventKey, MetadataFields, PatchKind, PlayEvent};

const QUEUE_FILE_NAME: &str = "pending.json";

/// Everything the queue persists: the unsynced events in recording
/// order, and when a sync last succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    #[serde(default)]
    pub pending: Vec<PlayEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<i64>,
}

/// Load/save strategy for the queue state.
pub trait PendingStore: Send {
    fn load(&self) -> Result<QueueState>;
    fn save(&self, state: &QueueState) -> Result<()>;
}

/// Production store: pretty JSON in the data directory. A corrupt
/// file degrades to an empty queue with a warning rather than
/// crashing; real I/O errors on load propagate and are degraded by
/// [`PendingQueue::open`] instead.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default path: `<data_dir>/encore/pending.json`.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .context("Failed to get data directory")?
            .join("encore");
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(data_dir.join(QUEUE_FILE_NAME))
    }

    /// Queue file path inside an explicitly-configured data directory.
    pub fn path_in(dir: &std::path::Path) -> PathBuf {
        dir.join(QUEUE_FILE_NAME)
    }
}

impl PendingStore for JsonFileStore {
    fn load(&self) -> Result<QueueState> {
        if !self.path.exists() {
            return Ok(QueueState::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read queue file {}", self.path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!("Queue file corrupt, starting fresh: {e}");
                Ok(QueueState::default())
            }
        }
    }

    fn save(&self, state: &QueueState) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(state).context("Failed to serialize queue state")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write queue file {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<QueueState>,
}

impl PendingStore for MemoryStore {
    fn load(&self) -> Result<QueueState> {
        let state = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        Ok(state.clone())
    }

    fn save(&self, state: &QueueState) -> Result<()> {
        let mut slot = self
            .state
            .lock()
            .map_err(|e| anyhow::anyhow!("lock poisoned: {e}"))?;
        *slot = state.clone();
        Ok(())
    }
}

/// The queue service object. Appends are write-through: durable
/// before `enqueue` returns, or the error propagates so the caller
/// gets a retry opportunity.
pub struct PendingQueue {
    state: QueueState,
    store: Box<dyn PendingStore>,
}

impl PendingQueue {
    /// Open the queue, loading persisted state. Load failures degrade
    /// to an empty queue; recording must keep working even if the
    /// previous state is unreadable.
    pub fn open(store: Box<dyn PendingStore>) -> Self {
        let state = match store.load() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Could not load pending queue, starting empty: {e}");
                QueueState::default()
            }
        };
        Self { state, store }
    }

    pub fn enqueue(&mut self, event: PlayEvent) -> Result<()> {
        self.state.pending.push(event);
        self.store.save(&self.state)
    }

    /// Clone of the current pending list, in recording order. Sync
    /// rounds operate on a snapshot so concurrent enqueues are never
    /// swept up by an acknowledgement they were not part of.
    pub fn snapshot(&self) -> Vec<PlayEvent> {
        self.state.pending.clone()
    }

    /// Remove exactly the acknowledged events, identified by
    /// `(timestamp, songId)`. Returns how many were removed.
    pub fn drain_acknowledged(&mut self, keys: &[EventKey]) -> Result<usize> {
        let acked: HashSet<&EventKey> = keys.iter().collect();
        let before = self.state.pending.len();
        self.state.pending.retain(|e| !acked.contains(&e.key()));
        let removed = before - self.state.pending.len();
        if removed > 0 {
            self.store.save(&self.state)?;
        }
        Ok(removed)
    }

    pub fn mark_synced(&mut self, at: i64) -> Result<()> {
        self.state.last_synced_at = Some(at);
        self.store.save(&self.state)
    }

    /// Rewrite display metadata on pending events matching the
    /// target. Returns how many events changed.
    pub fn apply_patch(
        &mut self,
        kind: PatchKind,
        target_id: &str,
        fields: &MetadataFields,
    ) -> Result<usize> {
        let mut patched = 0;
        for event in &mut self.state.pending {
            if event.matches_target(kind, target_id) {
                event.apply_patch(fields);
                patched += 1;
            }
        }
        if patched > 0 {
            self.store.save(&self.state)?;
        }
        Ok(patched)
    }

    /// Drop everything (account-level stats reset).
    pub fn clear(&mut self) -> Result<()> {
        self.state = QueueState::default();
        self.store.save(&self.state)
    }

    pub fn events(&self) -> &[PlayEvent] {
        &self.state.pending
    }

    pub fn len(&self) -> usize {
        self.state.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.pending.is_empty()
    }

    pub fn last_synced_at(&self) -> Option<i64> {
        self.state.last_synced_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TrackInfo;

    fn test_event(song_id: &str, timestamp: i64) -> PlayEvent {
        let track = TrackInfo {
            song_id: song_id.to_string(),
            song_name: Some(format!("Song {song_id}")),
            duration_ms: 200_000,
            ..Default::default()
        };
        PlayEvent::from_track(&track, 120_000, timestamp)
    }

    #[test]
    fn test_enqueue_and_snapshot_preserve_order() {
        let mut queue = PendingQueue::open(Box::new(MemoryStore::default()));
        queue.enqueue(test_event("a", 1)).unwrap();
        queue.enqueue(test_event("b", 2)).unwrap();
        queue.enqueue(test_event("c", 3)).unwrap();

        let snap = queue.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].song_id, "a");
        assert_eq!(snap[2].song_id, "c");
    }

    #[test]
    fn test_state_survives_reopen() {
        let store = SharedStore::default();
        {
            let mut queue = PendingQueue::open(Box::new(store.clone()));
            queue.enqueue(test_event("a", 1)).unwrap();
            queue.mark_synced(99).unwrap();
        }
        let queue = PendingQueue::open(Box::new(store));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.last_synced_at(), Some(99));
    }

    #[test]
    fn test_drain_removes_only_acknowledged() {
        let mut queue = PendingQueue::open(Box::new(MemoryStore::default()));
        queue.enqueue(test_event("a", 1)).unwrap();
        queue.enqueue(test_event("b", 2)).unwrap();
        // same song, different millisecond: distinct fact
        queue.enqueue(test_event("a", 3)).unwrap();

        let acked = vec![EventKey {
            timestamp: 1,
            song_id: "a".to_string(),
        }];
        let removed = queue.drain_acknowledged(&acked).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.events()[0].song_id, "b");
        assert_eq!(queue.events()[1].timestamp, 3);
    }

    #[test]
    fn test_drain_with_no_matches_is_noop() {
        let mut queue = PendingQueue::open(Box::new(MemoryStore::default()));
        queue.enqueue(test_event("a", 1)).unwrap();

        let acked = vec![EventKey {
            timestamp: 999,
            song_id: "a".to_string(),
        }];
        assert_eq!(queue.drain_acknowledged(&acked).unwrap(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");
        fs::write(&path, "not json {{").unwrap();

        let queue = PendingQueue::open(Box::new(JsonFileStore::new(path)));
        assert!(queue.is_empty());
        assert!(queue.last_synced_at().is_none());
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");

        let mut queue = PendingQueue::open(Box::new(JsonFileStore::new(path.clone())));
        queue.enqueue(test_event("a", 1)).unwrap();
        queue.enqueue(test_event("b", 2)).unwrap();

        let reopened = PendingQueue::open(Box::new(JsonFileStore::new(path)));
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.events()[0].song_id, "a");
    }

    #[test]
    fn test_save_failure_propagates_and_keeps_event() {
        let dir = tempfile::tempdir().unwrap();
        // point at a directory so writes fail
        let mut queue = PendingQueue::open(Box::new(JsonFileStore::new(dir.path().to_path_buf())));

        let result = queue.enqueue(test_event("a", 1));
        assert!(result.is_err());
        // still in memory for a retry
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_patch_rewrites_matching_pending_events() {
        let mut queue = PendingQueue::open(Box::new(MemoryStore::default()));
        queue.enqueue(test_event("x", 1)).unwrap();
        queue.enqueue(test_event("y", 2)).unwrap();
        queue.enqueue(test_event("x", 3)).unwrap();

        let fields = MetadataFields {
            song_name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let patched = queue.apply_patch(PatchKind::Song, "x", &fields).unwrap();

        assert_eq!(patched, 2);
        assert_eq!(queue.events()[0].song_name, "Renamed");
        assert_eq!(queue.events()[1].song_name, "Song y");
        assert_eq!(queue.events()[2].song_name, "Renamed");
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut queue = PendingQueue::open(Box::new(MemoryStore::default()));
        queue.enqueue(test_event("a", 1)).unwrap();
        queue.mark_synced(50).unwrap();

        queue.clear().unwrap();
        assert!(queue.is_empty());
        assert!(queue.last_synced_at().is_none());
    }

    /// Arc-wrapped store so a test can reopen "the same file".
    #[derive(Default, Clone)]
    struct SharedStore(std::sync::Arc<MemoryStore>);

    impl PendingStore for SharedStore {
        fn load(&self) -> Result<QueueState> {
            self.0.load()
        }
        fn save(&self, state: &QueueState) -> Result<()> {
            self.0.save(state)
        }
    }
}
