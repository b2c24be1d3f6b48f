//! Server-side event store backed by redb.
//!
//! Namespace-partitioned append log with two tables:
//!   events:      (namespace, timestamp, song_id) → PlayEvent JSON
//!   namespaces:  namespace → proof token (bound on first write)
//!
//! The composite key makes appends idempotent (a re-delivered event
//! overwrites its earlier copy) and range queries a single ordered
//! scan. redb's single-writer transactions serialize writes, which
//! covers the per-namespace write-serialization requirement.

use std::path::Path;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

use crate::event::{MetadataFields, PatchKind, PlayEvent};

const EVENTS: TableDefinition<(&str, i64, &str), &[u8]> = TableDefinition::new("events");
const NAMESPACES: TableDefinition<&str, &str> = TableDefinition::new("namespaces");

/// Outcome of checking a proof token against a namespace binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Token matches the stored binding.
    Valid,
    /// Namespace has a binding and this token is not it.
    Mismatch,
    /// Namespace has never been written to.
    Unregistered,
}

pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn create(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("failed to create redb at {}", path.display()))?;
        {
            let txn = db.begin_write()?;
            txn.open_table(EVENTS)?;
            txn.open_table(NAMESPACES)?;
            txn.commit()?;
        }
        Ok(Self { db })
    }

    pub fn token_status(&self, namespace: &str, token: &str) -> Result<TokenStatus> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(NAMESPACES)?;
        match table.get(namespace)? {
            Some(bound) if bound.value() == token => Ok(TokenStatus::Valid),
            Some(_) => Ok(TokenStatus::Mismatch),
            None => Ok(TokenStatus::Unregistered),
        }
    }

    /// Bind the proof token presented by the first write to a fresh
    /// namespace. The key being unguessable is what makes
    /// first-come binding safe.
    pub fn register_token(&self, namespace: &str, token: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(NAMESPACES)?;
            table.insert(namespace, token)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Append a batch. Each record is validated individually; the
    /// valid subset is inserted and the rest counted as skipped.
    /// Returns `(accepted, skipped)`.
    pub fn append(&self, namespace: &str, events: &[PlayEvent]) -> Result<(usize, usize)> {
        let mut accepted = 0;
        let mut skipped = 0;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EVENTS)?;
            for event in events {
                if !event.is_valid() {
                    skipped += 1;
                    continue;
                }
                let data = serde_json::to_vec(event)?;
                table.insert(
                    (namespace, event.timestamp, event.song_id.as_str()),
                    data.as_slice(),
                )?;
                accepted += 1;
            }
        }
        txn.commit()?;
        Ok((accepted, skipped))
    }

    /// All events for the namespace with `from <= timestamp <= to`,
    /// ascending by timestamp.
    pub fn query_range(&self, namespace: &str, from: i64, to: i64) -> Result<Vec<PlayEvent>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EVENTS)?;
        let mut events = Vec::new();
        for entry in table.range((namespace, from, "")..)? {
            let (key, value) = entry?;
            let (ns, timestamp, _) = key.value();
            if ns != namespace || timestamp > to {
                break;
            }
            let event: PlayEvent = serde_json::from_slice(value.value())
                .context("corrupt event record in redb")?;
            events.push(event);
        }
        Ok(events)
    }

    /// Rewrite display metadata on every stored record matching the
    /// target. Returns how many records changed.
    pub fn patch_metadata(
        &self,
        namespace: &str,
        kind: PatchKind,
        target_id: &str,
        fields: &MetadataFields,
    ) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut patched = 0;
        {
            let mut table = txn.open_table(EVENTS)?;

            let mut updates: Vec<(i64, String, Vec<u8>)> = Vec::new();
            for entry in table.range((namespace, i64::MIN, "")..)? {
                let (key, value) = entry?;
                let (ns, timestamp, song_id) = key.value();
                if ns != namespace {
                    break;
                }
                let mut event: PlayEvent = serde_json::from_slice(value.value())
                    .context("corrupt event record in redb")?;
                if event.matches_target(kind, target_id) {
                    event.apply_patch(fields);
                    updates.push((timestamp, song_id.to_string(), serde_json::to_vec(&event)?));
                }
            }

            for (timestamp, song_id, data) in updates {
                table.insert((namespace, timestamp, song_id.as_str()), data.as_slice())?;
                patched += 1;
            }
        }
        txn.commit()?;
        Ok(patched)
    }

    /// Irreversible wipe of a namespace, token binding included.
    /// Returns how many event records were deleted.
    pub fn delete_all(&self, namespace: &str) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let mut deleted = 0;
        {
            let mut table = txn.open_table(EVENTS)?;

            let mut keys: Vec<(i64, String)> = Vec::new();
            for entry in table.range((namespace, i64::MIN, "")..)? {
                let (key, _) = entry?;
                let (ns, timestamp, song_id) = key.value();
                if ns != namespace {
                    break;
                }
                keys.push((timestamp, song_id.to_string()));
            }

            for (timestamp, song_id) in keys {
                table.remove((namespace, timestamp, song_id.as_str()))?;
                deleted += 1;
            }

            let mut namespaces = txn.open_table(NAMESPACES)?;
            let _ = namespaces.remove(namespace)?;
        }
        txn.commit()?;
        Ok(deleted)
    }
}
