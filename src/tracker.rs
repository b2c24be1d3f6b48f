//! The tracker service object: owns the pending queue, range cache,
//! sync engine and remote client, and exposes the operations the
//! surrounding player calls (record a play, compute stats, patch
//! metadata, export/import, reset).
//!
//! Recording must never fail loudly into the playback path: remote
//! failures are absorbed everywhere except the explicitly
//! user-initiated operations (export, import, reset).

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;

use crate::cache::RangeCache;
use crate::event::{EventKey, MetadataFields, PatchKind, PlayEvent, TrackInfo};
use crate::namespace::NamespaceCredentials;
use crate::pending::{PendingQueue, PendingStore};
use crate::remote::RemoteStore;
use crate::stats::{self, dedup_events, ListeningStats};
use crate::sync::{SyncEngine, SyncOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Below the recording policy threshold; no event created.
    Skipped,
    /// Event durably queued; `sync` reports the auto-sync round, if
    /// the threshold triggered one.
    Recorded { sync: Option<SyncOutcome> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub uploaded: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

pub struct Tracker {
    queue: PendingQueue,
    cache: RangeCache,
    engine: SyncEngine,
    remote: Box<dyn RemoteStore>,
    creds: NamespaceCredentials,
    last_timestamp: i64,
}

impl Tracker {
    pub fn new(
        store: Box<dyn PendingStore>,
        remote: Box<dyn RemoteStore>,
        creds: NamespaceCredentials,
        sync_threshold: usize,
    ) -> Self {
        Self {
            queue: PendingQueue::open(store),
            cache: RangeCache::new(),
            engine: SyncEngine::new(sync_threshold),
            remote,
            creds,
            last_timestamp: 0,
        }
    }

    /// `(timestamp, songId)` is the idempotency key, so timestamps
    /// handed to new events must be strictly increasing even when two
    /// recordings land within the same clock millisecond.
    fn next_timestamp(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_timestamp = if now > self.last_timestamp {
            now
        } else {
            self.last_timestamp + 1
        };
        self.last_timestamp
    }

    /// Record a playback observation. Applies the recording policy,
    /// durably enqueues, and kicks off an auto-sync once the queue is
    /// long enough. Only a local persistence failure surfaces.
    pub async fn record_play(
        &mut self,
        track: &TrackInfo,
        listened_ms: u64,
    ) -> Result<RecordOutcome> {
        if !crate::event::worth_recording(listened_ms, track.duration_ms) {
            return Ok(RecordOutcome::Skipped);
        }

        let timestamp = self.next_timestamp();
        let event = PlayEvent::from_track(track, listened_ms, timestamp);
        self.queue.enqueue(event)?;

        let sync = match self
            .engine
            .maybe_sync(&mut self.queue, &mut self.cache, self.remote.as_ref(), &self.creds)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                // queue bookkeeping failed after the batch went out;
                // the events will be re-sent and deduped on read
                tracing::warn!("Auto-sync bookkeeping failed: {e}");
                None
            }
        };
        Ok(RecordOutcome::Recorded { sync })
    }

    /// One explicit sync round.
    pub async fn sync_now(&mut self) -> Result<SyncOutcome> {
        self.engine
            .sync_now(&mut self.queue, &mut self.cache, self.remote.as_ref(), &self.creds)
            .await
    }

    /// Best-effort teardown flush.
    pub fn flush_on_exit(&self) {
        self.engine
            .flush_on_exit(&self.queue, self.remote.as_ref(), &self.creds);
    }

    /// Ranked statistics for the inclusive `[from, to]` window:
    /// cached-or-fetched server events merged with still-unsynced
    /// pending ones, deduplicated, aggregated. A failed fetch
    /// degrades to pending-only stats rather than erroring.
    pub async fn stats(&mut self, from: i64, to: i64) -> Result<ListeningStats> {
        let server_events = match self.cache.get(from, to) {
            Some(events) => events.to_vec(),
            None => {
                let generation = self.cache.generation();
                match self.remote.fetch_range(&self.creds, from, to).await {
                    Ok(events) => {
                        self.cache.put(generation, from, to, events.clone());
                        events
                    }
                    Err(e) => {
                        tracing::warn!("Range fetch failed, stats from pending only: {e}");
                        Vec::new()
                    }
                }
            }
        };

        // server copies first so they win the dedup
        let mut merged = server_events;
        merged.extend(self.queue.snapshot());
        let merged = dedup_events(&merged);
        Ok(stats::aggregate(&merged, from, to))
    }

    /// Propagate a catalog edit onto history. The local transition
    /// (pending queue + cached window) commits first; the remote
    /// patch is fire-and-forget and never blocks or reverts it.
    /// Returns how many local records changed.
    pub async fn patch_metadata(
        &mut self,
        kind: PatchKind,
        target_id: &str,
        fields: &MetadataFields,
    ) -> Result<usize> {
        let pending = self.queue.apply_patch(kind, target_id, fields)?;
        let cached = self.cache.apply_patch(kind, target_id, fields);

        if let Err(e) = self
            .remote
            .patch_metadata(&self.creds, kind, target_id, fields)
            .await
        {
            tracing::warn!("Remote metadata patch failed, will reconverge on next fetch: {e}");
        }
        Ok(pending + cached)
    }

    /// Full history as the portable interchange format: server
    /// records merged with pending ones, deduplicated. Unlike stats,
    /// a backup must not silently come back partial, so fetch
    /// failures propagate.
    pub async fn export(&mut self) -> Result<Vec<PlayEvent>> {
        let server = self
            .remote
            .fetch_range(&self.creds, 0, i64::MAX)
            .await
            .context("Export requires the remote store")?;
        let mut merged = server;
        merged.extend(self.queue.snapshot());
        Ok(dedup_events(&merged))
    }

    /// Ingest an externally-supplied batch: drop invalid records,
    /// dedup against server + pending history, upload the remainder.
    pub async fn import(&mut self, events: Vec<PlayEvent>) -> Result<ImportSummary> {
        let total = events.len();
        let valid: Vec<PlayEvent> = events.into_iter().filter(|e| e.is_valid()).collect();
        let invalid = total - valid.len();

        let server = self
            .remote
            .fetch_range(&self.creds, 0, i64::MAX)
            .await
            .context("Import requires the remote store")?;
        let mut known: HashSet<EventKey> = server.iter().map(|e| e.key()).collect();
        known.extend(self.queue.events().iter().map(|e| e.key()));

        let mut fresh = Vec::new();
        let mut duplicates = 0;
        for event in valid {
            if known.insert(event.key()) {
                fresh.push(event);
            } else {
                duplicates += 1;
            }
        }

        if fresh.is_empty() {
            return Ok(ImportSummary {
                uploaded: 0,
                duplicates,
                invalid,
            });
        }

        let response = self.remote.send_batch(&self.creds, &fresh).await?;
        self.cache.invalidate();
        Ok(ImportSummary {
            uploaded: response.accepted,
            duplicates,
            invalid,
        })
    }

    /// Account-level stats reset: wipe the namespace remotely, then
    /// the local queue and cache.
    pub async fn reset(&mut self) -> Result<usize> {
        let deleted = self.remote.delete_all(&self.creds).await?;
        self.queue.clear()?;
        self.cache.invalidate();
        Ok(deleted)
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn last_synced_at(&self) -> Option<i64> {
        self.queue.last_synced_at()
    }
}
