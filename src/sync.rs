//! Sync engine: drains the pending queue to the remote store with
//! at-least-once delivery.
//!
//! A round snapshots the queue before transmitting, so enqueues that
//! land while the batch is in flight are never swept up by its
//! acknowledgement. On success exactly the snapshot is drained; on
//! any transport failure the queue is left untouched for retry.

use anyhow::Result;
use chrono::Utc;

use crate::cache::RangeCache;
use crate::event::EventKey;
use crate::namespace::NamespaceCredentials;
use crate::pending::PendingQueue;
use crate::remote::RemoteStore;

/// Pending-queue length that triggers an automatic sync round.
pub const DEFAULT_SYNC_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Batch acknowledged; the snapshot was drained.
    Synced { accepted: usize, skipped: usize },
    /// Queue was empty, nothing sent.
    NothingToSync,
    /// Transport failure or rejection; queue untouched, retry later.
    /// Stats may be momentarily stale, never a hard error.
    Failed,
}

pub struct SyncEngine {
    threshold: usize,
}

impl SyncEngine {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// One sync round. Transport failures come back as
    /// `Ok(SyncOutcome::Failed)`; only local persistence failures
    /// (queue save) are `Err`.
    pub async fn sync_now(
        &self,
        queue: &mut PendingQueue,
        cache: &mut RangeCache,
        remote: &dyn RemoteStore,
        creds: &NamespaceCredentials,
    ) -> Result<SyncOutcome> {
        let snapshot = queue.snapshot();
        if snapshot.is_empty() {
            return Ok(SyncOutcome::NothingToSync);
        }

        let response = match remote.send_batch(creds, &snapshot).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Sync round failed, {} events stay pending: {e}", snapshot.len());
                return Ok(SyncOutcome::Failed);
            }
        };

        let keys: Vec<EventKey> = snapshot.iter().map(|e| e.key()).collect();
        queue.drain_acknowledged(&keys)?;
        queue.mark_synced(Utc::now().timestamp_millis())?;
        // new authoritative data exists remotely
        cache.invalidate();

        Ok(SyncOutcome::Synced {
            accepted: response.accepted,
            skipped: response.skipped,
        })
    }

    /// Sync only once the queue has grown past the threshold.
    pub async fn maybe_sync(
        &self,
        queue: &mut PendingQueue,
        cache: &mut RangeCache,
        remote: &dyn RemoteStore,
        creds: &NamespaceCredentials,
    ) -> Result<Option<SyncOutcome>> {
        if queue.len() < self.threshold {
            return Ok(None);
        }
        Ok(Some(self.sync_now(queue, cache, remote, creds).await?))
    }

    /// Best-effort teardown flush over the blocking transport. Lossy
    /// under a forced kill, but always attempted; failures are logged
    /// and swallowed.
    pub fn flush_on_exit(
        &self,
        queue: &PendingQueue,
        remote: &dyn RemoteStore,
        creds: &NamespaceCredentials,
    ) {
        let snapshot = queue.snapshot();
        if snapshot.is_empty() {
            return;
        }
        if let Err(e) = remote.flush_blocking(creds, &snapshot) {
            tracing::debug!("Exit flush failed ({} events left pending): {e}", snapshot.len());
        }
    }
}
