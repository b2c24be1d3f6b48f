//! Memo of the last fully-fetched remote time window.
//!
//! One contiguous window per process. Any successful sync or explicit
//! invalidation clears it unconditionally: the next read re-fetches
//! instead of patching incrementally. Superseded fetches are not
//! cancelled; their results are discarded by a generation check when
//! they land.

use crate::event::{MetadataFields, PatchKind, PlayEvent};

#[derive(Debug, Clone)]
struct Window {
    from: i64,
    to: i64,
    events: Vec<PlayEvent>,
}

#[derive(Debug, Default)]
pub struct RangeCache {
    window: Option<Window>,
    generation: u64,
}

impl RangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe before starting a fetch; pass back to [`put`].
    ///
    /// [`put`]: RangeCache::put
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached events if the stored window fully covers `[from, to]`.
    /// Callers re-filter to the sub-range they asked for.
    pub fn get(&self, from: i64, to: i64) -> Option<&[PlayEvent]> {
        self.window
            .as_ref()
            .filter(|w| w.from <= from && w.to >= to)
            .map(|w| w.events.as_slice())
    }

    /// Store a freshly-fetched window. Rejected (returns false) when
    /// an invalidation happened after the fetch started; the stale
    /// response just lands and is ignored.
    pub fn put(&mut self, generation: u64, from: i64, to: i64, events: Vec<PlayEvent>) -> bool {
        if generation != self.generation {
            tracing::debug!("Discarding stale range fetch (gen {generation} != {})", self.generation);
            return false;
        }
        self.window = Some(Window { from, to, events });
        true
    }

    pub fn invalidate(&mut self) {
        self.window = None;
        self.generation += 1;
    }

    /// Rewrite display metadata on cached events matching the target.
    pub fn apply_patch(&mut self, kind: PatchKind, target_id: &str, fields: &MetadataFields) -> usize {
        let mut patched = 0;
        if let Some(ref mut window) = self.window {
            for event in &mut window.events {
                if event.matches_target(kind, target_id) {
                    event.apply_patch(fields);
                    patched += 1;
                }
            }
        }
        patched
    }
}
