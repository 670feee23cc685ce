//! Gapless playback scheduling
//!
//! Each buffer starts at the later of the output clock and the previous
//! buffer's end, so scheduled intervals never overlap and never leave a gap
//! while audio keeps arriving. An interruption drops every active source and
//! resets the clock to zero.

use std::collections::BTreeMap;

/// Identifier for a scheduled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub u64);

/// A buffer placed on the output timeline (times in seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
}

/// Tracks the playback timeline for one live session
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    active: BTreeMap<SourceId, ScheduledSource>,
    next_id: u64,
}

impl PlaybackScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a buffer of `duration` seconds given the output clock `now`
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledSource {
        let start = self.next_start.max(now);
        let end = start + duration.max(0.0);
        self.next_start = end;

        let id = SourceId(self.next_id);
        self.next_id += 1;

        let source = ScheduledSource { id, start, end };
        self.active.insert(id, source);

        tracing::trace!(id = id.0, start, end, "scheduled playback");
        source
    }

    /// Mark a source as ended
    ///
    /// Returns `false` if the source was not active (already ended or
    /// dropped by an interruption).
    pub fn finish(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Drop all active sources and reset the clock
    ///
    /// Returns the IDs that must be stopped, in scheduling order.
    pub fn interrupt(&mut self) -> Vec<SourceId> {
        let dropped: Vec<SourceId> = std::mem::take(&mut self.active).into_keys().collect();
        self.next_start = 0.0;
        tracing::debug!(dropped = dropped.len(), "playback interrupted");
        dropped
    }

    /// Start time the next buffer would get if the clock were at zero
    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Whether any source is scheduled or playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Number of active sources
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
