//! Per-stream duration bookkeeping
//!
//! Pure bookkeeping: every query takes the instant to evaluate against, so the
//! owner decides which clock is authoritative. The registry is owned by the
//! [`ProcessSupervisor`](super::process_supervisor::ProcessSupervisor) and only
//! mutated inside its critical section.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::Stream;

const MS_PER_MINUTE: i64 = 60_000;

/// Timing of one active stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationInfo {
    pub start_time: DateTime<Utc>,
    pub duration_ms: i64,
    /// Always `start_time + duration_ms`
    pub expected_end_time: DateTime<Utc>,
}

impl DurationInfo {
    /// `None` when the expected end falls outside the representable range
    pub fn new(start_time: DateTime<Utc>, duration_minutes: i64) -> Option<Self> {
        let duration_ms = duration_minutes.checked_mul(MS_PER_MINUTE)?;
        let expected_end_time =
            start_time.checked_add_signed(Duration::try_milliseconds(duration_ms)?)?;
        Some(Self {
            start_time,
            duration_ms,
            expected_end_time,
        })
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        self.expected_end_time - now
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expected_end_time
    }
}

/// Keyed registry of [`DurationInfo`]
#[derive(Debug, Default)]
pub struct DurationTracker {
    entries: HashMap<Uuid, DurationInfo>,
}

impl DurationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a stream, overwriting any previous entry for the same id.
    /// An unrepresentable end leaves the registry untouched and returns `None`.
    pub fn set_duration(
        &mut self,
        stream_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Option<DurationInfo> {
        let info = DurationInfo::new(start_time, duration_minutes)?;
        self.entries.insert(stream_id, info);
        Some(info)
    }

    /// Rebuild an entry from persisted stream fields; `None` if the stream
    /// never started or its end is unrepresentable
    pub fn reconstruct(&mut self, stream: &Stream) -> Option<DurationInfo> {
        let start = stream.start_time?;
        self.set_duration(stream.id, start, stream.duration_minutes)
    }

    pub fn get(&self, stream_id: &Uuid) -> Option<&DurationInfo> {
        self.entries.get(stream_id)
    }

    pub fn expected_end(&self, stream_id: &Uuid) -> Option<DateTime<Utc>> {
        self.entries.get(stream_id).map(|info| info.expected_end_time)
    }

    /// `expected_end - now`, negative once overdue; `None` if untracked
    pub fn remaining_at(&self, stream_id: &Uuid, now: DateTime<Utc>) -> Option<Duration> {
        self.entries.get(stream_id).map(|info| info.remaining_at(now))
    }

    /// Remaining time is below `threshold` but not yet negative
    pub fn is_ending_soon_at(
        &self,
        stream_id: &Uuid,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> bool {
        self.remaining_at(stream_id, now)
            .is_some_and(|remaining| remaining >= Duration::zero() && remaining < threshold)
    }

    /// Untracked streams are never expired
    pub fn is_expired_at(&self, stream_id: &Uuid, now: DateTime<Utc>) -> bool {
        self.entries
            .get(stream_id)
            .is_some_and(|info| info.is_expired_at(now))
    }

    /// Remove an entry; clearing an unknown id is a no-op
    pub fn clear(&mut self, stream_id: &Uuid) -> Option<DurationInfo> {
        self.entries.remove(stream_id)
    }

    pub fn contains(&self, stream_id: &Uuid) -> bool {
        self.entries.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
