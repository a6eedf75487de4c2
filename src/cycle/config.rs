use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

const MINUTE_MS: u64 = 60 * 1000;
const WORK_DURATION_MS: u64 = 32 * MINUTE_MS;
const SHORT_BREAK_DURATION_MS: u64 = 8 * MINUTE_MS;
const LONG_BREAK_DURATION_MS: u64 = 48 * MINUTE_MS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Work => "work",
            PhaseKind::ShortBreak => "short-break",
            PhaseKind::LongBreak => "long-break",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSegment {
    pub kind: PhaseKind,
    pub duration_ms: u64,
}

impl PhaseSegment {
    pub const fn new(kind: PhaseKind, duration_ms: u64) -> Self {
        Self { kind, duration_ms }
    }
}

/// A segment placed on the block timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScheduledSegment {
    pub kind: PhaseKind,
    pub duration_ms: u64,
    /// Offset of the segment start from the start of the block.
    pub start_ms: u64,
    pub cycle_number: u32,
}

impl ScheduledSegment {
    pub fn end_ms(&self) -> u64 {
        self.start_ms + self.duration_ms
    }
}

/// Ordered phase segments that repeat as one block.
///
/// Validated on construction, so every duration is positive and the block is
/// never empty. Cycle numbers are assigned once here rather than during every
/// derivation: work and short-break segments carry the number of work
/// segments seen so far, a long break is numbered one past the last work
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleConfig {
    segments: Vec<ScheduledSegment>,
    block_duration_ms: u64,
}

impl CycleConfig {
    pub fn new(segments: Vec<PhaseSegment>) -> Result<Self> {
        if segments.is_empty() {
            bail!("cycle config needs at least one segment");
        }

        for (index, segment) in segments.iter().enumerate() {
            if segment.duration_ms == 0 {
                bail!(
                    "segment {index} ({}) has a zero duration",
                    segment.kind.as_str()
                );
            }
        }

        let total = segments
            .iter()
            .try_fold(0u64, |acc, segment| acc.checked_add(segment.duration_ms));
        if total.map_or(true, |ms| ms > i64::MAX as u64) {
            bail!("cycle block duration overflows");
        }

        Ok(Self::schedule(&segments))
    }

    fn schedule(segments: &[PhaseSegment]) -> Self {
        let mut scheduled = Vec::with_capacity(segments.len());
        let mut offset: u64 = 0;
        let mut work_seen: u32 = 0;

        for segment in segments {
            let cycle_number = match segment.kind {
                PhaseKind::Work => {
                    work_seen += 1;
                    work_seen
                }
                PhaseKind::ShortBreak => work_seen,
                PhaseKind::LongBreak => work_seen + 1,
            };

            scheduled.push(ScheduledSegment {
                kind: segment.kind,
                duration_ms: segment.duration_ms,
                start_ms: offset,
                cycle_number,
            });
            offset += segment.duration_ms;
        }

        Self {
            segments: scheduled,
            block_duration_ms: offset,
        }
    }

    pub fn block_duration_ms(&self) -> u64 {
        self.block_duration_ms
    }

    pub fn segments(&self) -> Vec<PhaseSegment> {
        self.segments
            .iter()
            .map(|s| PhaseSegment::new(s.kind, s.duration_ms))
            .collect()
    }

    pub(crate) fn first(&self) -> &ScheduledSegment {
        // Non-empty by construction.
        &self.segments[0]
    }

    /// Segment owning `position` (already reduced modulo the block).
    /// Boundaries are half-open, so a position equal to a segment's end
    /// belongs to the next segment.
    pub(crate) fn segment_at(&self, position_ms: u64) -> &ScheduledSegment {
        let index = self
            .segments
            .partition_point(|segment| segment.end_ms() <= position_ms);
        &self.segments[index.min(self.segments.len() - 1)]
    }
}

impl Default for CycleConfig {
    /// Three 32-minute work sessions, 8-minute breaks between the first
    /// three, then a 48-minute long break. Block length is 160 minutes.
    fn default() -> Self {
        use PhaseKind::*;

        Self::schedule(&[
            PhaseSegment::new(Work, WORK_DURATION_MS),
            PhaseSegment::new(ShortBreak, SHORT_BREAK_DURATION_MS),
            PhaseSegment::new(Work, WORK_DURATION_MS),
            PhaseSegment::new(ShortBreak, SHORT_BREAK_DURATION_MS),
            PhaseSegment::new(Work, WORK_DURATION_MS),
            PhaseSegment::new(LongBreak, LONG_BREAK_DURATION_MS),
        ])
    }
}
