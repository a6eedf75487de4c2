//! Maps "time since the cycle started" onto the phase schedule.
//!
//! Everything here is a pure function of its arguments. Callers sample the
//! wall clock themselves and pass `now` in explicitly.

use serde::{Deserialize, Serialize};

use super::config::{CycleConfig, PhaseKind};

pub const READY_LABEL: &str = "Ready to Start";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseView {
    pub phase: PhaseKind,
    pub phase_label: String,
    pub remaining_seconds: u64,
    pub total_seconds: u64,
    /// Position within the current segment, in `[0, 100)`.
    pub progress_percent: f64,
    /// 1-based while running, 0 for the not-started view.
    pub cycle_number: u32,
    pub is_running: bool,
}

impl PhaseView {
    /// The view shown before any cycle has started.
    pub fn not_started(config: &CycleConfig) -> Self {
        let first = config.first();
        Self {
            phase: first.kind,
            phase_label: READY_LABEL.to_string(),
            remaining_seconds: ms_to_seconds_ceil(first.duration_ms),
            total_seconds: ms_to_seconds_ceil(first.duration_ms),
            progress_percent: 0.0,
            cycle_number: 0,
            is_running: false,
        }
    }
}

pub fn derive(start_ms: Option<i64>, now_ms: i64, config: &CycleConfig) -> PhaseView {
    let Some(start_ms) = start_ms else {
        return PhaseView::not_started(config);
    };

    // A clock stepping backwards must not produce negative elapsed time.
    let elapsed_ms = now_ms.saturating_sub(start_ms).max(0) as u64;
    let position_ms = elapsed_ms % config.block_duration_ms();

    let segment = config.segment_at(position_ms);
    let into_segment_ms = position_ms - segment.start_ms;
    let remaining_ms = segment.end_ms() - position_ms;

    PhaseView {
        phase: segment.kind,
        phase_label: phase_label(segment.kind, segment.cycle_number),
        remaining_seconds: ms_to_seconds_ceil(remaining_ms),
        total_seconds: ms_to_seconds_ceil(segment.duration_ms),
        progress_percent: into_segment_ms as f64 / segment.duration_ms as f64 * 100.0,
        cycle_number: segment.cycle_number,
        is_running: true,
    }
}

pub fn phase_label(kind: PhaseKind, cycle_number: u32) -> String {
    match kind {
        PhaseKind::Work => format!("Work Session {cycle_number}"),
        PhaseKind::ShortBreak => format!("Short Break {cycle_number}"),
        PhaseKind::LongBreak => "Long Break".to_string(),
    }
}

/// Formats a second count as `MM:SS`.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

// Ceiling, so the display never reads 0 while any time is left.
fn ms_to_seconds_ceil(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
