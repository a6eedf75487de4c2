pub mod calculator;
pub mod config;

pub use calculator::{derive, format_clock, phase_label, PhaseView, READY_LABEL};
pub use config::{CycleConfig, PhaseKind, PhaseSegment};
