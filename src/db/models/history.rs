use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cycle::PhaseKind;

/// One finished phase attributed to the task that was current at the time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub id: String,
    pub date: DateTime<Utc>,
    pub task: String,
    /// Seconds.
    pub duration: u64,
    pub phase: PhaseKind,
    /// Milliseconds since the Unix epoch.
    pub completed_at: i64,
}
