use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCycle {
    pub started_at_ms: i64,
    pub started_by: Option<String>,
}

/// The single authoritative timer record.
///
/// Internally only an optional active cycle is stored; `is_running` is
/// computed from it, so "running without a start timestamp" cannot be
/// represented. On the wire the record keeps its flat
/// `{startTimestamp, isRunning, startedBy}` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TimerRecordWire", into = "TimerRecordWire")]
pub struct TimerRecord {
    active: Option<ActiveCycle>,
}

impl TimerRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(started_at_ms: i64, started_by: impl Into<String>) -> Self {
        Self {
            active: Some(ActiveCycle {
                started_at_ms,
                started_by: Some(started_by.into()),
            }),
        }
    }

    pub fn start_timestamp(&self) -> Option<i64> {
        self.active.as_ref().map(|cycle| cycle.started_at_ms)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn started_by(&self) -> Option<&str> {
        self.active
            .as_ref()
            .and_then(|cycle| cycle.started_by.as_deref())
    }

    pub fn begin(&mut self, started_at_ms: i64, started_by: String) {
        *self = Self::running(started_at_ms, started_by);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRecordWire {
    #[serde(default)]
    start_timestamp: Option<i64>,
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    started_by: Option<String>,
}

impl From<TimerRecord> for TimerRecordWire {
    fn from(record: TimerRecord) -> Self {
        match record.active {
            Some(cycle) => Self {
                start_timestamp: Some(cycle.started_at_ms),
                is_running: true,
                started_by: cycle.started_by,
            },
            None => Self {
                start_timestamp: None,
                is_running: false,
                started_by: None,
            },
        }
    }
}

// `isRunning` from the peer is not trusted; the timestamp decides.
impl From<TimerRecordWire> for TimerRecord {
    fn from(wire: TimerRecordWire) -> Self {
        Self {
            active: wire.start_timestamp.map(|started_at_ms| ActiveCycle {
                started_at_ms,
                started_by: wire.started_by,
            }),
        }
    }
}
