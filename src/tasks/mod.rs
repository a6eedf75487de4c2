//! Personal task tracking: one "current task" per client and a short history
//! of the phases it was worked on.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::{
    clock::{Clock, SystemClock},
    cycle::{PhaseKind, PhaseView},
    db::{Database, SessionHistory},
};

const ENABLE_LOGS: bool = true;

use crate::log_info;

pub const MAX_HISTORY: usize = 10;

#[derive(Clone)]
pub struct PersonalTasks {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl PersonalTasks {
    pub fn new(db: Database) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn current_task(&self) -> Result<String> {
        self.db.get_current_task().await
    }

    pub async fn set_current_task(&self, task: &str) -> Result<()> {
        self.db.set_current_task(task.trim()).await
    }

    pub async fn clear_current_task(&self) -> Result<()> {
        self.db.set_current_task("").await
    }

    /// Records the current task against a phase that just ended and clears it.
    /// Nothing is written when no task is set.
    pub async fn complete_session(
        &self,
        phase: PhaseKind,
        duration_secs: u64,
    ) -> Result<Option<SessionHistory>> {
        let now_ms = self.clock.now_ms();
        let completed_at = DateTime::<Utc>::from_timestamp_millis(now_ms)
            .ok_or_else(|| anyhow!("clock reading {now_ms} is out of range"))?;

        let entry = self
            .db
            .complete_current_task(phase, duration_secs, completed_at, MAX_HISTORY)
            .await?;

        if let Some(entry) = &entry {
            log_info!(
                "recorded {:?} for {} ({}s)",
                entry.task,
                entry.phase.as_str(),
                entry.duration
            );
        }
        Ok(entry)
    }

    /// Newest first, at most [`MAX_HISTORY`] entries.
    pub async fn history(&self) -> Result<Vec<SessionHistory>> {
        self.db.list_history().await
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        self.db.delete_history_entry(id).await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.db.clear_history().await
    }
}

/// Follows successive views of one cycle and reports phases that ran to
/// their end.
pub struct PhaseTracker {
    start: Option<i64>,
    // None right after a restart: a view read then may predate the new start.
    view: Option<PhaseView>,
}

impl PhaseTracker {
    pub fn new(start: Option<i64>, view: PhaseView) -> Self {
        Self {
            start,
            view: Some(view),
        }
    }

    /// The phase that finished since the last observation, with its full
    /// length in seconds. A changed start timestamp is a restart or a stop,
    /// never a completion.
    pub fn observe(&mut self, start: Option<i64>, view: PhaseView) -> Option<(PhaseKind, u64)> {
        let previous_start = std::mem::replace(&mut self.start, start);
        if previous_start != start {
            self.view = None;
            return None;
        }

        let previous = self.view.replace(view)?;
        self.view
            .as_ref()
            .and_then(|next| completed_phase(&previous, next))
    }
}

fn completed_phase(prev: &PhaseView, next: &PhaseView) -> Option<(PhaseKind, u64)> {
    if !prev.is_running || !next.is_running {
        return None;
    }
    if prev.phase == next.phase && prev.cycle_number == next.cycle_number {
        return None;
    }
    Some((prev.phase, prev.total_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        cycle::{derive, CycleConfig},
    };

    fn open(dir: &tempfile::TempDir, clock: &ManualClock) -> PersonalTasks {
        let db = Database::new(dir.path().join("theloop.sqlite3")).unwrap();
        PersonalTasks::with_clock(db, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn completing_without_task_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = open(&dir, &ManualClock::new(1_000));

        assert_eq!(tasks.current_task().await.unwrap(), "");
        let entry = tasks.complete_session(PhaseKind::Work, 1_920).await.unwrap();
        assert!(entry.is_none());
        assert!(tasks.history().await.unwrap().is_empty());

        tasks.set_current_task("   ").await.unwrap();
        assert!(tasks
            .complete_session(PhaseKind::Work, 1_920)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn completing_files_task_and_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1_700_000_000_000);
        let tasks = open(&dir, &clock);

        tasks.set_current_task("  write report ").await.unwrap();
        assert_eq!(tasks.current_task().await.unwrap(), "write report");

        let entry = tasks
            .complete_session(PhaseKind::Work, 1_920)
            .await
            .unwrap()
            .expect("entry");
        assert_eq!(entry.task, "write report");
        assert_eq!(entry.duration, 1_920);
        assert_eq!(entry.phase, PhaseKind::Work);
        assert_eq!(entry.completed_at, 1_700_000_000_000);
        assert_eq!(entry.date.timestamp_millis(), 1_700_000_000_000);

        assert_eq!(tasks.current_task().await.unwrap(), "");
        assert_eq!(tasks.history().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn history_keeps_ten_newest() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        let tasks = open(&dir, &clock);

        for n in 0..12 {
            clock.set(n * 60_000);
            tasks.set_current_task(&format!("task {n}")).await.unwrap();
            tasks.complete_session(PhaseKind::Work, 60).await.unwrap();
        }

        let history = tasks.history().await.unwrap();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].task, "task 11");
        assert_eq!(history[MAX_HISTORY - 1].task, "task 2");
    }

    #[tokio::test]
    async fn delete_and_clear_history() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = open(&dir, &ManualClock::new(5_000));

        for name in ["a", "b"] {
            tasks.set_current_task(name).await.unwrap();
            tasks.complete_session(PhaseKind::ShortBreak, 480).await.unwrap();
        }
        let history = tasks.history().await.unwrap();
        assert_eq!(history.len(), 2);

        assert!(tasks.delete_session(&history[0].id).await.unwrap());
        assert!(!tasks.delete_session(&history[0].id).await.unwrap());
        assert_eq!(tasks.history().await.unwrap().len(), 1);

        tasks.clear_history().await.unwrap();
        assert!(tasks.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(0);
        open(&dir, &clock).set_current_task("persist me").await.unwrap();
        assert_eq!(
            open(&dir, &clock).current_task().await.unwrap(),
            "persist me"
        );
    }

    #[test]
    fn completed_phase_detects_transitions() {
        let config = CycleConfig::default();
        let work = derive(Some(0), 1_919_000, &config);
        let short = derive(Some(0), 1_920_000, &config);
        assert_eq!(
            completed_phase(&work, &short),
            Some((PhaseKind::Work, 1_920))
        );
        assert_eq!(completed_phase(&work, &work), None);

        let long = derive(Some(0), 9_599_000, &config);
        let wrapped = derive(Some(0), 9_600_000, &config);
        assert_eq!(
            completed_phase(&long, &wrapped),
            Some((PhaseKind::LongBreak, 2_880))
        );

        let idle = PhaseView::not_started(&config);
        assert_eq!(completed_phase(&work, &idle), None);
        assert_eq!(completed_phase(&idle, &work), None);
    }

    #[test]
    fn tracker_reports_natural_transitions() {
        let config = CycleConfig::default();
        let mut tracker = PhaseTracker::new(Some(0), derive(Some(0), 1_918_000, &config));

        assert_eq!(
            tracker.observe(Some(0), derive(Some(0), 1_919_000, &config)),
            None
        );
        assert_eq!(
            tracker.observe(Some(0), derive(Some(0), 1_920_000, &config)),
            Some((PhaseKind::Work, 1_920))
        );
    }

    #[test]
    fn restart_during_break_is_not_a_completion() {
        let config = CycleConfig::default();
        let mut tracker = PhaseTracker::new(Some(0), derive(Some(0), 2_000_000, &config));

        // The first view after the restart may still come from the old start.
        let stale = derive(Some(0), 2_001_000, &config);
        assert_eq!(stale.phase, PhaseKind::ShortBreak);
        assert_eq!(tracker.observe(Some(2_001_000), stale), None);

        let fresh = derive(Some(2_001_000), 2_002_000, &config);
        assert_eq!(fresh.phase, PhaseKind::Work);
        assert_eq!(tracker.observe(Some(2_001_000), fresh), None);
        assert_eq!(
            tracker.observe(Some(2_001_000), derive(Some(2_001_000), 2_003_000, &config)),
            None
        );
    }

    #[test]
    fn stop_is_not_a_completion() {
        let config = CycleConfig::default();
        let mut tracker = PhaseTracker::new(Some(0), derive(Some(0), 1_000, &config));
        assert_eq!(
            tracker.observe(None, PhaseView::not_started(&config)),
            None
        );
    }
}
