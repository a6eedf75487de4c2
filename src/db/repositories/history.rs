use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::{
    cycle::PhaseKind,
    db::{
        connection::Database,
        helpers::{parse_datetime, parse_phase, to_i64, to_u64},
        models::SessionHistory,
    },
};

fn row_to_history(row: &Row) -> Result<SessionHistory> {
    let date: String = row.get("date")?;
    let duration_secs: i64 = row.get("duration_secs")?;
    let phase: String = row.get("phase")?;

    Ok(SessionHistory {
        id: row.get("id")?,
        date: parse_datetime(&date, "date")?,
        task: row.get("task")?,
        duration: to_u64(duration_secs, "duration_secs")?,
        phase: parse_phase(&phase)?,
        completed_at: row.get("completed_at")?,
    })
}

impl Database {
    /// Files the current task under a finished phase, keeps only the `keep`
    /// newest entries and clears the current task, all in one transaction.
    /// Returns `None` without writing anything when no task is set.
    pub async fn complete_current_task(
        &self,
        phase: PhaseKind,
        duration_secs: u64,
        completed_at: DateTime<Utc>,
        keep: usize,
    ) -> Result<Option<SessionHistory>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let task: Option<String> = tx
                .query_row("SELECT task FROM current_task WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(task) = task.filter(|t| !t.trim().is_empty()) else {
                return Ok(None);
            };

            let entry = SessionHistory {
                id: Uuid::new_v4().to_string(),
                date: completed_at,
                task,
                duration: duration_secs,
                phase,
                completed_at: completed_at.timestamp_millis(),
            };

            tx.execute(
                "INSERT INTO session_history (id, date, task, duration_secs, phase, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.id,
                    entry.date.to_rfc3339(),
                    entry.task,
                    to_i64(entry.duration)?,
                    entry.phase.as_str(),
                    entry.completed_at,
                ],
            )?;

            tx.execute(
                "DELETE FROM session_history
                 WHERE id NOT IN (
                     SELECT id FROM session_history
                     ORDER BY completed_at DESC, rowid DESC
                     LIMIT ?1
                 )",
                params![keep as i64],
            )?;

            tx.execute(
                "UPDATE current_task SET task = '', updated_at = ?1 WHERE id = 1",
                params![completed_at.to_rfc3339()],
            )?;

            tx.commit()?;
            Ok(Some(entry))
        })
        .await
    }

    /// Newest first.
    pub async fn list_history(&self) -> Result<Vec<SessionHistory>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, date, task, duration_secs, phase, completed_at
                 FROM session_history
                 ORDER BY completed_at DESC, rowid DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_history(row)?);
            }

            Ok(entries)
        })
        .await
    }

    /// Returns whether an entry was removed.
    pub async fn delete_history_entry(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM session_history WHERE id = ?1", params![id])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM session_history", [])?;
            Ok(())
        })
        .await
    }
}
