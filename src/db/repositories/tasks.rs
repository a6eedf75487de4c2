use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::connection::Database;

impl Database {
    /// The current task label, or an empty string when none is set.
    pub async fn get_current_task(&self) -> Result<String> {
        self.execute(|conn| {
            let task: Option<String> = conn
                .query_row("SELECT task FROM current_task WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(task.unwrap_or_default())
        })
        .await
    }

    pub async fn set_current_task(&self, task: &str) -> Result<()> {
        let task = task.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO current_task (id, task, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET task = excluded.task, updated_at = excluded.updated_at",
                params![task, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}
