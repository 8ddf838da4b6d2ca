//! Resumable task ledger.
//!
//! No original-source file carries a matching table; the schema and
//! invariants below come directly from the at-most-one-running-task
//! contract (superseding a prior `running` row, absorbing terminal states,
//! `resume_count`/`resumed_at` only movable via one dedicated operation).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumableTask {
    pub id: i64,
    pub session_id: i64,
    pub chat_id: i64,
    pub goal: String,
    pub status: TaskStatus,
    pub resume_count: i64,
    pub created_at: DateTime<Utc>,
    pub resumed_at: Option<DateTime<Utc>>,
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ResumableTask> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let resumed_at: Option<String> = row.get("resumed_at")?;
    Ok(ResumableTask {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        chat_id: row.get("chat_id")?,
        goal: row.get("goal")?,
        status: TaskStatus::parse(&status),
        resume_count: row.get("resume_count")?,
        created_at: parse_ts(&created_at),
        resumed_at: resumed_at.as_deref().map(parse_ts),
    })
}

impl Store {
    /// Transitions any prior `running` row for `session_id` to `failed`
    /// (reason recorded only via tracing, since the table carries no
    /// free-text reason column) and inserts a new `running` row. Both
    /// statements run in one blocking closure so no other caller can
    /// observe two simultaneously-running tasks for the same session.
    pub async fn upsert_resumable_task(
        &self,
        session_id: i64,
        chat_id: i64,
        goal: impl Into<String>,
    ) -> StoreResult<i64> {
        let goal = goal.into();
        self.run_blocking(move |conn| {
            let superseded = conn.execute(
                "UPDATE resumable_tasks SET status = 'failed' WHERE session_id = ?1 AND status = 'running'",
                params![session_id],
            )?;
            if superseded > 0 {
                tracing::debug!(session_id, superseded, "superseded prior running task");
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO resumable_tasks (session_id, chat_id, goal, status, created_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)",
                params![session_id, chat_id, goal, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn mark_resumable_task_completed(&self, id: i64) -> StoreResult<()> {
        self.set_terminal_status(id, TaskStatus::Completed).await
    }

    pub async fn mark_resumable_task_failed(&self, id: i64, reason: &str) -> StoreResult<()> {
        tracing::debug!(task_id = id, reason, "resumable task failed");
        self.set_terminal_status(id, TaskStatus::Failed).await
    }

    async fn set_terminal_status(&self, id: i64, status: TaskStatus) -> StoreResult<()> {
        self.run_blocking(move |conn| {
            let affected = conn.execute(
                "UPDATE resumable_tasks SET status = ?1 WHERE id = ?2 AND status = 'running'",
                params![status.as_str(), id],
            )?;
            if affected == 0 {
                return Err(StoreError::TaskNotFound(id));
            }
            Ok(())
        })
        .await
    }

    /// Bumps `resume_count` and stamps `resumed_at`; only valid on a
    /// `running` row.
    pub async fn increment_resume_and_set_resumed_at(&self, id: i64) -> StoreResult<i64> {
        self.run_blocking(move |conn| {
            let now = Utc::now().to_rfc3339();
            let affected = conn.execute(
                "UPDATE resumable_tasks SET resume_count = resume_count + 1, resumed_at = ?1
                 WHERE id = ?2 AND status = 'running'",
                params![now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::TaskNotFound(id));
            }
            conn.query_row(
                "SELECT resume_count FROM resumable_tasks WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
        .await
    }

    pub async fn get_resumable_task(&self, id: i64) -> StoreResult<Option<ResumableTask>> {
        self.run_blocking(move |conn| {
            conn.query_row("SELECT * FROM resumable_tasks WHERE id = ?1", params![id], row_to_task)
                .optional()
                .map_err(Into::into)
        })
        .await
    }

    /// Running tasks in insertion order, for the boot-time sweeper.
    pub async fn list_running_tasks(&self) -> StoreResult<Vec<ResumableTask>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM resumable_tasks WHERE status = 'running' ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], row_to_task)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}
