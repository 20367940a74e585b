//! SQLite implementation of [`Store`].
//!
//! One row per task keyed by integer id. `status` and `fail_count` are
//! denormalized out of the JSON body so the two indexes can serve queries.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use super::{Query, Store};
use crate::error::{Error, Result};
use crate::model::{Status, Task, TaskId};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id          INTEGER PRIMARY KEY,
    status      TEXT NOT NULL,
    fail_count  INTEGER NOT NULL DEFAULT 0,
    body        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, id);
CREATE INDEX IF NOT EXISTS idx_tasks_fail_count ON tasks(fail_count);

CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  INTEGER NOT NULL
)
"#;

/// Reserved key for the id counter.
const COUNTER_KEY: &str = "next_id";

/// Reserved key for the id of the task blocking the queue.
const BLOCKER_KEY: &str = "blocked_id";

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Prepare a store at `path` without touching the database yet.
    ///
    /// The parent directory is created here; the file itself is created on
    /// first connection. Call [`Store::init`] before use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    /// Open and initialize in one step.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open(path)?;
        store.init().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode(body: &str) -> Result<Task> {
    Ok(serde_json::from_str(body)?)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM tasks WHERE id = ?")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await?;

        match body {
            Some(body) => decode(&body),
            None => Err(Error::NotFound(format!("task {id}"))),
        }
    }

    async fn put(&self, task: &Task) -> Result<()> {
        let body = serde_json::to_string(task)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (id, status, fail_count, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                fail_count = excluded.fail_count,
                body = excluded.body
            "#,
        )
        .bind(task.id.0 as i64)
        .bind(task.status.as_str())
        .bind(task.fail_count as i64)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        let done = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Task>> {
        let bodies: Vec<String> = match query {
            Query::Status(status) => {
                sqlx::query_scalar("SELECT body FROM tasks WHERE status = ? ORDER BY id")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            Query::StatusIn(statuses) => {
                if statuses.is_empty() {
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "SELECT body FROM tasks WHERE status IN ({}) ORDER BY id",
                    placeholders(statuses.len())
                );
                let mut q = sqlx::query_scalar::<_, String>(&sql);
                for status in statuses {
                    q = q.bind(status.as_str());
                }
                q.fetch_all(&self.pool).await?
            }
            Query::Failed { below: Some(limit) } => sqlx::query_scalar(
                "SELECT body FROM tasks WHERE status = ? AND fail_count < ? ORDER BY id",
            )
            .bind(Status::Fail.as_str())
            .bind(*limit as i64)
            .fetch_all(&self.pool)
            .await?,
            Query::Failed { below: None } => {
                sqlx::query_scalar("SELECT body FROM tasks WHERE status = ? ORDER BY id")
                    .bind(Status::Fail.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            Query::All => {
                sqlx::query_scalar("SELECT body FROM tasks ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        bodies.iter().map(|body| decode(body)).collect()
    }

    async fn counter(&self) -> Result<u64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(COUNTER_KEY)
            .fetch_optional(&self.pool)
            .await?;

        value
            .map(|v| v as u64)
            .ok_or_else(|| Error::NotFound(COUNTER_KEY.to_string()))
    }

    async fn set_counter(&self, value: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(COUNTER_KEY)
        .bind(value as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn blocker(&self) -> Result<Option<TaskId>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(BLOCKER_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.map(|v| TaskId(v as u64)))
    }

    async fn set_blocker(&self, id: Option<TaskId>) -> Result<()> {
        match id {
            Some(id) => {
                sqlx::query(
                    "INSERT INTO meta (key, value) VALUES (?, ?) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(BLOCKER_KEY)
                .bind(id.0 as i64)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM meta WHERE key = ?")
                    .bind(BLOCKER_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
