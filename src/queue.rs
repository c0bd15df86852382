//! Durable job queue backed by the relational store.
//!
//! The pipeline talks to the queue through a narrow surface — [`JobQueue::enqueue`]
//! and [`JobQueue::enqueue_bulk`] — and workers drain it with
//! [`JobQueue::claim`]. Delivery is at-least-once: a claimed job that fails
//! is re-queued with exponential backoff until its attempt budget is
//! exhausted, after which it parks in `failed` for operator inspection.
//!
//! Claims are single atomic UPDATEs guarded by status and `run_at`, so
//! concurrent workers never double-claim a job.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::QueueConfig;

/// Queue consumed by the chunk-job worker pool.
pub const QUEUE_CHUNKING: &str = "chunking";
/// Queue consumed by the embed-job worker pool.
pub const QUEUE_EMBEDDINGS: &str = "embeddings";
/// Queue consumed by the url-fetch worker pool.
pub const QUEUE_URL_FETCH: &str = "url-fetch";

/// A claimed job, ready for its handler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    /// Completed (failed) executions so far.
    pub attempts: i64,
}

/// Handle over the jobs table.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    max_attempts: i64,
    backoff_base_secs: i64,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, config: &QueueConfig) -> Self {
        Self {
            pool,
            max_attempts: config.max_attempts,
            backoff_base_secs: config.backoff_base_secs,
        }
    }

    /// Enqueue one job for immediate delivery. Returns the job id.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
    ) -> Result<String> {
        let ids = self
            .enqueue_bulk(queue, vec![(job_name.to_string(), payload)])
            .await?;
        Ok(ids.into_iter().next().unwrap_or_default())
    }

    /// Enqueue a batch of jobs on one queue.
    pub async fn enqueue_bulk(
        &self,
        queue: &str,
        jobs: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<String>> {
        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(jobs.len());

        let mut tx = self.pool.begin().await?;
        for (job_name, payload) in jobs {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO jobs (id, queue, job_name, payload, status, attempts, max_attempts, run_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, 'queued', 0, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(queue)
            .bind(&job_name)
            .bind(payload.to_string())
            .bind(self.max_attempts)
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;

        Ok(ids)
    }

    /// Atomically claim the next runnable job on a queue, if any.
    pub async fn claim(&self, queue: &str) -> Result<Option<Job>> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            UPDATE jobs SET status = 'running', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue = ? AND status = 'queued' AND run_at <= ?
                ORDER BY run_at, rowid
                LIMIT 1
            )
            RETURNING id, queue, job_name, payload, attempts
            "#,
        )
        .bind(now)
        .bind(queue)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload_raw: String = row.get("payload");
        Ok(Some(Job {
            id: row.get("id"),
            queue: row.get("queue"),
            job_name: row.get("job_name"),
            payload: serde_json::from_str(&payload_raw)?,
            attempts: row.get("attempts"),
        }))
    }

    /// Mark a claimed job as successfully processed.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'done', updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed execution: re-queue with exponential backoff, or
    /// park as `failed` once the attempt budget is spent.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let attempts = job.attempts + 1;

        if attempts >= self.max_attempts {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts = ?, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        } else {
            // Backoff: base, 2*base, 4*base, ...
            let delay = self.backoff_base_secs << (attempts - 1).min(10);
            sqlx::query(
                "UPDATE jobs SET status = 'queued', attempts = ?, last_error = ?, run_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(now + delay)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Per-status counts for one queue, for introspection.
    pub async fn counts(&self, queue: &str) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM jobs WHERE queue = ? GROUP BY status ORDER BY status",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    /// Number of jobs not yet in a terminal state, across all queues.
    pub async fn open_jobs(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}
