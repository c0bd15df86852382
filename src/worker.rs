//! Worker pools that drain the job queues.
//!
//! One pool per queue (chunking, embeddings, url-fetch), each running up
//! to `queue.concurrency` jobs at a time. Jobs execute with no shared
//! mutable state beyond the store itself; isolation comes from job
//! granularity, not locks.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::db;
use crate::pipeline::{self, PipelineContext};
use crate::queue::{QUEUE_CHUNKING, QUEUE_EMBEDDINGS, QUEUE_URL_FETCH};

const ALL_QUEUES: &[&str] = &[QUEUE_CHUNKING, QUEUE_EMBEDDINGS, QUEUE_URL_FETCH];

/// Run all worker pools until interrupted (ctrl-c).
pub async fn run_workers(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let ctx = Arc::new(PipelineContext::new(pool, config)?);

    for &queue_name in ALL_QUEUES {
        let ctx = ctx.clone();
        let concurrency = config.queue.concurrency;
        let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
        tokio::spawn(async move {
            worker_pool(ctx, queue_name, concurrency, poll_interval).await;
        });
    }

    tracing::info!("workers ready: chunking, embeddings, url-fetch");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down workers");
    Ok(())
}

/// Process jobs until every queue is drained, then return the number of
/// jobs handled. Jobs parked for backoff (future `run_at`) are left alone.
pub async fn drain(ctx: &PipelineContext) -> Result<u64> {
    let mut handled = 0u64;
    loop {
        let mut progressed = false;
        for &queue_name in ALL_QUEUES {
            while let Some(job) = ctx.queue.claim(queue_name).await? {
                process_job(ctx, &job).await;
                handled += 1;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(handled);
        }
    }
}

async fn worker_pool(
    ctx: Arc<PipelineContext>,
    queue_name: &'static str,
    concurrency: usize,
    poll_interval: Duration,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency));

    loop {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };

        match ctx.queue.claim(queue_name).await {
            Ok(Some(job)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    process_job(&ctx, &job).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(queue = queue_name, error = %e, "claim failed");
                drop(permit);
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn process_job(ctx: &PipelineContext, job: &crate::queue::Job) {
    match pipeline::handle_job(ctx, job).await {
        Ok(()) => {
            if let Err(e) = ctx.queue.complete(&job.id).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to mark job done");
            }
        }
        Err(e) => {
            tracing::warn!(
                job_id = %job.id,
                queue = %job.queue,
                attempts = job.attempts + 1,
                error = %format!("{:#}", e),
                "job failed"
            );
            if let Err(e) = ctx.queue.fail(job, &format!("{:#}", e)).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }
}
