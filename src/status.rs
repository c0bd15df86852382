//! Pipeline status overview.
//!
//! Summarizes what the store holds (documents, versions, chunks,
//! embedding coverage, sources, snapshots) and where each job queue
//! stands. Failed jobs surface here with their counts, which is the
//! operator's window into exhausted retries.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::queue::{JobQueue, QUEUE_CHUNKING, QUEUE_EMBEDDINGS, QUEUE_URL_FETCH};

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let documents = count(&pool, "documents").await?;
    let versions = count(&pool, "document_versions").await?;
    let chunks = count(&pool, "chunks").await?;
    let embedded = count(&pool, "chunk_embeddings").await?;
    let sources = count(&pool, "sources").await?;
    let snapshots = count(&pool, "source_snapshots").await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Quarry — Pipeline Status");
    println!("========================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    println!();
    println!("  Documents:  {}", documents);
    println!("  Versions:   {}", versions);
    println!(
        "  Chunks:     {} ({} embedded, {}%)",
        chunks,
        embedded,
        if chunks > 0 { (embedded * 100) / chunks } else { 0 }
    );
    println!("  Sources:    {} ({} snapshots)", sources, snapshots);
    println!();

    let queue = JobQueue::new(pool.clone(), &config.queue);
    println!("  {:<14} {:>8} {:>8} {:>8} {:>8}", "QUEUE", "QUEUED", "RUNNING", "DONE", "FAILED");
    for name in [QUEUE_CHUNKING, QUEUE_EMBEDDINGS, QUEUE_URL_FETCH] {
        let counts = queue.counts(name).await?;
        let get = |status: &str| -> i64 {
            counts
                .iter()
                .find(|(s, _)| s == status)
                .map(|(_, n)| *n)
                .unwrap_or(0)
        };
        println!(
            "  {:<14} {:>8} {:>8} {:>8} {:>8}",
            name,
            get("queued"),
            get("running"),
            get("done"),
            get("failed")
        );
    }
    println!();

    pool.close().await;
    Ok(())
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    // Table names come from the fixed list above, never user input
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
