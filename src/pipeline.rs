//! Ingestion pipeline job handlers.
//!
//! Three durable jobs move content through the system:
//!
//! - **chunk** (`chunking` queue): triggered for every new document
//!   version; replaces the version's chunks and fans out one embed job per
//!   chunk.
//! - **embed** (`embeddings` queue): one embedding-service call per chunk,
//!   persisting the vector.
//! - **fetch** (`url-fetch` queue): fetches a tracked source URL, extracts
//!   the article, and snapshots it when the content hash changed.
//!
//! Handlers return `Ok` for non-retryable drops (the referenced row is
//! gone) and `Err` for upstream or extraction failures, which the queue
//! retries with backoff. A handler's store writes always commit before it
//! enqueues follow-up jobs, so downstream jobs never race their inputs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::chunker::{chunk_markdown, ChunkOptions};
use crate::config::Config;
use crate::embedding::{vec_to_blob, EmbeddingClient};
use crate::fetch::Fetcher;
use crate::queue::{Job, JobQueue, QUEUE_CHUNKING, QUEUE_EMBEDDINGS, QUEUE_URL_FETCH};
use crate::store;

/// Payload of a chunk job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkJobData {
    pub document_id: String,
    pub version_id: String,
}

/// Payload of an embed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedJobData {
    pub chunk_id: String,
    pub content: String,
}

/// Payload of a url-fetch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlFetchJobData {
    pub source_id: String,
    pub url: String,
}

/// Everything a worker needs to run any pipeline job.
pub struct PipelineContext {
    pub pool: SqlitePool,
    pub queue: JobQueue,
    pub chunking: ChunkOptions,
    pub embedder: EmbeddingClient,
    pub fetcher: Fetcher,
}

impl PipelineContext {
    pub fn new(pool: SqlitePool, config: &Config) -> Result<Self> {
        let queue = JobQueue::new(pool.clone(), &config.queue);
        Ok(Self {
            pool,
            queue,
            chunking: ChunkOptions {
                max_tokens: config.chunking.max_tokens,
                overlap_tokens: config.chunking.overlap_tokens,
            },
            embedder: EmbeddingClient::new(&config.embedding)?,
            fetcher: Fetcher::new(&config.fetch)?,
        })
    }
}

/// Dispatch a claimed job to its handler based on the queue it came from.
pub async fn handle_job(ctx: &PipelineContext, job: &Job) -> Result<()> {
    match job.queue.as_str() {
        QUEUE_CHUNKING => {
            let data: ChunkJobData = serde_json::from_value(job.payload.clone())?;
            chunk_document_version(&ctx.pool, &ctx.chunking, &ctx.queue, &data).await
        }
        QUEUE_EMBEDDINGS => {
            let data: EmbedJobData = serde_json::from_value(job.payload.clone())?;
            embed_chunk(&ctx.pool, &ctx.embedder, &data).await
        }
        QUEUE_URL_FETCH => {
            let data: UrlFetchJobData = serde_json::from_value(job.payload.clone())?;
            fetch_and_snapshot_source(&ctx.pool, &ctx.fetcher, &data).await
        }
        other => anyhow::bail!("no handler for queue: {}", other),
    }
}

/// Enqueue a chunk job for a freshly created document version.
pub async fn enqueue_chunk_job(
    queue: &JobQueue,
    document_id: &str,
    version_id: &str,
) -> Result<String> {
    queue
        .enqueue(
            QUEUE_CHUNKING,
            "chunk",
            serde_json::to_value(ChunkJobData {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            })?,
        )
        .await
}

/// Enqueue a url-fetch job for a tracked source.
pub async fn enqueue_url_fetch_job(queue: &JobQueue, source_id: &str, url: &str) -> Result<String> {
    queue
        .enqueue(
            QUEUE_URL_FETCH,
            "fetch",
            serde_json::to_value(UrlFetchJobData {
                source_id: source_id.to_string(),
                url: url.to_string(),
            })?,
        )
        .await
}

/// Chunk job: re-chunk one document version and fan out embed jobs.
///
/// Idempotent — chunks are replaced wholesale per version id, so
/// re-delivery produces the same final chunk set. Embed jobs are enqueued
/// only after the chunk transaction commits.
pub async fn chunk_document_version(
    pool: &SqlitePool,
    options: &ChunkOptions,
    queue: &JobQueue,
    data: &ChunkJobData,
) -> Result<()> {
    tracing::info!(
        document_id = %data.document_id,
        version_id = %data.version_id,
        "chunking: processing document version"
    );

    let Some(version) = store::get_document_version(pool, &data.version_id).await? else {
        // The trigger event is gone; nothing to retry against.
        tracing::warn!(version_id = %data.version_id, "chunking: version not found, skipping");
        return Ok(());
    };

    let pieces = chunk_markdown(&version.content_markdown, options);
    tracing::info!(
        version_id = %data.version_id,
        chunk_count = pieces.len(),
        "chunking: generated chunks"
    );

    let chunks = store::replace_chunks(pool, &data.version_id, &pieces).await?;
    if chunks.is_empty() {
        return Ok(());
    }

    let embed_jobs: Vec<(String, serde_json::Value)> = chunks
        .iter()
        .map(|chunk| {
            Ok((
                "embed".to_string(),
                serde_json::to_value(EmbedJobData {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                })?,
            ))
        })
        .collect::<Result<_>>()?;

    queue.enqueue_bulk(QUEUE_EMBEDDINGS, embed_jobs).await?;
    tracing::info!(
        version_id = %data.version_id,
        queued_count = chunks.len(),
        "chunking: queued embedding jobs"
    );

    Ok(())
}

/// Embed job: one embedding-service call, one persisted vector.
///
/// Upstream failures propagate for queue retry. A chunk deleted between
/// enqueue and processing (a newer version re-chunked) is dropped.
pub async fn embed_chunk(
    pool: &SqlitePool,
    embedder: &EmbeddingClient,
    data: &EmbedJobData,
) -> Result<()> {
    tracing::info!(chunk_id = %data.chunk_id, "embeddings: processing chunk");

    let chunk_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE id = ?")
        .bind(&data.chunk_id)
        .fetch_one(pool)
        .await?;
    if !chunk_exists {
        tracing::warn!(chunk_id = %data.chunk_id, "embeddings: chunk not found, skipping");
        return Ok(());
    }

    let vector = embedder.embed(&data.content).await?;

    store::upsert_chunk_embedding(
        pool,
        &data.chunk_id,
        embedder.model_name(),
        &vec_to_blob(&vector),
    )
    .await?;

    tracing::info!(
        chunk_id = %data.chunk_id,
        dimensions = vector.len(),
        "embeddings: stored embedding"
    );

    Ok(())
}

/// Url-fetch job: fetch, extract, diff, snapshot.
///
/// Unchanged content only advances `fetched_at`. Snapshots are not fed
/// into chunking; sources and documents are parallel content pipelines.
pub async fn fetch_and_snapshot_source(
    pool: &SqlitePool,
    fetcher: &Fetcher,
    data: &UrlFetchJobData,
) -> Result<()> {
    tracing::info!(url = %data.url, "url-fetch: fetching");

    let page = fetcher.fetch(&data.url).await?;

    let Some(source) = store::get_source(pool, &data.source_id).await? else {
        tracing::warn!(source_id = %data.source_id, "url-fetch: source not found, skipping");
        return Ok(());
    };

    if source.content_hash.as_deref() == Some(page.content_hash.as_str()) {
        tracing::info!(url = %data.url, "url-fetch: content unchanged, skipping");
        store::touch_source_fetched(pool, &source.id).await?;
        return Ok(());
    }

    let snapshot = store::record_source_snapshot(
        pool,
        &source,
        &page.markdown,
        &page.content_hash,
        page.etag.as_deref(),
        page.title.as_deref(),
    )
    .await?;

    tracing::info!(
        snapshot_id = %snapshot.id,
        source_id = %source.id,
        "url-fetch: created snapshot"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::migrate::apply_schema;
    use crate::models::{DocStatus, DocType};
    use crate::queue::JobQueue;

    async fn test_pool() -> SqlitePool {
        // One connection: each pooled connection would otherwise get its
        // own private in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn test_options() -> ChunkOptions {
        ChunkOptions {
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }

    async fn seed_version(pool: &SqlitePool, markdown: &str) -> (String, String) {
        let doc = store::create_document(
            pool,
            "proj-1",
            DocType::Doc,
            "Test Doc",
            DocStatus::Draft,
            &[],
        )
        .await
        .unwrap();
        let version = store::create_document_version(pool, &doc.id, markdown, None, None)
            .await
            .unwrap();
        (doc.id, version.id)
    }

    #[tokio::test]
    async fn test_chunk_job_writes_chunks_and_embed_jobs() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), &QueueConfig::default());
        let (doc_id, version_id) = seed_version(&pool, "# A\nhello\n\n## B\nworld").await;

        let data = ChunkJobData {
            document_id: doc_id,
            version_id: version_id.clone(),
        };
        chunk_document_version(&pool, &test_options(), &queue, &data)
            .await
            .unwrap();

        let chunks = store::chunks_for_version(&pool, &version_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_path.as_deref(), Some("# A"));
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[1].heading_path.as_deref(), Some("# A > ## B"));
        assert_eq!(chunks[1].content, "world");

        // One embed job per chunk, carrying the chunk content
        let job1 = queue.claim(QUEUE_EMBEDDINGS).await.unwrap().unwrap();
        let job2 = queue.claim(QUEUE_EMBEDDINGS).await.unwrap().unwrap();
        assert!(queue.claim(QUEUE_EMBEDDINGS).await.unwrap().is_none());
        let contents: Vec<String> = [&job1, &job2]
            .iter()
            .map(|j| j.payload["content"].as_str().unwrap().to_string())
            .collect();
        assert!(contents.contains(&"hello".to_string()));
        assert!(contents.contains(&"world".to_string()));
    }

    #[tokio::test]
    async fn test_chunk_job_is_idempotent() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), &QueueConfig::default());
        let (doc_id, version_id) = seed_version(&pool, "# T\nalpha\n\n## U\nbeta").await;

        let data = ChunkJobData {
            document_id: doc_id,
            version_id: version_id.clone(),
        };
        chunk_document_version(&pool, &test_options(), &queue, &data)
            .await
            .unwrap();
        let first = store::chunks_for_version(&pool, &version_id).await.unwrap();

        chunk_document_version(&pool, &test_options(), &queue, &data)
            .await
            .unwrap();
        let second = store::chunks_for_version(&pool, &version_id).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_index, b.chunk_index);
            assert_eq!(a.content, b.content);
            assert_eq!(a.heading_path, b.heading_path);
        }
    }

    #[tokio::test]
    async fn test_chunk_job_missing_version_is_dropped() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), &QueueConfig::default());

        let data = ChunkJobData {
            document_id: "nope".to_string(),
            version_id: "missing".to_string(),
        };
        // Not an error: the trigger event is gone
        chunk_document_version(&pool, &test_options(), &queue, &data)
            .await
            .unwrap();
        assert!(queue.claim(QUEUE_EMBEDDINGS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rechunk_scoped_to_its_own_version() {
        let pool = test_pool().await;
        let queue = JobQueue::new(pool.clone(), &QueueConfig::default());
        let (doc_id, v1) = seed_version(&pool, "# One\nfirst version text").await;
        let v2 = store::create_document_version(&pool, &doc_id, "# Two\nsecond version text", None, None)
            .await
            .unwrap()
            .id;

        for vid in [&v1, &v2] {
            let data = ChunkJobData {
                document_id: doc_id.clone(),
                version_id: vid.to_string(),
            };
            chunk_document_version(&pool, &test_options(), &queue, &data)
                .await
                .unwrap();
        }

        // Re-running the older version's job must not disturb the newer one
        let data = ChunkJobData {
            document_id: doc_id.clone(),
            version_id: v1.clone(),
        };
        chunk_document_version(&pool, &test_options(), &queue, &data)
            .await
            .unwrap();

        let v1_chunks = store::chunks_for_version(&pool, &v1).await.unwrap();
        let v2_chunks = store::chunks_for_version(&pool, &v2).await.unwrap();
        assert!(v1_chunks.iter().all(|c| c.content.contains("first")));
        assert!(v2_chunks.iter().all(|c| c.content.contains("second")));
    }
}
