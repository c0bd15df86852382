//! Typed accessors over the relational store.
//!
//! Every write here is scoped to a single entity (one document, one
//! version's chunks, one chunk's embedding, one source), which is what
//! keeps concurrent jobs isolated without cross-job locks. Chunk
//! replacement and snapshot bookkeeping run inside transactions so no
//! partial state is externally observable.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::chunker::ChunkPiece;
use crate::models::{Chunk, DocStatus, DocType, Document, DocumentVersion, Source, SourceSnapshot};

/// SHA-256 hex digest of content, used for change detection and version dedup.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Documents & versions ============

/// Insert a document row. This is the boundary seam for the external CRUD
/// layer; the pipeline itself only ever reads documents.
pub async fn create_document(
    pool: &SqlitePool,
    project_id: &str,
    doc_type: DocType,
    title: &str,
    status: DocStatus,
    tags: &[String],
) -> Result<Document> {
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        doc_type,
        title: title.to_string(),
        status,
        pinned: false,
        tags: tags.to_vec(),
        created_at: now_ts(),
        updated_at: now_ts(),
    };

    sqlx::query(
        r#"
        INSERT INTO documents (id, project_id, doc_type, title, status, pinned, tags, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.project_id)
    .bind(doc.doc_type.as_str())
    .bind(&doc.title)
    .bind(doc.status.as_str())
    .bind(doc.pinned as i64)
    .bind(serde_json::to_string(&doc.tags)?)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(pool)
    .await?;

    Ok(doc)
}

/// Insert the next immutable version for a document.
///
/// Version numbers start at 1 and increase strictly per document; the
/// `UNIQUE(document_id, version)` constraint rejects races on the same
/// document, which matches the single-writer-per-document model.
pub async fn create_document_version(
    pool: &SqlitePool,
    document_id: &str,
    content_markdown: &str,
    change_reason: Option<&str>,
    created_by: Option<&str>,
) -> Result<DocumentVersion> {
    let next_version: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM document_versions WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_one(pool)
    .await?;

    let version = DocumentVersion {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        version: next_version,
        content_markdown: content_markdown.to_string(),
        content_hash: content_hash(content_markdown),
        change_reason: change_reason.map(str::to_string),
        created_by: created_by.map(str::to_string),
        created_at: now_ts(),
    };

    sqlx::query(
        r#"
        INSERT INTO document_versions (id, document_id, version, content_markdown, content_hash, change_reason, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&version.id)
    .bind(&version.document_id)
    .bind(version.version)
    .bind(&version.content_markdown)
    .bind(&version.content_hash)
    .bind(&version.change_reason)
    .bind(&version.created_by)
    .bind(version.created_at)
    .execute(pool)
    .await?;

    Ok(version)
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query(
        "SELECT id, project_id, doc_type, title, status, pinned, tags, created_at, updated_at FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_document(&r)).transpose()
}

pub async fn get_document_version(pool: &SqlitePool, id: &str) -> Result<Option<DocumentVersion>> {
    let row = sqlx::query(
        "SELECT id, document_id, version, content_markdown, content_hash, change_reason, created_by, created_at FROM document_versions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DocumentVersion {
        id: r.get("id"),
        document_id: r.get("document_id"),
        version: r.get("version"),
        content_markdown: r.get("content_markdown"),
        content_hash: r.get("content_hash"),
        change_reason: r.get("change_reason"),
        created_by: r.get("created_by"),
        created_at: r.get("created_at"),
    }))
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let doc_type_raw: String = row.get("doc_type");
    let status_raw: String = row.get("status");
    let tags_raw: String = row.get("tags");
    let pinned: i64 = row.get("pinned");

    Ok(Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        doc_type: DocType::parse(&doc_type_raw)
            .ok_or_else(|| anyhow::anyhow!("invalid doc_type in store: {}", doc_type_raw))?,
        title: row.get("title"),
        status: DocStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("invalid status in store: {}", status_raw))?,
        pinned: pinned != 0,
        tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

// ============ Chunks ============

/// Atomically replace a version's chunks with a fresh chunking run.
///
/// Deletes prior chunks (embeddings follow via cascade, FTS rows
/// explicitly) and inserts the new set inside one transaction, so readers
/// never observe a version with a partial chunk set. Scoping every
/// statement by version id is what keeps a slow re-chunk of an older
/// version from clobbering a newer one.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_version_id: &str,
    pieces: &[ChunkPiece],
) -> Result<Vec<Chunk>> {
    let now = now_ts();
    let chunks: Vec<Chunk> = pieces
        .iter()
        .map(|p| Chunk {
            id: Uuid::new_v4().to_string(),
            document_version_id: document_version_id.to_string(),
            chunk_index: p.chunk_index,
            heading_path: if p.heading_path.is_empty() {
                None
            } else {
                Some(p.heading_path.clone())
            },
            content: p.content.clone(),
            token_count: p.token_count,
            created_at: now,
        })
        .collect();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE document_version_id = ?)",
    )
    .bind(document_version_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunks WHERE document_version_id = ?")
        .bind(document_version_id)
        .execute(&mut *tx)
        .await?;

    for chunk in &chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_version_id, chunk_index, heading_path, content, token_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_version_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.heading_path)
        .bind(&chunk.content)
        .bind(chunk.token_count)
        .bind(chunk.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, content) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(chunks)
}

pub async fn chunks_for_version(
    pool: &SqlitePool,
    document_version_id: &str,
) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        r#"
        SELECT id, document_version_id, chunk_index, heading_path, content, token_count, created_at
        FROM chunks
        WHERE document_version_id = ?
        ORDER BY chunk_index
        "#,
    )
    .bind(document_version_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| Chunk {
            id: r.get("id"),
            document_version_id: r.get("document_version_id"),
            chunk_index: r.get("chunk_index"),
            heading_path: r.get("heading_path"),
            content: r.get("content"),
            token_count: r.get("token_count"),
            created_at: r.get("created_at"),
        })
        .collect())
}

// ============ Embeddings ============

/// Store the current embedding for (chunk, model).
///
/// Upsert keyed on `(chunk_id, model)` makes at-least-once embed jobs
/// harmless: a redelivered job overwrites the same row instead of
/// appending a duplicate.
pub async fn upsert_chunk_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    model: &str,
    embedding_blob: &[u8],
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunk_embeddings (id, chunk_id, embedding, model, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id, model) DO UPDATE SET
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(chunk_id)
    .bind(embedding_blob)
    .bind(model)
    .bind(now_ts())
    .execute(pool)
    .await?;

    Ok(())
}

// ============ Sources & snapshots ============

pub async fn create_source(
    pool: &SqlitePool,
    project_id: &str,
    url: &str,
    title: Option<&str>,
) -> Result<Source> {
    let source = Source {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        url: url.to_string(),
        title: title.map(str::to_string),
        fetched_at: None,
        etag: None,
        content_hash: None,
    };

    sqlx::query(
        "INSERT INTO sources (id, project_id, url, title, fetched_at, etag, content_hash) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&source.id)
    .bind(&source.project_id)
    .bind(&source.url)
    .bind(&source.title)
    .bind(source.fetched_at)
    .bind(&source.etag)
    .bind(&source.content_hash)
    .execute(pool)
    .await?;

    Ok(source)
}

pub async fn get_source(pool: &SqlitePool, id: &str) -> Result<Option<Source>> {
    let row = sqlx::query(
        "SELECT id, project_id, url, title, fetched_at, etag, content_hash FROM sources WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| Source {
        id: r.get("id"),
        project_id: r.get("project_id"),
        url: r.get("url"),
        title: r.get("title"),
        fetched_at: r.get("fetched_at"),
        etag: r.get("etag"),
        content_hash: r.get("content_hash"),
    }))
}

/// Content unchanged: only advance the fetch timestamp.
pub async fn touch_source_fetched(pool: &SqlitePool, source_id: &str) -> Result<()> {
    sqlx::query("UPDATE sources SET fetched_at = ? WHERE id = ?")
        .bind(now_ts())
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Content changed: insert a snapshot and update the source's bookkeeping
/// (hash, etag, fetch timestamp, and title only if previously unset), all
/// in one transaction.
pub async fn record_source_snapshot(
    pool: &SqlitePool,
    source: &Source,
    markdown: &str,
    hash: &str,
    etag: Option<&str>,
    extracted_title: Option<&str>,
) -> Result<SourceSnapshot> {
    let snapshot = SourceSnapshot {
        id: Uuid::new_v4().to_string(),
        source_id: source.id.clone(),
        content_markdown: markdown.to_string(),
        content_hash: hash.to_string(),
        fetched_at: now_ts(),
    };

    let title = source
        .title
        .clone()
        .or_else(|| extracted_title.map(str::to_string));

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO source_snapshots (id, source_id, content_markdown, content_hash, fetched_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&snapshot.id)
    .bind(&snapshot.source_id)
    .bind(&snapshot.content_markdown)
    .bind(&snapshot.content_hash)
    .bind(snapshot.fetched_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE sources SET fetched_at = ?, content_hash = ?, etag = ?, title = ? WHERE id = ?",
    )
    .bind(snapshot.fetched_at)
    .bind(hash)
    .bind(etag)
    .bind(&title)
    .bind(&source.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(snapshot)
}

pub async fn snapshot_count_for_source(pool: &SqlitePool, source_id: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM source_snapshots WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
