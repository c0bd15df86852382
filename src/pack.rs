//! Token-budgeted context pack assembly.
//!
//! Retrieval here is simpler than hybrid search: a semantic-only top-K
//! pool (fixed size, similarity descending), walked greedily until the
//! next chunk would overflow the token budget. The walk stops at the
//! first overflow — it does not skip ahead to smaller chunks — so the
//! pack always reflects an unbroken prefix of the ranking.
//!
//! The packed chunks render as one markdown document: an optional
//! metadata line per chunk, the chunk content, and a `---` separator.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::embedding::{self, EmbeddingClient};
use crate::models::{ContextPack, DocStatus, DocType, SearchFilters};

/// Inputs for one context-pack request.
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub query: String,
    pub max_tokens: Option<i64>,
    pub include_metadata: bool,
    pub filters: SearchFilters,
}

impl Default for PackRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_tokens: None,
            include_metadata: true,
            filters: SearchFilters::default(),
        }
    }
}

struct PoolChunk {
    chunk_id: String,
    content: String,
    heading_path: Option<String>,
    token_count: i64,
    similarity: f64,
    document_title: String,
    doc_type: DocType,
}

/// Assemble a context pack for a project.
pub async fn build_context_pack(
    pool: &SqlitePool,
    config: &Config,
    project_id: &str,
    req: &PackRequest,
) -> Result<ContextPack> {
    if req.query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let max_tokens = req.max_tokens.unwrap_or(config.search.pack_max_tokens);
    if !(100..=100_000).contains(&max_tokens) {
        bail!("max_tokens must be in [100, 100000], got {}", max_tokens);
    }

    let embedder = EmbeddingClient::new(&config.embedding)?;
    let query_vec = embedder.embed(&req.query).await?;

    let mut ranked = fetch_embedded_chunks(
        pool,
        project_id,
        embedder.model_name(),
        &query_vec,
        &req.filters,
    )
    .await?;

    // Similarity desc, chunk id asc on ties, then cut to the fixed pool
    ranked.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    ranked.truncate(config.search.pack_pool_size as usize);

    // Greedy pack: stop at the first chunk that would overflow
    let mut total_tokens: i64 = 0;
    let mut packed: Vec<&PoolChunk> = Vec::new();
    for chunk in &ranked {
        if total_tokens + chunk.token_count > max_tokens {
            break;
        }
        packed.push(chunk);
        total_tokens += chunk.token_count;
    }

    let markdown = render_markdown(&packed, req.include_metadata);

    Ok(ContextPack {
        markdown,
        token_count: total_tokens,
        chunk_count: packed.len(),
        query: req.query.clone(),
    })
}

/// Project chunks that have an embedding for `model`, scored against the
/// query vector and pre-filtered by the document predicates.
async fn fetch_embedded_chunks(
    pool: &SqlitePool,
    project_id: &str,
    model: &str,
    query_vec: &[f32],
    filters: &SearchFilters,
) -> Result<Vec<PoolChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.heading_path, c.content, c.token_count,
               ce.embedding AS embedding,
               d.title, d.doc_type, d.status, d.tags
        FROM chunks c
        JOIN chunk_embeddings ce ON ce.chunk_id = c.id AND ce.model = ?
        JOIN document_versions dv ON dv.id = c.document_version_id
        JOIN documents d ON d.id = dv.document_id
        WHERE d.project_id = ?
        "#,
    )
    .bind(model)
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut chunks = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc_type_raw: String = row.get("doc_type");
        let status_raw: String = row.get("status");
        let tags_raw: String = row.get("tags");

        let Some(doc_type) = DocType::parse(&doc_type_raw) else {
            continue;
        };
        let Some(status) = DocStatus::parse(&status_raw) else {
            continue;
        };
        let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();

        if !filters.matches(doc_type, status, &tags) {
            continue;
        }

        let blob: Vec<u8> = row.get("embedding");
        let similarity =
            embedding::cosine_similarity(query_vec, &embedding::blob_to_vec(&blob)) as f64;

        chunks.push(PoolChunk {
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            heading_path: row.get("heading_path"),
            token_count: row.get("token_count"),
            similarity,
            document_title: row.get("title"),
            doc_type,
        });
    }

    Ok(chunks)
}

/// Render packed chunks as one markdown document.
fn render_markdown(packed: &[&PoolChunk], include_metadata: bool) -> String {
    let mut parts: Vec<String> = Vec::new();

    for chunk in packed {
        if include_metadata {
            let mut meta = vec![
                format!("**{}**", chunk.document_title),
                format!("_Type: {}_", chunk.doc_type.as_str()),
            ];
            if let Some(path) = &chunk.heading_path {
                meta.push(format!("_Path: {}_", path));
            }
            parts.push(meta.join(" | "));
        }
        parts.push(chunk.content.clone());
        parts.push("---".to_string());
    }

    parts.join("\n\n")
}
