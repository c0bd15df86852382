//! Hybrid semantic + lexical search.
//!
//! One query-embedding call, then a fused ranking over the project's
//! chunks: semantic score is the cosine similarity against the stored
//! vector for the configured model (0 when a chunk has no embedding), and
//! lexical score is the FTS5 rank of the chunk content against the query
//! (0 when there is no match). The combined score is
//! `sw * semantic + (1 - sw) * lexical`.
//!
//! Chunks with neither an embedding nor a lexical match never appear in
//! results. Ties on the combined score break on chunk id ascending so
//! result order is reproducible.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::embedding::{self, EmbeddingClient};
use crate::models::{DocStatus, DocType, SearchFilters, SearchResult};

/// Inputs for one search invocation. Unset knobs fall back to config.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<i64>,
    pub semantic_weight: Option<f64>,
    pub filters: SearchFilters,
}

/// Run a hybrid search over one project's chunks.
///
/// Input validation happens synchronously, before the embedding call or
/// any store reads.
pub async fn search(
    pool: &SqlitePool,
    config: &Config,
    project_id: &str,
    req: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    if req.query.trim().is_empty() {
        bail!("query must not be empty");
    }

    let limit = req.limit.unwrap_or(config.search.default_limit);
    if !(1..=100).contains(&limit) {
        bail!("limit must be in [1, 100], got {}", limit);
    }

    let sw = req.semantic_weight.unwrap_or(config.search.semantic_weight);
    if !(0.0..=1.0).contains(&sw) {
        bail!("semantic_weight must be in [0.0, 1.0], got {}", sw);
    }
    let tw = 1.0 - sw;

    let embedder = EmbeddingClient::new(&config.embedding)?;
    let query_vec = embedder.embed(&req.query).await?;

    let lexical = fetch_lexical_scores(pool, &req.query).await?;
    let candidates = fetch_candidates(pool, project_id, embedder.model_name()).await?;

    let mut results: Vec<SearchResult> = Vec::new();

    for cand in candidates {
        if !req
            .filters
            .matches(cand.doc_type, cand.status, &cand.tags)
        {
            continue;
        }

        let semantic = cand
            .embedding
            .as_deref()
            .map(|blob| embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(blob)) as f64);
        let text = lexical.get(cand.chunk_id.as_str()).copied();

        // No embedding and no lexical match: the chunk contributes nothing
        if semantic.is_none() && text.is_none() {
            continue;
        }

        let semantic_score = semantic.unwrap_or(0.0);
        let text_score = text.unwrap_or(0.0);
        let combined_score = sw * semantic_score + tw * text_score;

        results.push(SearchResult {
            chunk_id: cand.chunk_id,
            document_id: cand.document_id,
            document_title: cand.title,
            document_type: cand.doc_type,
            document_status: cand.status,
            document_tags: cand.tags,
            content: cand.content,
            heading_path: cand.heading_path,
            chunk_index: cand.chunk_index,
            token_count: cand.token_count,
            semantic_score,
            text_score,
            combined_score,
        });
    }

    // Combined score desc; chunk id asc for deterministic ties
    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(limit as usize);

    Ok(results)
}

struct Candidate {
    chunk_id: String,
    document_id: String,
    title: String,
    doc_type: DocType,
    status: DocStatus,
    tags: Vec<String>,
    content: String,
    heading_path: Option<String>,
    chunk_index: i64,
    token_count: i64,
    embedding: Option<Vec<u8>>,
}

/// All chunks in the project, each with its document metadata and the
/// stored vector for `model` when one exists.
async fn fetch_candidates(
    pool: &SqlitePool,
    project_id: &str,
    model: &str,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.chunk_index, c.heading_path, c.content, c.token_count,
               ce.embedding AS embedding,
               d.id AS document_id, d.title, d.doc_type, d.status, d.tags
        FROM chunks c
        JOIN document_versions dv ON dv.id = c.document_version_id
        JOIN documents d ON d.id = dv.document_id
        LEFT JOIN chunk_embeddings ce ON ce.chunk_id = c.id AND ce.model = ?
        WHERE d.project_id = ?
        "#,
    )
    .bind(model)
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
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

        candidates.push(Candidate {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            title: row.get("title"),
            doc_type,
            status,
            tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
            content: row.get("content"),
            heading_path: row.get("heading_path"),
            chunk_index: row.get("chunk_index"),
            token_count: row.get("token_count"),
            embedding: row.get("embedding"),
        });
    }

    Ok(candidates)
}

/// Lexical rank per matching chunk. FTS5's `bm25()`-based rank is negated
/// so higher means better.
async fn fetch_lexical_scores(pool: &SqlitePool, query: &str) -> Result<HashMap<String, f64>> {
    let rows = sqlx::query(
        r#"
        SELECT chunk_id, rank
        FROM chunks_fts
        WHERE chunks_fts MATCH ?
        "#,
    )
    .bind(fts_quote(query))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            (row.get::<String, _>("chunk_id"), -rank)
        })
        .collect())
}

/// Quote each query term so FTS5 treats the input as plain words rather
/// than match syntax (a stray `"` or `-` would otherwise be a parse error).
fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
