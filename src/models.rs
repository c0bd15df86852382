//! Core data models for the knowledge-base pipeline.
//!
//! These types mirror the relational schema: documents own immutable
//! versions, versions own chunks, chunks own embeddings, and sources own
//! snapshots. All mutation is single-writer per entity instance — the
//! pipeline never shares mutable state across jobs.

use serde::{Deserialize, Serialize};

/// Document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Doc,
    Note,
    Adr,
    Lesson,
    Snippet,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Doc => "doc",
            DocType::Note => "note",
            DocType::Adr => "adr",
            DocType::Lesson => "lesson",
            DocType::Snippet => "snippet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "doc" => Some(DocType::Doc),
            "note" => Some(DocType::Note),
            "adr" => Some(DocType::Adr),
            "lesson" => Some(DocType::Lesson),
            "snippet" => Some(DocType::Snippet),
            _ => None,
        }
    }
}

/// Document lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Draft,
    Approved,
    Deprecated,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Draft => "draft",
            DocStatus::Approved => "approved",
            DocStatus::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocStatus::Draft),
            "approved" => Some(DocStatus::Approved),
            "deprecated" => Some(DocStatus::Deprecated),
            _ => None,
        }
    }
}

/// Logical content container, owned by a project. Mutated by the external
/// CRUD layer; the pipeline only reads it.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub doc_type: DocType,
    pub title: String,
    pub status: DocStatus,
    pub pinned: bool,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Immutable content snapshot. Creation triggers chunk regeneration.
#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub id: String,
    pub document_id: String,
    /// Starts at 1, strictly increasing per document.
    pub version: i64,
    pub content_markdown: String,
    pub content_hash: String,
    pub change_reason: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
}

/// A retrieval unit derived from exactly one document version.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_version_id: String,
    /// 0-based, contiguous within a version.
    pub chunk_index: i64,
    pub heading_path: Option<String>,
    pub content: String,
    pub token_count: i64,
    pub created_at: i64,
}

/// An external URL tracked for ingestion. Mutated by the fetch pipeline.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub project_id: String,
    pub url: String,
    pub title: Option<String>,
    pub fetched_at: Option<i64>,
    pub etag: Option<String>,
    pub content_hash: Option<String>,
}

/// Point-in-time capture of a source's extracted markdown. Created only
/// when the content hash differs from the source's stored hash.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub id: String,
    pub source_id: String,
    pub content_markdown: String,
    pub content_hash: String,
    pub fetched_at: i64,
}

/// Optional predicates narrowing search and pack candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub doc_types: Vec<DocType>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub statuses: Vec<DocStatus>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.doc_types.is_empty() && self.tags.is_empty() && self.statuses.is_empty()
    }

    /// Whether a document with the given attributes passes every predicate.
    /// The tag predicate is satisfied by any non-empty intersection.
    pub fn matches(&self, doc_type: DocType, status: DocStatus, tags: &[String]) -> bool {
        if !self.doc_types.is_empty() && !self.doc_types.contains(&doc_type) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&status) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
        true
    }
}

/// One ranked chunk returned by hybrid search, annotated with its owning
/// document's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub document_type: DocType,
    pub document_status: DocStatus,
    pub document_tags: Vec<String>,
    pub content: String,
    pub heading_path: Option<String>,
    pub chunk_index: i64,
    pub token_count: i64,
    pub semantic_score: f64,
    pub text_score: f64,
    pub combined_score: f64,
}

/// A rendered, token-budgeted context document.
#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub markdown: String,
    pub token_count: i64,
    pub chunk_count: usize,
    pub query: String,
}
