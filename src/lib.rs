//! # Quarry
//!
//! A knowledge-base ingestion and retrieval pipeline.
//!
//! Quarry ingests documents and web sources, splits their markdown into
//! heading-aware chunks, embeds each chunk through an external embedding
//! service, and answers hybrid semantic + lexical search queries —
//! including token-budgeted "context packs" for downstream consumers such
//! as LLM agents.
//!
//! ## Architecture
//!
//! ```text
//!  documents ──▶ chunk job ──▶ embed jobs ──▶ SQLite
//!  sources  ──▶ fetch job ──▶ snapshots  ──▶ (FTS5 + vectors)
//!                                               │
//!                               ┌───────────────┤
//!                               ▼               ▼
//!                         hybrid search   context pack
//! ```
//!
//! Ingestion flows one way (fetch/edit → chunk → embed) and retrieval
//! flows one way (query → embed → rank → pack); the two share only the
//! persisted chunk and embedding rows. Jobs move through a durable queue
//! with at-least-once delivery and exponential backoff, and every handler
//! is scoped to a single entity (one version's chunks, one chunk's
//! embedding, one source), so concurrency needs no cross-job locks.
//!
//! ## Quick Start
//!
//! ```bash
//! quarry init                                # create database
//! quarry add ./notes.md --project p1         # new document version → chunk + embed
//! quarry ingest https://example.com --project p1
//! quarry work                                # run worker pools
//! quarry search "deployment" --project p1
//! quarry pack "incident response" --project p1 --max-tokens 4000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`tokens`] | Word-count token heuristic |
//! | [`chunker`] | Heading-aware markdown chunking |
//! | [`embedding`] | Embedding service client + vector utilities |
//! | [`fetch`] | Source fetching and article extraction |
//! | [`queue`] | Durable job queue |
//! | [`pipeline`] | Chunk / embed / url-fetch job handlers |
//! | [`search`] | Hybrid semantic + lexical search |
//! | [`pack`] | Token-budgeted context packs |
//! | [`worker`] | Per-queue worker pools |
//! | [`store`] | Typed store accessors |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod pack;
pub mod pipeline;
pub mod queue;
pub mod search;
pub mod status;
pub mod store;
pub mod tokens;
pub mod worker;
