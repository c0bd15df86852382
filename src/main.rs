//! # Quarry CLI
//!
//! The `quarry` binary drives the knowledge-base pipeline: schema setup,
//! document and source ingestion, the worker pools, and the two retrieval
//! surfaces (hybrid search and context packs).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quarry init` | Create the SQLite database and run schema migrations |
//! | `quarry add <file>` | Create a document version from a markdown file and queue chunking |
//! | `quarry ingest <url>` | Track a URL source and queue a fetch |
//! | `quarry work` | Run the chunk/embed/fetch worker pools |
//! | `quarry search "<query>"` | Hybrid semantic + lexical search |
//! | `quarry pack "<query>"` | Build a token-budgeted context pack |
//! | `quarry status` | Show store contents and queue health |
//!
//! ## Examples
//!
//! ```bash
//! quarry init
//! quarry add ./docs/runbook.md --project p1 --type doc --tag infra
//! quarry ingest https://example.com/post --project p1
//! quarry work --drain
//! quarry search "incident response" --project p1 --semantic-weight 0.9
//! quarry pack "deployment checklist" --project p1 --max-tokens 4000
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use quarry::config::{self, Config};
use quarry::models::{DocStatus, DocType, SearchFilters};
use quarry::pack::{build_context_pack, PackRequest};
use quarry::pipeline::{self, PipelineContext};
use quarry::queue::JobQueue;
use quarry::search::{search, SearchRequest};
use quarry::{db, migrate, status, store, worker};

/// Quarry — a knowledge-base ingestion and retrieval pipeline.
#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Knowledge-base pipeline: chunking, embeddings, hybrid search, and context packs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./quarry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables (documents,
    /// versions, chunks, embeddings, sources, snapshots, jobs, FTS index).
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Create a document version from a markdown file and queue chunking.
    ///
    /// Without `--document`, a new document is created and the file
    /// becomes version 1. With `--document`, the file becomes the next
    /// version of that document. Either way a chunk job is enqueued.
    Add {
        /// Path to the markdown file.
        file: PathBuf,

        /// Project the document belongs to.
        #[arg(long)]
        project: String,

        /// Add a new version to this existing document id.
        #[arg(long)]
        document: Option<String>,

        /// Document title (defaults to the file stem).
        #[arg(long)]
        title: Option<String>,

        /// Document type: doc, note, adr, lesson, or snippet.
        #[arg(long = "type", default_value = "doc")]
        doc_type: String,

        /// Document status: draft, approved, or deprecated.
        #[arg(long, default_value = "draft")]
        status: String,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Reason recorded on the new version.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Track a URL source and queue a fetch.
    Ingest {
        /// The URL to fetch and snapshot.
        url: String,

        /// Project the source belongs to.
        #[arg(long)]
        project: String,

        /// Optional source title.
        #[arg(long)]
        title: Option<String>,
    },

    /// Run the worker pools (chunking, embeddings, url-fetch).
    Work {
        /// Process queued jobs until the queues are empty, then exit.
        #[arg(long)]
        drain: bool,
    },

    /// Hybrid semantic + lexical search over a project's chunks.
    Search {
        /// The search query string.
        query: String,

        /// Project to search in.
        #[arg(long)]
        project: String,

        /// Maximum number of results (1–100).
        #[arg(long)]
        limit: Option<i64>,

        /// Semantic weight in [0, 1]; lexical weight is the remainder.
        #[arg(long)]
        semantic_weight: Option<f64>,

        /// Filter by document type (repeatable).
        #[arg(long = "type")]
        doc_types: Vec<String>,

        /// Filter by tag (repeatable; any overlap matches).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Filter by status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<String>,
    },

    /// Build a token-budgeted context pack for a query.
    ///
    /// Prints the rendered markdown to stdout; the summary goes to stderr
    /// so the pack can be piped onward.
    Pack {
        /// The query string.
        query: String,

        /// Project to draw chunks from.
        #[arg(long)]
        project: String,

        /// Token budget (100–100000).
        #[arg(long)]
        max_tokens: Option<i64>,

        /// Omit per-chunk metadata lines.
        #[arg(long)]
        no_metadata: bool,

        /// Filter by document type (repeatable).
        #[arg(long = "type")]
        doc_types: Vec<String>,

        /// Filter by tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Filter by status (repeatable).
        #[arg(long = "status")]
        statuses: Vec<String>,
    },

    /// Show store contents and queue health.
    Status,
}

fn parse_filters(
    doc_types: &[String],
    tags: &[String],
    statuses: &[String],
) -> Result<SearchFilters> {
    let mut filters = SearchFilters {
        tags: tags.to_vec(),
        ..Default::default()
    };
    for t in doc_types {
        filters.doc_types.push(
            DocType::parse(t).ok_or_else(|| anyhow::anyhow!("unknown document type: {}", t))?,
        );
    }
    for s in statuses {
        filters.statuses.push(
            DocStatus::parse(s).ok_or_else(|| anyhow::anyhow!("unknown status: {}", s))?,
        );
    }
    Ok(filters)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }

        Commands::Add {
            file,
            project,
            document,
            title,
            doc_type,
            status,
            tags,
            reason,
        } => {
            run_add(&cfg, file, project, document, title, doc_type, status, tags, reason).await?;
        }

        Commands::Ingest { url, project, title } => {
            run_ingest(&cfg, &url, &project, title.as_deref()).await?;
        }

        Commands::Work { drain } => {
            if drain {
                let pool = db::connect(&cfg).await?;
                let ctx = PipelineContext::new(pool, &cfg)?;
                let handled = worker::drain(&ctx).await?;
                println!("drained {} jobs", handled);
            } else {
                worker::run_workers(&cfg).await?;
            }
        }

        Commands::Search {
            query,
            project,
            limit,
            semantic_weight,
            doc_types,
            tags,
            statuses,
        } => {
            let filters = parse_filters(&doc_types, &tags, &statuses)?;
            let pool = db::connect(&cfg).await?;
            let results = search(
                &pool,
                &cfg,
                &project,
                &SearchRequest {
                    query,
                    limit,
                    semantic_weight,
                    filters,
                },
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                let path = r.heading_path.as_deref().unwrap_or("");
                println!(
                    "{}. [{:.3}] {} ({}{})",
                    i + 1,
                    r.combined_score,
                    r.document_title,
                    r.document_type.as_str(),
                    if path.is_empty() {
                        String::new()
                    } else {
                        format!(", {}", path)
                    }
                );
                println!(
                    "    semantic: {:.3}  lexical: {:.3}  tokens: {}",
                    r.semantic_score, r.text_score, r.token_count
                );
                println!("    excerpt: \"{}\"", excerpt(&r.content, 160));
                println!("    chunk: {}", r.chunk_id);
                println!();
            }
            pool.close().await;
        }

        Commands::Pack {
            query,
            project,
            max_tokens,
            no_metadata,
            doc_types,
            tags,
            statuses,
        } => {
            let filters = parse_filters(&doc_types, &tags, &statuses)?;
            let pool = db::connect(&cfg).await?;
            let pack = build_context_pack(
                &pool,
                &cfg,
                &project,
                &PackRequest {
                    query,
                    max_tokens,
                    include_metadata: !no_metadata,
                    filters,
                },
            )
            .await?;

            println!("{}", pack.markdown);
            eprintln!(
                "packed {} chunks, {} tokens, query: {:?}",
                pack.chunk_count, pack.token_count, pack.query
            );
            pool.close().await;
        }

        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_add(
    cfg: &Config,
    file: PathBuf,
    project: String,
    document: Option<String>,
    title: Option<String>,
    doc_type: String,
    status: String,
    tags: Vec<String>,
    reason: Option<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let doc_type =
        DocType::parse(&doc_type).ok_or_else(|| anyhow::anyhow!("unknown document type: {}", doc_type))?;
    let status =
        DocStatus::parse(&status).ok_or_else(|| anyhow::anyhow!("unknown status: {}", status))?;

    let pool = db::connect(cfg).await?;
    let queue = JobQueue::new(pool.clone(), &cfg.queue);

    let document_id = match document {
        Some(id) => {
            let Some(doc) = store::get_document(&pool, &id).await? else {
                bail!("document not found: {}", id);
            };
            doc.id
        }
        None => {
            let title = title.unwrap_or_else(|| {
                file.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string())
            });
            let doc =
                store::create_document(&pool, &project, doc_type, &title, status, &tags).await?;
            doc.id
        }
    };

    let version =
        store::create_document_version(&pool, &document_id, &content, reason.as_deref(), None)
            .await?;
    let job_id = pipeline::enqueue_chunk_job(&queue, &document_id, &version.id).await?;

    println!("document: {}", document_id);
    println!("version:  {} (v{})", version.id, version.version);
    println!("job:      {} (queued)", job_id);

    pool.close().await;
    Ok(())
}

async fn run_ingest(cfg: &Config, url: &str, project: &str, title: Option<&str>) -> Result<()> {
    let parsed = url::Url::parse(url).with_context(|| format!("invalid url: {}", url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("unsupported url scheme: {}", parsed.scheme());
    }

    let pool = db::connect(cfg).await?;
    let queue = JobQueue::new(pool.clone(), &cfg.queue);

    let source = store::create_source(&pool, project, url, title).await?;
    let job_id = pipeline::enqueue_url_fetch_job(&queue, &source.id, url).await?;

    println!("source: {}", source.id);
    println!("job:    {} (queued)", job_id);

    pool.close().await;
    Ok(())
}

/// Single-line excerpt capped at `max_chars`.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
