//! # Knowledge Mesh CLI (`kmesh`)
//!
//! The `kmesh` binary is the primary interface for Knowledge Mesh. It
//! provides commands for database initialization, document submission
//! and processing, context retrieval, and graph inspection.
//!
//! ## Usage
//!
//! ```bash
//! kmesh --config ./config/kmesh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kmesh init` | Create the SQLite database and run schema migrations |
//! | `kmesh submit <file>` | Accept a document for ingestion |
//! | `kmesh process <id>` | Chunk, embed, extract, and index a document |
//! | `kmesh status <id>` | Show a document's lifecycle state |
//! | `kmesh ask "<query>"` | Assemble a context bundle for a query |
//! | `kmesh graph stats` | Graph node/edge counts by type |
//! | `kmesh graph query <seed>...` | Traverse the graph from seed terms |
//! | `kmesh remove <id>` | Delete a document and its derived knowledge |
//! | `kmesh stats` | Database-wide overview |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowledge_mesh::config::{load_config, Config};
use knowledge_mesh::db;
use knowledge_mesh::engine::KnowledgeEngine;
use knowledge_mesh::ingest::CancelFlag;
use knowledge_mesh::migrate;
use knowledge_mesh::models::{ContextSource, DocumentMeta};
use knowledge_mesh::stats;

/// Knowledge Mesh CLI — a hybrid knowledge retrieval and context
/// assembly engine.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/kmesh.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "kmesh",
    about = "Knowledge Mesh — hybrid vector + graph retrieval with bounded context assembly",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kmesh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Accept a document for ingestion.
    ///
    /// Reads the file as UTF-8 text and records it with status
    /// `pending`. Run `kmesh process <id>` to index it.
    Submit {
        /// Path to the document text file.
        file: PathBuf,

        /// Corpus the document belongs to.
        #[arg(long, default_value = "default")]
        corpus: String,

        /// MIME content type recorded with the document.
        #[arg(long, default_value = "text/plain")]
        content_type: String,
    },

    /// Run the processing pipeline for a document.
    ///
    /// Chunks the stored text, embeds each chunk, extracts entities and
    /// relations, and indexes everything. Safe to re-run; each run
    /// starts from a clean slate.
    Process {
        /// Document UUID.
        id: String,
    },

    /// Show a document's lifecycle state.
    Status {
        /// Document UUID.
        id: String,
    },

    /// Re-run the pipeline for an already-processed document.
    ///
    /// Useful after changing chunking or extraction configuration; old
    /// chunks, vectors, and sole-provenance graph facts are invalidated
    /// first, so knowledge never accumulates across runs.
    Reprocess {
        /// Document UUID.
        id: String,
    },

    /// Assemble a context bundle for a query.
    ///
    /// Runs both retrieval channels (vector similarity and graph
    /// traversal) and prints the merged, budget-bounded context.
    Ask {
        /// The query string.
        query: String,

        /// Corpus to query.
        #[arg(long, default_value = "default")]
        corpus: String,

        /// Override the number of vector hits to retrieve.
        #[arg(long)]
        k: Option<i64>,

        /// Override the graph traversal depth.
        #[arg(long)]
        hops: Option<u32>,
    },

    /// Inspect the knowledge graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Delete a document and everything derived from it.
    ///
    /// Graph facts that another document also supports survive.
    Remove {
        /// Document UUID.
        id: String,
    },

    /// Database-wide overview: documents by status, chunk and embedding
    /// coverage, graph size by type.
    Stats,
}

/// Graph inspection subcommands.
#[derive(Subcommand)]
enum GraphAction {
    /// Node and edge counts by type.
    Stats {
        /// Restrict counts to one corpus.
        #[arg(long)]
        corpus: Option<String>,
    },

    /// Traverse the graph from seed terms and print the reached
    /// triples.
    Query {
        /// Seed terms matched against node names.
        seeds: Vec<String>,

        /// Maximum hops from a seed node.
        #[arg(long, default_value_t = 2)]
        hops: u32,

        /// Corpus to query.
        #[arg(long, default_value = "default")]
        corpus: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            run_init(&config).await?;
        }
        Commands::Submit {
            file,
            corpus,
            content_type,
        } => {
            run_submit(config, &file, corpus, content_type).await?;
        }
        Commands::Process { id } => {
            run_process(config, &id).await?;
        }
        Commands::Status { id } => {
            run_status(config, &id).await?;
        }
        Commands::Reprocess { id } => {
            let engine = KnowledgeEngine::open(config).await?;
            let report = engine.reprocess(&id, &CancelFlag::new()).await?;
            println!(
                "Reprocessed {}: {} chunks, {} embedded, {} entities, {} relations.",
                report.document_id,
                report.chunks,
                report.embedded,
                report.entities,
                report.relations
            );
        }
        Commands::Ask {
            query,
            corpus,
            k,
            hops,
        } => {
            run_ask(config, &query, &corpus, k, hops).await?;
        }
        Commands::Graph { action } => match action {
            GraphAction::Stats { corpus } => {
                run_graph_stats(config, corpus.as_deref()).await?;
            }
            GraphAction::Query {
                seeds,
                hops,
                corpus,
            } => {
                run_graph_query(config, &corpus, &seeds, hops).await?;
            }
        },
        Commands::Remove { id } => {
            let engine = KnowledgeEngine::open(config).await?;
            engine.remove_document(&id).await?;
            println!("Removed document {}.", id);
        }
        Commands::Stats => {
            stats::run_stats(&config).await?;
        }
    }

    Ok(())
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

async fn run_submit(
    config: Config,
    file: &PathBuf,
    corpus: String,
    content_type: String,
) -> Result<()> {
    let text = std::fs::read_to_string(file)?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());

    let engine = KnowledgeEngine::open(config).await?;
    let doc = engine
        .submit(
            &DocumentMeta {
                filename,
                content_type,
                byte_size: text.len() as i64,
                corpus_id: corpus,
            },
            &text,
        )
        .await?;

    println!("Submitted {} ({} bytes).", doc.filename, doc.byte_size);
    println!("Document id: {}", doc.id);
    println!("Run `kmesh process {}` to index it.", doc.id);
    Ok(())
}

async fn run_process(config: Config, id: &str) -> Result<()> {
    let engine = KnowledgeEngine::open(config).await?;
    let report = engine.process(id, &CancelFlag::new()).await?;
    println!(
        "Processed {}: {} chunks, {} embedded, {} entities, {} relations.",
        report.document_id, report.chunks, report.embedded, report.entities, report.relations
    );
    Ok(())
}

async fn run_status(config: Config, id: &str) -> Result<()> {
    let engine = KnowledgeEngine::open(config).await?;
    let doc = engine.get_status(id).await?;
    println!("Document:     {}", doc.id);
    println!("  Filename:   {}", doc.filename);
    println!("  Corpus:     {}", doc.corpus_id);
    println!("  Type:       {}", doc.content_type);
    println!("  Size:       {} bytes", doc.byte_size);
    println!("  Status:     {}", doc.status);
    if let Some(error) = &doc.error {
        println!("  Error:      {}", error);
    }
    Ok(())
}

async fn run_ask(
    config: Config,
    query: &str,
    corpus: &str,
    k: Option<i64>,
    hops: Option<u32>,
) -> Result<()> {
    let k = k.unwrap_or(config.retrieval.k_vector);
    let hops = hops.unwrap_or(config.retrieval.hop_depth);

    let engine = KnowledgeEngine::open(config).await?;
    let bundle = engine.assemble(query, corpus, k, hops).await?;

    if bundle.is_empty() {
        println!("No context found for \"{}\".", query);
        return Ok(());
    }

    println!(
        "Context for \"{}\" ({} items{}):",
        query,
        bundle.items.len(),
        if bundle.truncated { ", truncated" } else { "" }
    );
    println!();
    for (i, item) in bundle.items.iter().enumerate() {
        match &item.source {
            ContextSource::Chunk {
                document_id,
                chunk_id,
            } => {
                println!("[{}] chunk {} (doc {})", i + 1, chunk_id, document_id);
            }
            ContextSource::GraphFact { edge_id } => {
                println!("[{}] graph fact (edge {})", i + 1, edge_id);
            }
        }
        println!("{}", item.text);
        println!();
    }
    Ok(())
}

async fn run_graph_stats(config: Config, corpus: Option<&str>) -> Result<()> {
    let engine = KnowledgeEngine::open(config).await?;
    let stats = engine.graph_stats(corpus).await?;

    println!("Graph nodes: {}", stats.total_nodes);
    for (node_type, n) in &stats.nodes_by_type {
        println!("  {:<10} {}", node_type, n);
    }
    println!("Graph edges: {}", stats.total_edges);
    for (edge_type, n) in &stats.edges_by_type {
        println!("  {:<12} {}", edge_type, n);
    }
    Ok(())
}

async fn run_graph_query(
    config: Config,
    corpus: &str,
    seeds: &[String],
    hops: u32,
) -> Result<()> {
    let engine = KnowledgeEngine::open(config).await?;
    let hits = engine.graph_query(corpus, seeds, hops).await?;

    if hits.is_empty() {
        println!("No graph facts reached from the given seeds.");
        return Ok(());
    }

    for hit in &hits {
        println!(
            "[hop {}] {} ({}) -{}-> {} ({})",
            hit.hops,
            hit.source.name,
            hit.source.node_type,
            hit.edge_type,
            hit.target.name,
            hit.target.node_type
        );
    }
    Ok(())
}
