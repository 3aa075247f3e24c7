//! # Knowledge Mesh
//!
//! A hybrid knowledge retrieval and context assembly engine.
//!
//! Knowledge Mesh ingests documents into two complementary indexes — a
//! chunk-level vector index for semantic similarity and a typed
//! knowledge graph for explicit facts — and at query time fuses both
//! into a bounded context bundle ready for a generation step.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ Documents │──▶│     Pipeline      │──▶│    SQLite      │
//! │  (text)   │   │ Chunk+Embed+     │   │ vectors+graph │
//! └──────────┘   │    Extract       │   └───────┬───────┘
//!                └──────────────────┘           │
//!                                               ▼
//!                                    ┌────────────────────┐
//!                                    │  Context Assembly   │
//!                                    │ vector ∪ graph hits │
//!                                    └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kmesh init                          # create database
//! kmesh submit report.txt             # accept a document
//! kmesh process <id>                  # chunk, embed, extract, index
//! kmesh ask "quarterly goals"         # assemble context for a query
//! kmesh graph stats                   # graph size by type
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`extract`] | Entity/relation extraction abstraction |
//! | [`ingest`] | Document lifecycle and processing pipeline |
//! | [`vector_store`] | Chunk vector storage and similarity search |
//! | [`graph_store`] | Typed knowledge graph with provenance |
//! | [`assemble`] | Query-time retrieval and bundle assembly |
//! | [`engine`] | Engine root tying pool and capabilities together |
//! | [`retry`] | Bounded backoff for capability calls |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assemble;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod graph_store;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod stats;
pub mod vector_store;
