//! # CloudOps Assistant
//!
//! A minimal retrieval-augmented question answering service over a directory
//! of Cloud & DevOps documentation.
//!
//! Markdown files are loaded and chunked, embedded through a pluggable
//! provider, and stored in a flat cosine-similarity index persisted as two
//! files. Questions are embedded, matched against the index, and answered by
//! an LLM given the top-ranked chunks as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │   Loader    │──▶│  Embedding  │──▶│ Vector index │
//! │  docs/*.md  │   │  provider   │   │ vectors.bin  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │(cloudops)│         │  (axum)  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cloudops build                              # index ./docs
//! cloudops query "how do I list pods?"        # one-shot answer
//! cloudops serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Document discovery and chunk production |
//! | [`chunk`] | Paragraph chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat vector index and `vectors.bin` |
//! | [`store`] | Index snapshots, `chunks.json`, atomic swap |
//! | [`builder`] | Build pipeline |
//! | [`completion`] | LLM completion provider |
//! | [`query`] | Query service |
//! | [`server`] | HTTP server |

pub mod builder;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod models;
pub mod progress;
pub mod query;
pub mod server;
pub mod store;
