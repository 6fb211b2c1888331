//! # eurisk
//!
//! An EU AI Act risk registry backed by retrieval-augmented generation.
//!
//! Projects describing AI systems are registered over HTTP and classified
//! into the Act's risk levels (Unacceptable, High, Limited, Minimal) by a
//! language model grounded in a local document corpus. The same corpus
//! answers free-form questions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Loader   │──▶│ Chunker │──▶│ Embedding   │──▶│ Vector index │
//! │ PDF/text │   │         │   │ cache       │   │ (swap/build) │
//! └──────────┘   └─────────┘   └─────────────┘   └──────┬───────┘
//!                                                       │ top-k
//!                  ┌──────────┐   ┌────────────┐   ┌────▼─────┐
//!                  │  SQLite  │◀──│    HTTP    │──▶│ Prompt → │
//!                  │ projects │   │   (axum)   │   │ generate │
//!                  └──────────┘   └────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! eurisk init                           # create database
//! eurisk index                          # embed the document directory
//! eurisk ask "What is a high-risk AI system?"
//! eurisk classify "Face matching at border control"
//! eurisk serve                          # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`models`] | Core data types |
//! | [`loader`] | Document directory walker |
//! | [`extract`] | PDF and text page extraction |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | Embedding providers and the on-disk cache |
//! | [`index`] | In-memory cosine index |
//! | [`ingest`] | Index build pipeline |
//! | [`prompts`] | Prompt templates |
//! | [`generation`] | Language model client |
//! | [`parse`] | Structured output parser |
//! | [`rag`] | Answer and classification pipeline |
//! | [`context`] | Application context |
//! | [`projects`] | Project store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`uploads`] | Attachment storage |
//! | [`files`] | Document directory listing |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod files;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod projects;
pub mod prompts;
pub mod rag;
pub mod server;
pub mod uploads;
