//! # askbase
//!
//! A self-synchronizing retrieval-augmented question answering engine for
//! websites. askbase keeps a local knowledge base in step with a site
//! (crawled pages, uploaded documents, meeting transcripts), embeds it for
//! similarity search, and answers questions over it with blended confidence
//! scoring and human handoff.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ ┌───────────┐ ┌───────────┐
//! │ Crawler  │ │ Documents │ │ Meetings  │
//! └────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!      └────────┬────┴─────────────┘
//!               ▼
//!      ┌─────────────────┐   ┌──────────────┐
//!      │ Ingest (diff,   │──▶│ ContentStore │
//!      │ chunk, embed)   │   │ SQLite + vec │
//!      └─────────────────┘   └──────┬───────┘
//!                                   │
//!        ┌──────────────────────────┤
//!        ▼                          ▼
//!  ┌───────────┐            ┌──────────────┐
//!  │ CLI       │            │ HTTP (/chat) │
//!  │ (askbase) │            │  + cache     │
//!  └───────────┘            └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askbase init                  # create database
//! askbase crawl                 # sync the site into the store
//! askbase sync-docs             # sync the upload directory
//! askbase ask "when is garbage pickup?"
//! askbase serve                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`crawler`] | Sitemap/BFS site crawling and extraction |
//! | [`differ`] | Incremental crawl diffing |
//! | [`chunker`] | Overlapping word-window chunking |
//! | [`embedding`] | Embedding gateway abstraction |
//! | [`store`] | Versioned content store with generation counter |
//! | [`ingest`] | Ingestion coordination (locks, workers, diff apply) |
//! | [`retriever`] | Query-side vector retrieval |
//! | [`topics`] | Keyword topic routing |
//! | [`confidence`] | Confidence blending and handoff |
//! | [`cache`] | Generation-invalidated response cache |
//! | [`answer`] | The end-to-end answer pipeline |
//! | [`server`] | JSON HTTP API |

pub mod answer;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod confidence;
pub mod crawler;
pub mod db;
pub mod differ;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod errors;
pub mod generation;
pub mod ingest;
pub mod meetings;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod sanitize;
pub mod server;
pub mod stats;
pub mod store;
pub mod topics;
