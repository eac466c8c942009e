//! # Desk Assist
//!
//! Core of a desktop LLM assistant: a function-calling conversation engine
//! over an unreliable completion API, a retrieval index that grounds answers
//! in local files or crawled web pages, and adapters for speech and image
//! input.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   prompt ──────▶│  Assistant   │──────▶ response, status, image
//!                 └──┬────┬───┬──┘
//!                    │    │   │
//!          ┌─────────┘    │   └───────────┐
//!          ▼              ▼               ▼
//!   ┌─────────────┐ ┌────────────┐ ┌──────────────┐
//!   │ Retrieval   │ │Conversation│ │  Function    │
//!   │ index       │ │  engine    │ │  catalog     │
//!   │ (SQLite)    │ └─────┬──────┘ └──────────────┘
//!   └──────┬──────┘       │
//!          └──────┬───────┘
//!                 ▼
//!          ┌─────────────┐
//!          │   Gateway   │  retry, backoff, timeouts, shape checks
//!          └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! assist init                           # create the index store
//! assist ingest "./docs/**/*.md"        # load local documents
//! assist ingest --url example.com/docs  # crawl a site
//! assist ask "what is in the docs?" --context
//! assist ask "show bar chart of 3 2 1" --functions --image-out chart.png
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`assistant`] | Composition root used by front ends |
//! | [`config`] | TOML configuration parsing |
//! | [`gateway`] | Retry policy and response classification |
//! | [`openai`] | HTTP client for the completion API |
//! | [`conversation`] | Turn state machine |
//! | [`functions`] | Function catalog, reconciliation, dispatch |
//! | [`chart`] | PNG chart rendering |
//! | [`index`] | Retrieval index manager |
//! | [`connector_fs`] | Folder scanning and loading |
//! | [`connector_web`] | Web crawling and text extraction |
//! | [`chunk`] | Passage splitting |
//! | [`embedding`] | Embedding providers and vector math |
//! | [`ingest`] | Index write path |
//! | [`search`] | Index read path |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`speech`] | Speech capture and playback |
//! | [`vision`] | Zero-shot image classification |

pub mod assistant;
pub mod chart;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_web;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod functions;
pub mod gateway;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod openai;
pub mod search;
pub mod speech;
pub mod traits;
pub mod vision;
