//! # Planloom
//!
//! A local-first engine that turns personal knowledge into actionable,
//! graph-structured project roadmaps.
//!
//! Planloom ingests heterogeneous artifacts (documents, chat exports, code
//! files), converts them into deduplicated vector-indexed chunks, assembles
//! bounded priority-ranked context for reasoning steps, and drives
//! agent runs that read that context and grow a project's roadmap DAG.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Artifacts │──▶│  Ingestion   │──▶│ SQLite store  │
//! │ doc/chat/ │   │ extract,     │   │ + vector index│
//! │ code      │   │ chunk, embed │   └──────┬────────┘
//! └───────────┘   └──────────────┘          │
//!                                           ▼
//!                 ┌──────────────┐   ┌───────────────┐
//!                 │   Roadmap    │◀──│  Agent runs   │
//!                 │  graph (DAG) │   │ retrieval +   │
//!                 └──────────────┘   │ budget +      │
//!                                    │ reasoning     │
//!                                    └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! plm init                               # create database
//! plm submit ./notes.md --project p1     # ingest an artifact
//! plm retrieve "launch checklist" --project p1
//! plm node add "ship beta" --project p1
//! plm run start --query "plan the beta" --project p1
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Engine error taxonomy |
//! | [`models`] | Core data types |
//! | [`capability`] | External-capability traits and timeout wrapper |
//! | [`extract`] | Text extraction per source kind |
//! | [`embedding`] | Embedding capability implementations |
//! | [`llm`] | Text generation capability implementations |
//! | [`workflow`] | Workflow trigger capability implementations |
//! | [`chunker`] | Overlapping-window text chunking |
//! | [`index`] | Vector index abstraction |
//! | [`store`] | Durable record store |
//! | [`ingest`] | Ingestion pipeline and job lifecycle |
//! | [`retrieval`] | Retrieval and context budget assembly |
//! | [`graph`] | Roadmap DAG engine |
//! | [`scheduler`] | Agent run scheduler |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod capability;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod workflow;
