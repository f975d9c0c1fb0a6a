//! # snap-sweep
//!
//! Finds near-duplicate images in a photo collection and sets aside the
//! lower-quality copy of each pair.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐  ┌─────────┐  ┌──────────────┐  ┌─────────┐  ┌──────────┐  ┌───────────┐
//! │  Scan   │─▶│  Hash   │─▶│ Vector index │─▶│  Mine   │─▶│ Validate │─▶│  Compare  │
//! │ walkdir │  │ SHA-256 │  │ SQLite + CLIP│  │ top-k   │  │ exists?  │  │ quality   │
//! └─────────┘  └─────────┘  └──────────────┘  └─────────┘  └──────────┘  └─────┬─────┘
//!                                                                             ▼
//!                                                              discard set → move/copy
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! snapsweep init
//! snapsweep sweep --dir ~/Pictures --dry-run
//! snapsweep sweep --dir ~/Pictures --threshold 0.95
//! snapsweep stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`scanner`] | Image discovery |
//! | [`hasher`] | Content fingerprints |
//! | [`embedding`] | Image embedders (local CLIP, HTTP) |
//! | [`index`] | Incremental, rename-aware vector index |
//! | [`sqlite_store`] | Persistent vector store |
//! | [`validate`] | Stale pair filtering |
//! | [`quality`] | Quality scorers and image loading |
//! | [`comparator`] | Bounded-concurrency pair ranking |
//! | [`relocate`] | Moving discarded files aside |
//! | [`pipeline`] | Sweep state machine |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//!
//! Mining itself lives in `snap_sweep_core::mining`.

pub mod commands;
pub mod comparator;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod hasher;
pub mod index;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod relocate;
pub mod scanner;
pub mod sqlite_store;
pub mod stats;
pub mod validate;
