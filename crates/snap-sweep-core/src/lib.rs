//! # Snap Sweep Core
//!
//! Runtime-free logic for Snap Sweep: the data model, the [`embedding::Embedder`]
//! and [`store::VectorStore`] capability traits, vector helpers, and the
//! chunked top-k [`mining`] algorithm that discovers near-duplicate pairs.
//!
//! This crate contains no tokio, sqlx, image decoding, or filesystem
//! mutation. Everything that blocks lives in the `snap-sweep` app crate.

pub mod embedding;
pub mod mining;
pub mod models;
pub mod store;
