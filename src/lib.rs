//! marketrag - retrieval pipeline for marketing content generation
//!
//! Splits extracted document text into overlapping token-bounded chunks,
//! embeds them locally, stores them in a SQLite-backed vector store with a
//! rebuildable similarity index, and serves re-ranked semantic search results
//! to the generation layer.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingestion;
pub mod retrieval;
pub mod storage;

pub use error::{MarketragError, Result};
