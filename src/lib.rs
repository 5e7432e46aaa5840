//! Find-A-Bug: a filter-expression query API over GTDB genome metadata,
//! predicted proteins and their KEGG / Pfam annotations, plus the batch
//! loader that fills the database from release files.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod schema;
