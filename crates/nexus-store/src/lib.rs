//! Nexus Store - record storage and parallel bulk import
//!
//! This crate holds the physical storage layer of the Nexus graph database:
//! - Fixed-size records for nodes, relationships, relationship groups,
//!   properties and dynamic overflow chains
//! - Bit-packed property blocks with inline and chained values
//! - Schema rule descriptors and their byte encoding, legacy formats included
//! - A staged, multi-threaded pipeline that bulk-loads an input into an
//!   empty store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Bulk Importer                   │
//! │  (nodes, relationships, linking, defrag,    │
//! │   counts, cleanup)                          │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │        Staging + Caches                      │
//! │  (stages/steps, node relationship cache,    │
//! │   labels cache, memory budgeting)           │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │           Record Stores                      │
//! │  (record formats, property blocks, schema,  │
//! │   id generators, mapped block files)        │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod counts;
pub mod error;
pub mod import;
pub mod property;
pub mod schema;
pub mod staging;
pub mod store;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use import::{BulkImporter, ImportSummary};
pub use store::{NeoStores, StoreSettings};
