//! Storage module for persistent data storage
//!
//! Provides SQLite-based persistence for import jobs, extracted content,
//! mappings and submission narratives.

mod database;

pub use database::{ImportStore, StoreConn};
