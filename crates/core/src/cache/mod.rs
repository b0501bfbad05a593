//! SQLite-backed store of named cache generations.
//!
//! This module provides a persistent cache using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Multiple isolated generations keyed by name
//! - Request-identity keys hashed with SHA-256
//! - Automatic schema migrations
//! - WAL mode for concurrent access
//! - Atomic population of a generation from the network

pub mod connection;
pub mod generations;
pub mod hash;
pub mod migrations;
pub mod snapshots;

pub use crate::Error;

pub use connection::CacheDb;
pub use generations::{Generation, GenerationNames, VERSION_PREFIX};
pub use snapshots::ResponseSnapshot;
