//! Core types and shared functionality for harbor.
//!
//! This crate provides:
//! - Request identities, response snapshots and the `Fetcher` seam
//! - Generation store with SQLite backend
//! - Version descriptors and the control-channel protocol
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod net;
pub mod version;

pub use cache::{CacheDb, Generation, GenerationNames, ResponseSnapshot};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use identity::{CoreResources, ResourceIdentity};
pub use message::{ControlCommand, ControlEvent};
pub use net::{Fetcher, HttpResponse, ProxyRequest, ResponseKind};
pub use version::VersionDescriptor;
