//! Offline-first request handling for harbor.
//!
//! This crate provides the network client, version tracking, cache
//! lifecycle, request interception and the control channel, tied together
//! by the [`Worker`] runtime the server drives.

pub mod context;
pub mod fetch;
pub mod intercept;
pub mod lifecycle;
pub mod notify;
pub mod runtime;
pub mod tracker;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use harbor_core::GenerationNames;

pub use context::WorkerContext;
pub use fetch::{FetchClient, FetchConfig};
pub use intercept::{RequestInterceptor, Route};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager, RefreshReport};
pub use notify::{ClientId, ClientRegistry};
pub use runtime::Worker;
pub use runtime::dispatch::{Effect, Phase, Transition, WorkerEvent, dispatch};
pub use tracker::{UpdateCheck, VersionTracker};

/// Names of the current generations, shared between components.
pub type SharedNames = Arc<tokio::sync::RwLock<GenerationNames>>;
