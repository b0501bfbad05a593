//! Control-channel protocol between connected clients and the worker.
//!
//! Both directions are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::VersionDescriptor;

/// Command sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    /// Promote a waiting worker to active.
    SkipWaiting,
    /// Compare the remote descriptor with the current one.
    CheckUpdate,
    /// Reload the descriptor and refresh the current generation.
    ForceUpdate,
    /// Ask for the current descriptor.
    GetVersion,
    /// Refresh the current generation without touching the descriptor.
    UpdateCache,
}

/// Event delivered to clients, either broadcast or as a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlEvent {
    UpdateAvailable {
        current: Option<VersionDescriptor>,
        latest: VersionDescriptor,
    },
    CacheUpdated {
        version: Option<VersionDescriptor>,
        refreshed: usize,
        failed: Vec<String>,
    },
    VersionInfo {
        version: Option<VersionDescriptor>,
    },
}
