//! Version descriptors published at the version endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// `{version, build, ...}` as served by the version endpoint.
///
/// Fields other than `version` and `build` are carried through untouched
/// but never compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub version: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub build: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionDescriptor {
    pub fn new(version: impl Into<String>, build: impl Into<String>) -> Self {
        Self { version: version.into(), build: build.into(), extra: Map::new() }
    }

    /// Parse a descriptor from a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| Error::InvalidDescriptor(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::InvalidDescriptor(e.to_string()))
    }

    /// Whether both descriptors name the same release.
    pub fn same_release(&self, other: &VersionDescriptor) -> bool {
        self.version == other.version && self.build == other.build
    }

    /// Tag used in generation names for this release.
    pub fn tag(&self) -> String {
        format!("v{}", self.version)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected string or number for build, got {other}"))),
    }
}
