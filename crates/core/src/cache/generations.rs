//! Generation naming and lifecycle operations on the store.
//!
//! A generation is an isolated, named collection of cached responses. Entry
//! operations live on [`Generation`] (see `snapshots.rs`); creating, listing
//! and deleting whole generations lives on [`CacheDb`].

use std::collections::BTreeSet;

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;

/// Prefix of the generation that holds only the version descriptor.
pub const VERSION_PREFIX: &str = "version";

/// Names of the current asset and version generations.
///
/// Asset generations are named `<prefix>-<tag>`, the version generation
/// `version-<tag>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
    prefix: String,
    tag: String,
}

impl GenerationNames {
    pub fn new(prefix: impl Into<String>, tag: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), tag: tag.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Name of the current asset generation.
    pub fn assets(&self) -> String {
        format!("{}-{}", self.prefix, self.tag)
    }

    /// Name of the current version generation.
    pub fn version(&self) -> String {
        format!("{VERSION_PREFIX}-{}", self.tag)
    }

    /// Whether `name` belongs to one of the two current generations.
    ///
    /// Matches by prefix so legacy names such as `harbor-v1.0.0-static`
    /// are owned by `harbor-v1.0.0`.
    pub fn is_current(&self, name: &str) -> bool {
        name.starts_with(&self.assets()) || name.starts_with(&self.version())
    }

    /// Same prefix, different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self { prefix: self.prefix.clone(), tag: tag.into() }
    }
}

/// Handle to one named generation.
#[derive(Clone, Debug)]
pub struct Generation {
    pub(crate) db: CacheDb,
    pub(crate) name: String,
}

impl Generation {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CacheDb {
    /// Handle to a generation without creating it.
    ///
    /// Reads from a generation that does not exist find nothing; writes fail.
    pub fn generation(&self, name: &str) -> Generation {
        Generation { db: self.clone(), name: name.to_string() }
    }

    /// Open a generation, creating it if it does not exist yet.
    pub async fn open_generation(&self, name: &str) -> Result<Generation, Error> {
        let owned = name.to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
                    params![owned, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        Ok(Generation { db: self.clone(), name: name.to_string() })
    }

    /// Check whether a generation exists.
    pub async fn generation_exists(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and every entry in it.
    ///
    /// Returns false if no generation had that name.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of all existing generations.
    pub async fn generation_names(&self) -> Result<BTreeSet<String>, Error> {
        self.conn
            .call(|conn| -> Result<BTreeSet<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }
}
