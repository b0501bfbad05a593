//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `origin` or `upstream` is not an http(s) URL
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `check_interval_ms` is below one second
    /// - `user_agent` or `app_prefix` is empty, or `app_prefix` is `version`
    /// - a configured path is not absolute
    ///
    /// Returns `ConfigError::Missing` if `core_resources` is empty or does
    /// not contain `fallback_document`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.origin_url()?;
        self.upstream_url()?;

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 50MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.check_interval_ms < 1_000 {
            return Err(ConfigError::Invalid {
                field: "check_interval_ms".into(),
                reason: "must be at least 1000ms".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if self.app_prefix.is_empty() || self.app_prefix == "version" {
            return Err(ConfigError::Invalid {
                field: "app_prefix".into(),
                reason: "must be non-empty and distinct from the version generation prefix".into(),
            });
        }

        if self.version_tag.is_empty() {
            return Err(ConfigError::Invalid { field: "version_tag".into(), reason: "must not be empty".into() });
        }

        for (field, path) in [
            ("version_path", &self.version_path),
            ("fallback_document", &self.fallback_document),
            ("control_path", &self.control_path),
        ] {
            require_absolute(field, path)?;
        }

        if self.core_resources.is_empty() {
            return Err(ConfigError::Missing {
                field: "core_resources".into(),
                hint: "list at least the root document in HARBOR_CORE_RESOURCES or the config file".into(),
            });
        }
        for path in &self.core_resources {
            require_absolute("core_resources", path)?;
        }
        if !self.core_resources.contains(&self.fallback_document) {
            return Err(ConfigError::Missing {
                field: "core_resources".into(),
                hint: format!("fallback document {} must be pre-cached", self.fallback_document),
            });
        }

        if !self.core_resources.contains(&self.version_path) {
            tracing::warn!(
                version_path = %self.version_path,
                "version endpoint is not a core resource; offline version reads rely on the version generation only"
            );
        }

        Ok(())
    }
}

fn require_absolute(field: &str, path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field: field.into(), reason: format!("path {path:?} must start with '/'") })
    }
}
