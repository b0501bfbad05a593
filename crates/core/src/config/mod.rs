//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HARBOR_*)
//! 2. TOML config file (if HARBOR_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HARBOR_*)
/// 2. TOML config file (if HARBOR_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Socket address the proxy listens on.
    ///
    /// Set via HARBOR_LISTEN_ADDR environment variable.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Origin clients address the proxy as. Requests for other origins are
    /// never cached.
    ///
    /// Set via HARBOR_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Upstream server that serving-origin requests are forwarded to.
    ///
    /// Set via HARBOR_UPSTREAM environment variable.
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Path to SQLite cache database.
    ///
    /// Set via HARBOR_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Prefix of asset generation names.
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,

    /// Version tag baked into generation names at install time.
    #[serde(default = "default_version_tag")]
    pub version_tag: String,

    /// Path of the version descriptor endpoint.
    #[serde(default = "default_version_path")]
    pub version_path: String,

    /// Root document served to navigations when both cache and network miss.
    #[serde(default = "default_fallback_document")]
    pub fallback_document: String,

    /// Same-origin paths that are pre-cached and refreshed on hit.
    ///
    /// Set via HARBOR_CORE_RESOURCES as an inline array, e.g. `["/", "/index.html"]`.
    #[serde(default = "default_core_resources")]
    pub core_resources: Vec<String>,

    /// Interval between periodic version checks in milliseconds.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Delay before the first periodic version check in milliseconds.
    #[serde(default = "default_initial_check_delay_ms")]
    pub initial_check_delay_ms: u64,

    /// User-Agent string for upstream requests.
    ///
    /// Set via HARBOR_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per request.
    ///
    /// Set via HARBOR_MAX_BYTES environment variable.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    ///
    /// Set via HARBOR_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Path of the WebSocket control channel.
    #[serde(default = "default_control_path")]
    pub control_path: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".into()
}

fn default_origin() -> String {
    "http://localhost:8080".into()
}

fn default_upstream() -> String {
    "http://127.0.0.1:3000".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./harbor-cache.sqlite")
}

fn default_app_prefix() -> String {
    "harbor".into()
}

fn default_version_tag() -> String {
    "v1.0.0".into()
}

fn default_version_path() -> String {
    "/version.json".into()
}

fn default_fallback_document() -> String {
    "/index.html".into()
}

fn default_core_resources() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/manifest.json",
        "/version.json",
        "/pages/calculator.html",
        "/pages/check.html",
        "/pages/invoice.html",
        "/pages/gas.html",
        "/icons/icon-192.png",
        "/icons/icon-512.png",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_check_interval_ms() -> u64 {
    300_000
}

fn default_initial_check_delay_ms() -> u64 {
    5_000
}

fn default_user_agent() -> String {
    "harbor/0.1".into()
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_control_path() -> String {
    "/__harbor/control".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            origin: default_origin(),
            upstream: default_upstream(),
            db_path: default_db_path(),
            app_prefix: default_app_prefix(),
            version_tag: default_version_tag(),
            version_path: default_version_path(),
            fallback_document: default_fallback_document(),
            core_resources: default_core_resources(),
            check_interval_ms: default_check_interval_ms(),
            initial_check_delay_ms: default_initial_check_delay_ms(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            control_path: default_control_path(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Periodic version check interval.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Delay before the first periodic version check.
    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_millis(self.initial_check_delay_ms)
    }

    /// Serving origin as a parsed URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `origin` is not an http(s) URL.
    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("origin", &self.origin)
    }

    /// Upstream server as a parsed URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `upstream` is not an http(s) URL.
    pub fn upstream_url(&self) -> Result<Url, ConfigError> {
        parse_http_url("upstream", &self.upstream)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HARBOR_`
    /// 2. TOML file from `HARBOR_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HARBOR_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HARBOR_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

fn parse_http_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid { field: field.into(), reason: e.to_string() })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ConfigError::Invalid { field: field.into(), reason: "must be an http(s) URL with a host".into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./harbor-cache.sqlite"));
        assert_eq!(config.user_agent, "harbor/0.1");
        assert_eq!(config.max_bytes, 5_242_880);
        assert_eq!(config.timeout_ms, 20_000);
        assert_eq!(config.app_prefix, "harbor");
        assert_eq!(config.version_path, "/version.json");
        assert_eq!(config.core_resources.len(), 10);
        assert!(config.core_resources.contains(&config.fallback_document));
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.check_interval(), Duration::from_secs(300));
        assert_eq!(config.initial_check_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_origin_url() {
        let config = AppConfig::default();
        let origin = config.origin_url().unwrap();
        assert_eq!(origin.host_str(), Some("localhost"));
        assert_eq!(origin.port(), Some(8080));
    }

    #[test]
    fn test_upstream_url_rejects_other_schemes() {
        let config = AppConfig { upstream: "ftp://files.example.com".into(), ..Default::default() };
        let result = config.upstream_url();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "upstream"));
    }
}
