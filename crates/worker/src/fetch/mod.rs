//! HTTP fetch pipeline towards the upstream server.
//!
//! ### Origin mapping
//! - Requests for the serving origin are sent to the configured upstream,
//!   keeping path and query.
//! - Requests for any other origin are sent as-is.
//!
//! ### Safety Gates
//! - Foreign targets must resolve to public addresses only.
//! - Hop-by-hop headers are stripped in both directions.
//! - Redirects are not followed; they reach the caller like any other status.
//! - Max body bytes: 5MB (configurable)
//!
//! ### Response kind
//! - Serving-origin responses are `Basic`, cross-origin ones `Cors` when the
//!   other origin shares them and `Opaque` otherwise.

pub mod ssrf;

use async_trait::async_trait;
use reqwest::{Client, header};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use url::{Host, Url};

use harbor_core::identity::same_origin;
use harbor_core::{AppConfig, Error, Fetcher, HttpResponse, ProxyRequest, ResponseKind};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "harbor/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Origin clients address the proxy as
    pub origin: Url,

    /// Where serving-origin requests are actually sent
    pub upstream: Url,
}

impl FetchConfig {
    /// Derive the fetch configuration from the application configuration.
    pub fn from_app(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            origin: config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?,
            upstream: config.upstream_url().map_err(|e| Error::InvalidUrl(e.to_string()))?,
        })
    }
}

/// HTTP fetch client that forwards to the upstream server.
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Where a request for `url` is actually sent.
    pub fn target_url(&self, url: &Url) -> Url {
        if !same_origin(url, &self.config.origin) {
            return url.clone();
        }

        let mut target = self.config.upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target
    }

    /// Refuse targets outside the upstream that resolve to private or
    /// reserved addresses.
    pub async fn guard(&self, target: &Url) -> Result<(), Error> {
        if same_origin(target, &self.config.upstream) {
            return Ok(());
        }

        let port = target.port_or_known_default().unwrap_or(80);
        let ips: Vec<IpAddr> = match target.host() {
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(domain)) => tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| Error::Network(format!("DNS resolution failed for {domain}: {e}")))?
                .map(|addr| addr.ip())
                .collect(),
            None => return Err(Error::InvalidUrl(format!("{target}: missing host"))),
        };

        ips.into_iter().try_for_each(ssrf::validate_ip)
    }

    /// Classify a response for `url` relative to the serving origin.
    pub fn classify(&self, url: &Url, headers: &header::HeaderMap) -> ResponseKind {
        if same_origin(url, &self.config.origin) {
            ResponseKind::Basic
        } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseKind::Cors
        } else {
            ResponseKind::Opaque
        }
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

fn check_length(len: u64, max_bytes: usize) -> Result<(), Error> {
    if len > max_bytes as u64 {
        return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, max_bytes)));
    }
    Ok(())
}

/// Copy headers, dropping hop-by-hop ones.
fn end_to_end(headers: &header::HeaderMap) -> header::HeaderMap {
    let mut forwarded = header::HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, request: &ProxyRequest) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let target = self.target_url(&request.url);
        self.guard(&target).await?;

        let mut headers = end_to_end(&request.headers);
        // reqwest negotiates encodings itself and decodes before we store.
        headers.remove(header::HOST);
        headers.remove(header::ACCEPT_ENCODING);

        let response = self
            .http
            .request(request.method.clone(), target.as_str())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", request.url, e)))?;

        let status = response.status();

        if let Some(len) = response.content_length() {
            check_length(len, self.config.max_bytes)?;
        }

        let headers = end_to_end(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response for {}: {}", request.url, e)))?;

        check_length(body.len() as u64, self.config.max_bytes)?;

        let kind = self.classify(&request.url, &headers);
        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            "fetched {} {} via {} -> {} in {}ms ({} bytes)",
            request.method,
            request.url,
            target,
            status.as_u16(),
            fetch_ms,
            body.len()
        );

        Ok(HttpResponse { status, headers, body, kind, url: request.url.clone() })
    }
}
