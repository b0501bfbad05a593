//! Request/response model shared by the network client, the cache store and
//! the proxy front end, plus the [`Fetcher`] seam the engine fetches through.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use url::Url;

use crate::Error;

/// Headers that force every intermediate cache to be bypassed.
pub const CACHE_DEFEATING_HEADERS: [(&str, &str); 3] = [
    ("cache-control", "no-cache, no-store, must-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
];

/// Fetch-metadata header browsers attach to every request.
const SEC_FETCH_MODE: &str = "sec-fetch-mode";

/// An intercepted (or internally issued) HTTP request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// A bodiless request with no headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// A plain `GET` for `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add the cache-defeating header set, replacing any caller-provided
    /// caching directives.
    pub fn cache_defeating(mut self) -> Self {
        for (name, value) in CACHE_DEFEATING_HEADERS {
            self.headers.insert(name, HeaderValue::from_static(value));
        }
        self
    }

    /// Whether this request carries the full cache-defeating header set.
    pub fn is_cache_defeating(&self) -> bool {
        CACHE_DEFEATING_HEADERS
            .iter()
            .all(|(name, value)| self.headers.get(*name).is_some_and(|v| v.as_bytes() == value.as_bytes()))
    }

    /// Whether this is a top-level page navigation.
    ///
    /// Trusts `Sec-Fetch-Mode` when present; otherwise a `GET` that accepts
    /// HTML is treated as a navigation.
    pub fn is_navigation(&self) -> bool {
        if self.method != Method::GET {
            return false;
        }

        if let Some(mode) = self.headers.get(SEC_FETCH_MODE) {
            return mode.as_bytes().eq_ignore_ascii_case(b"navigate");
        }

        self.headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|accept| accept.contains("text/html"))
    }
}

/// How a response relates to the serving origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response with full access to status, headers and body.
    Basic,
    /// Cross-origin response the other origin explicitly shared.
    Cors,
    /// Cross-origin response without sharing headers.
    Opaque,
}

/// A response produced by the network or reconstructed from the cache.
///
/// Deliberately not `Clone`: a body is read once, so a response that must be
/// both stored and returned is split with [`HttpResponse::duplicate`] first.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub kind: ResponseKind,
    /// URL of the request this answers (serving-origin form).
    pub url: Url,
}

impl HttpResponse {
    /// Whether this response may be written into a generation.
    pub fn is_storable(&self) -> bool {
        self.status == StatusCode::OK && self.kind == ResponseKind::Basic
    }

    /// Produce an independent copy of this response.
    pub fn duplicate(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            kind: self.kind,
            url: self.url.clone(),
        }
    }
}

/// Something that can perform network fetches.
///
/// Implemented by the reqwest-backed client in `harbor-worker` and by
/// scripted networks in tests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request against the network.
    ///
    /// Returns `Error::Network` when no response could be obtained at all;
    /// any HTTP status (including errors and redirects) is a successful fetch.
    async fn fetch(&self, request: &ProxyRequest) -> Result<HttpResponse, Error>;
}
