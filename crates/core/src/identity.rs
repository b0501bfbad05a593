//! Resource identities and the core resource list.
//!
//! ### URL Canonicalization
//! - Trim whitespace, require an http(s) scheme
//! - Lowercase host, remove fragments
//! - Preserve query string

use std::fmt;

use http::Method;
use url::Url;

use crate::Error;
use crate::cache::hash::compute_cache_key;
use crate::net::ProxyRequest;

/// Canonicalize an absolute URL string for consistent cache keys.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Reject anything but http:// and https://
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<Url, Error> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty URL".into()));
    }

    let parsed = Url::parse(trimmed).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;
    normalize(parsed)
}

/// Resolve a path (or absolute URL) against the serving origin and
/// canonicalize the result.
pub fn resolve(origin: &Url, path: &str) -> Result<Url, Error> {
    let joined = origin
        .join(path.trim())
        .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))?;
    normalize(joined)
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

fn normalize(mut url: Url) -> Result<Url, Error> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(Error::InvalidUrl(format!("unsupported scheme: {scheme}"))),
    }

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        url.set_host(Some(&lowered))
            .map_err(|e| Error::InvalidUrl(e.to_string()))?;
    }

    url.set_fragment(None);

    Ok(url)
}

/// Cache key of a request: normalized absolute URL plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    method: Method,
    url: Url,
}

impl ResourceIdentity {
    pub fn new(method: Method, url: Url) -> Result<Self, Error> {
        Ok(Self { method, url: normalize(url)? })
    }

    /// Identity of a `GET` for `url`.
    pub fn get(url: Url) -> Result<Self, Error> {
        Self::new(Method::GET, url)
    }

    pub fn from_request(request: &ProxyRequest) -> Result<Self, Error> {
        Self::new(request.method.clone(), request.url.clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Hex digest used as the storage key.
    pub fn cache_key(&self) -> String {
        compute_cache_key(self.method.as_str(), self.url.as_str())
    }

    /// A fresh request for this resource.
    pub fn to_request(&self) -> ProxyRequest {
        ProxyRequest::new(self.method.clone(), self.url.clone())
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Ordered set of resources that must always be present in the current
/// generation.
#[derive(Debug, Clone, Default)]
pub struct CoreResources {
    entries: Vec<ResourceIdentity>,
}

impl CoreResources {
    /// Build the list from same-origin paths, dropping duplicates while
    /// keeping first-seen order.
    pub fn from_paths<I, S>(origin: &Url, paths: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: Vec<ResourceIdentity> = Vec::new();
        for path in paths {
            let url = resolve(origin, path.as_ref())?;
            if !same_origin(origin, &url) {
                return Err(Error::InvalidInput(format!(
                    "core resource {url} is not on {}",
                    origin.origin().ascii_serialization()
                )));
            }
            let identity = ResourceIdentity::get(url)?;
            if !entries.contains(&identity) {
                entries.push(identity);
            }
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, identity: &ResourceIdentity) -> bool {
        self.entries.contains(identity)
    }

    pub fn as_slice(&self) -> &[ResourceIdentity] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceIdentity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
