//! Scripted network and fixtures shared by the worker tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use url::Url;

use harbor_core::{
    AppConfig, CacheDb, CoreResources, Error, Fetcher, GenerationNames, HttpResponse, ProxyRequest, ResponseKind,
};

use crate::context::WorkerContext;

pub const ORIGIN: &str = "http://app.test";

#[derive(Clone)]
enum Reply {
    Respond(StatusCode, Bytes),
    Fail,
    Stall,
}

/// One request seen by [`MockNetwork`].
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: Url,
    pub cache_defeating: bool,
}

/// In-process network keyed by path (serving origin) or full URL.
///
/// Unknown routes answer 404.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<Call>>,
}

fn route_key(url: &Url) -> String {
    if url.origin().ascii_serialization() == ORIGIN { url.path().to_string() } else { url.to_string() }
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve every default core resource and the given descriptor.
    pub fn serve_core(version: &str, build: &str) -> Arc<Self> {
        let network = Self::new();
        for path in AppConfig::default().core_resources {
            network.respond(&path, 200, format!("{path} v{version}"));
        }
        network.set_version(version, build);
        network
    }

    pub fn respond(&self, route: &str, status: u16, body: impl Into<Bytes>) {
        let status = StatusCode::from_u16(status).unwrap();
        self.set(route, Reply::Respond(status, body.into()));
    }

    pub fn set_version(&self, version: &str, build: &str) {
        let body = format!(r#"{{"version":"{version}","build":"{build}"}}"#);
        self.respond("/version.json", 200, body);
    }

    /// Make a route fail with a network error.
    pub fn fail(&self, route: &str) {
        self.set(route, Reply::Fail);
    }

    /// Make a route never answer.
    pub fn stall(&self, route: &str) {
        self.set(route, Reply::Stall);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, route: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|call| route_key(&call.url) == route).collect()
    }

    fn set(&self, route: &str, reply: Reply) {
        self.routes.lock().unwrap().insert(route.to_string(), reply);
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: &ProxyRequest) -> Result<HttpResponse, Error> {
        let key = route_key(&request.url);
        self.calls.lock().unwrap().push(Call {
            method: request.method.clone(),
            url: request.url.clone(),
            cache_defeating: request.is_cache_defeating(),
        });

        let reply = self.routes.lock().unwrap().get(&key).cloned();
        let (status, body) = match reply {
            Some(Reply::Respond(status, body)) => (status, body),
            Some(Reply::Fail) => return Err(Error::Network(format!("connection refused: {}", request.url))),
            Some(Reply::Stall) => std::future::pending().await,
            None => (StatusCode::NOT_FOUND, Bytes::from_static(b"not found")),
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let kind = if key.starts_with('/') { ResponseKind::Basic } else { ResponseKind::Opaque };

        Ok(HttpResponse { status, headers, body, kind, url: request.url.clone() })
    }
}

/// Default configuration on the test origin, with periodic checks far away.
pub fn test_config() -> AppConfig {
    AppConfig { origin: ORIGIN.into(), initial_check_delay_ms: 3_600_000, ..Default::default() }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn get(path: &str) -> ProxyRequest {
    ProxyRequest::get(url(path))
}

pub fn navigate(path: &str) -> ProxyRequest {
    let mut request = get(path);
    request.headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    request
}

/// Context over an in-memory store with the default core list.
pub async fn context(network: Arc<MockNetwork>) -> WorkerContext {
    let config = test_config();
    let origin = config.origin_url().unwrap();
    let core = CoreResources::from_paths(&origin, &config.core_resources).unwrap();
    let names = GenerationNames::new(&config.app_prefix, &config.version_tag);
    let db = CacheDb::open_in_memory().await.unwrap();
    WorkerContext::new(db, network, origin, core, names)
}
