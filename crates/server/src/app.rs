//! HTTP front end: routes, shared state and the proxy fallback.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use url::Url;

use harbor_core::identity::{canonicalize, resolve};
use harbor_core::{AppConfig, HttpResponse, ProxyRequest};
use harbor_worker::Worker;

use crate::control;
use crate::error::ProxyError;

#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
    pub origin: Url,
    pub max_bytes: usize,
    pub control_path: String,
}

impl AppState {
    pub fn new(worker: Arc<Worker>, config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            worker,
            origin: config.origin_url()?,
            max_bytes: config.max_bytes,
            control_path: config.control_path.clone(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let control_path = state.control_path.clone();
    Router::new()
        .route(&control_path, get(control::upgrade))
        .route("/__harbor/push", post(control::push))
        .route("/__harbor/sync/{tag}", post(control::sync))
        .fallback(proxy)
        .with_state(state)
}

/// Let the worker answer, otherwise forward untouched.
async fn proxy(State(state): State<AppState>, request: Request) -> Result<Response, ProxyError> {
    let request = to_proxy_request(&state, request).await?;

    let response = match state.worker.handle_fetch(&request).await? {
        Some(response) => response,
        None => state.worker.fetcher().fetch(&request).await?,
    };

    Ok(to_response(response))
}

/// Requests in origin form are taken to address the serving origin.
async fn to_proxy_request(state: &AppState, request: Request) -> Result<ProxyRequest, ProxyError> {
    let (parts, body) = request.into_parts();

    let url = if parts.uri.scheme().is_some() {
        canonicalize(&parts.uri.to_string())?
    } else {
        let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        resolve(&state.origin, target)?
    };

    let body = axum::body::to_bytes(body, state.max_bytes)
        .await
        .map_err(|e| ProxyError::InvalidInput(format!("request body: {e}")))?;

    Ok(ProxyRequest { method: parts.method, url, headers: parts.headers, body })
}

fn to_response(response: HttpResponse) -> Response {
    let mut headers = response.headers;
    headers.remove(header::CONTENT_LENGTH);

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = headers;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use bytes::Bytes;
    use harbor_core::{CacheDb, Error, Fetcher, ResponseKind};
    use harbor_worker::{FetchClient, FetchConfig};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Serves `<path> body` for every path unless offline.
    #[derive(Default)]
    struct Upstream {
        offline: Mutex<bool>,
        seen: Mutex<Vec<(Method, String, Bytes)>>,
        statuses: Mutex<HashMap<String, u16>>,
    }

    #[async_trait]
    impl Fetcher for Upstream {
        async fn fetch(&self, request: &ProxyRequest) -> Result<HttpResponse, Error> {
            self.seen
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.to_string(), request.body.clone()));
            if *self.offline.lock().unwrap() {
                return Err(Error::Network(format!("connection refused: {}", request.url)));
            }

            let path = request.url.path().to_string();
            let body = if path == "/version.json" {
                Bytes::from_static(br#"{"version":"1.0.0","build":"1"}"#)
            } else {
                Bytes::from(format!("{path} body"))
            };
            let status = self.statuses.lock().unwrap().get(&path).copied().unwrap_or(200);

            let mut headers = axum::http::HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
            Ok(HttpResponse {
                status: StatusCode::from_u16(status).unwrap(),
                headers,
                body,
                kind: ResponseKind::Basic,
                url: request.url.clone(),
            })
        }
    }

    fn config() -> AppConfig {
        AppConfig { origin: "http://app.test".into(), initial_check_delay_ms: 3_600_000, ..Default::default() }
    }

    async fn app(started: bool) -> (Router, Arc<Upstream>, Arc<Worker>) {
        let upstream = Arc::new(Upstream::default());
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Arc::new(Worker::new(&config(), db, upstream.clone()).unwrap());
        if started {
            worker.start().await.unwrap();
        }
        let state = AppState::new(Arc::clone(&worker), &config()).unwrap();
        (router(state), upstream, worker)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_cached_page_served_offline() {
        let (app, upstream, worker) = app(true).await;
        *upstream.offline.lock().unwrap() = true;

        let request = Request::builder().uri("/pages/gas.html").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "/pages/gas.html body");
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_post_forwarded_with_body() {
        let (app, upstream, worker) = app(true).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/invoices")
            .body(Body::from("{\"total\":3}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let seen = upstream.seen.lock().unwrap().clone();
        let (method, url, body) = seen.last().unwrap();
        assert_eq!(*method, Method::POST);
        assert_eq!(url, "http://app.test/api/invoices");
        assert_eq!(body, &Bytes::from_static(b"{\"total\":3}"));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_network_failure_is_bad_gateway() {
        let (app, upstream, worker) = app(true).await;
        *upstream.offline.lock().unwrap() = true;

        let request = Request::builder().uri("/scripts/app.js").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(response).await.starts_with("NETWORK_ERROR"));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_offline_navigation_gets_root_document() {
        let (app, upstream, worker) = app(true).await;
        *upstream.offline.lock().unwrap() = true;

        let request = Request::builder()
            .uri("/pages/unknown.html")
            .header("sec-fetch-mode", "navigate")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "/index.html body");
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_upstream_error_status_passes_through() {
        let (app, upstream, worker) = app(true).await;
        upstream.statuses.lock().unwrap().insert("/missing".into(), 404);

        let request = Request::builder().uri("/missing").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_not_started_forwards_everything() {
        let (app, upstream, _worker) = app(false).await;

        let request = Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_absolute_form_to_internal_host_is_forbidden() {
        let fetcher = FetchClient::new(FetchConfig::from_app(&config()).unwrap()).unwrap();
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Arc::new(Worker::new(&config(), db, Arc::new(fetcher)).unwrap());
        let app = router(AppState::new(worker, &config()).unwrap());

        let request = Request::builder()
            .uri("http://169.254.169.254/latest/meta-data/")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_text(response).await.starts_with("SSRF_BLOCKED"));
    }

    #[tokio::test]
    async fn test_hooks_accept() {
        let (app, _upstream, worker) = app(true).await;

        let push = Request::builder()
            .method(Method::POST)
            .uri("/__harbor/push")
            .body(Body::from("new invoice template"))
            .unwrap();
        let response = app.clone().oneshot(push).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let sync = Request::builder()
            .method(Method::POST)
            .uri("/__harbor/sync/outbox")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(sync).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_control_path_requires_upgrade() {
        let (app, _upstream, worker) = app(true).await;

        let request = Request::builder().uri("/__harbor/control").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert!(response.status().is_client_error());
        worker.shutdown().await;
    }
}
