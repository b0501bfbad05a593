//! Request routing between the network and the current generation.
//!
//! ### Routes
//! - Non-GET and cross-origin requests pass through untouched.
//! - The version endpoint is network-first, falling back to the cached copy.
//! - Everything else is cache-first; hits on core resources are refreshed
//!   in the background.

use std::sync::Arc;

use http::Method;

use harbor_core::identity::same_origin;
use harbor_core::{Error, Generation, HttpResponse, ProxyRequest, ResourceIdentity, ResponseSnapshot};

use crate::context::WorkerContext;
use crate::lifecycle::refresh_entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PassThrough,
    VersionEndpoint,
    CacheFirst,
}

pub struct RequestInterceptor {
    ctx: WorkerContext,
    version_endpoint: ResourceIdentity,
    fallback: ResourceIdentity,
}

impl RequestInterceptor {
    pub fn new(ctx: WorkerContext, version_endpoint: ResourceIdentity, fallback: ResourceIdentity) -> Self {
        Self { ctx, version_endpoint, fallback }
    }

    pub fn route(&self, request: &ProxyRequest) -> Route {
        if request.method != Method::GET || !same_origin(&request.url, &self.ctx.origin) {
            Route::PassThrough
        } else if request.url.path() == self.version_endpoint.url().path() {
            Route::VersionEndpoint
        } else {
            Route::CacheFirst
        }
    }

    /// Answer an intercepted request.
    ///
    /// Returns `Ok(None)` when the request is not handled here and should be
    /// forwarded as-is.
    pub async fn handle(&self, request: &ProxyRequest) -> Result<Option<HttpResponse>, Error> {
        match self.route(request) {
            Route::PassThrough => Ok(None),
            Route::VersionEndpoint => self.serve_version(request).await.map(Some),
            Route::CacheFirst => self.serve_cache_first(request).await.map(Some),
        }
    }

    async fn serve_version(&self, request: &ProxyRequest) -> Result<HttpResponse, Error> {
        let error = match self.ctx.fetcher.fetch(&request.clone().cache_defeating()).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_network() => e,
            Err(e) => return Err(e),
        };

        for generation in [self.ctx.version_generation().await, self.ctx.assets().await] {
            if let Some(response) = lookup(&generation, &self.version_endpoint).await {
                tracing::debug!("version endpoint offline, serving copy from {}", generation.name());
                return Ok(response);
            }
        }

        Err(error)
    }

    async fn serve_cache_first(&self, request: &ProxyRequest) -> Result<HttpResponse, Error> {
        let identity = ResourceIdentity::from_request(request)?;
        let generation = self.ctx.assets().await;

        if let Some(response) = lookup(&generation, &identity).await {
            tracing::debug!("cache hit: {}", identity);
            if self.ctx.core.contains(&identity) {
                self.spawn_refresh(generation, identity);
            }
            return Ok(response);
        }

        tracing::debug!("cache miss: {}", identity);
        match self.ctx.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_storable() {
                    let snapshot = ResponseSnapshot::capture(&response);
                    if let Err(e) = generation.put(&identity, &snapshot).await {
                        tracing::warn!("failed to cache {}: {}", identity, e);
                    }
                }
                Ok(response)
            }
            Err(e) if e.is_network() && request.is_navigation() => match lookup(&generation, &self.fallback).await {
                Some(response) => {
                    tracing::debug!("offline navigation to {}, serving {}", identity, self.fallback);
                    Ok(response)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn spawn_refresh(&self, generation: Generation, identity: ResourceIdentity) {
        let fetcher = Arc::clone(&self.ctx.fetcher);
        tokio::spawn(async move {
            match refresh_entry(&generation, &identity, fetcher.as_ref()).await {
                Ok(()) => tracing::debug!("refreshed {} in background", identity),
                Err(e) => tracing::warn!("background refresh of {} failed: {}", identity, e),
            }
        });
    }
}

/// Read an entry as a servable response; unreadable entries count as misses.
async fn lookup(generation: &Generation, identity: &ResourceIdentity) -> Option<HttpResponse> {
    let snapshot = match generation.get(identity).await {
        Ok(snapshot) => snapshot?,
        Err(e) => {
            tracing::warn!("cache read for {} in {} failed: {}", identity, generation.name(), e);
            return None;
        }
    };

    match snapshot.to_response() {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::warn!("ignoring cached {}: {}", identity, e);
            None
        }
    }
}
