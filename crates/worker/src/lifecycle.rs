//! Installation, activation and refresh of cache generations.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use harbor_core::{ControlEvent, Error, Fetcher, Generation, ResourceIdentity, ResponseSnapshot, VersionDescriptor};

use crate::context::WorkerContext;
use crate::tracker::VersionTracker;

#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub generation: String,
    pub cached: usize,
    pub version: Option<VersionDescriptor>,
    /// The network was unavailable and a complete stored generation is
    /// served instead.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    /// Generations removed because they are no longer current.
    pub deleted: Vec<String>,
    pub claimed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub generation: String,
    pub refreshed: usize,
    pub failed: Vec<String>,
    pub version: Option<VersionDescriptor>,
}

pub struct LifecycleManager {
    ctx: WorkerContext,
    tracker: Arc<VersionTracker>,
    check_interval: Duration,
    initial_check_delay: Duration,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        ctx: WorkerContext, tracker: Arc<VersionTracker>, check_interval: Duration, initial_check_delay: Duration,
    ) -> Self {
        Self { ctx, tracker, check_interval, initial_check_delay, periodic: Mutex::new(None) }
    }

    /// Populate the current asset generation with every core resource and
    /// load the version descriptor.
    ///
    /// The core set is stored completely or not at all. A generation created
    /// by a failed install is removed again. When the fetch fails but the
    /// generation already holds every core resource from an earlier run, the
    /// stored copy is kept and the install succeeds from it.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let name = self.ctx.names.read().await.assets();
        let existed = self.ctx.db.generation_exists(&name).await?;
        let generation = self.ctx.db.open_generation(&name).await?;

        tracing::info!("installing {} core resources into {}", self.ctx.core.len(), name);

        let (stored, version) = tokio::join!(
            generation.put_all(self.ctx.core.as_slice(), self.ctx.fetcher.as_ref()),
            self.tracker.load_initial()
        );

        let error = match stored {
            Ok(cached) => {
                tracing::info!("installed {} ({} entries)", name, cached);
                return Ok(InstallReport { generation: name, cached, version, reused: false });
            }
            Err(e) => e,
        };

        if existed && self.holds_core_set(&generation).await {
            let cached = generation.len().await?;
            tracing::warn!("install of {} could not refresh ({}), serving stored copy", name, error);
            return Ok(InstallReport { generation: name, cached, version, reused: true });
        }

        if !existed && let Err(cleanup) = self.ctx.db.delete_generation(&name).await {
            tracing::warn!("failed to remove partial generation {}: {}", name, cleanup);
        }
        tracing::error!("install of {} failed: {}", name, error);
        Err(Error::InstallFailed(format!("{name}: {error}")))
    }

    async fn holds_core_set(&self, generation: &Generation) -> bool {
        for identity in self.ctx.core.iter() {
            match generation.get(identity).await {
                Ok(Some(_)) => {}
                Ok(None) => return false,
                Err(e) => {
                    tracing::warn!("stored {} unreadable in {}: {}", identity, generation.name(), e);
                    return false;
                }
            }
        }
        true
    }

    /// Delete every generation that the current names do not own, claim
    /// connected clients and start periodic version checks.
    pub async fn activate(&self) -> Result<ActivateReport, Error> {
        let names = self.ctx.names().await;
        let mut deleted = Vec::new();

        for name in self.ctx.db.generation_names().await? {
            if names.is_current(&name) {
                continue;
            }
            if self.ctx.db.delete_generation(&name).await? {
                tracing::info!("deleted stale generation {}", name);
                deleted.push(name);
            }
        }

        let claimed = self.ctx.clients.claim().await;
        self.start_periodic_check().await;

        tracing::info!("activated {} (claimed {} clients)", names.assets(), claimed);
        Ok(ActivateReport { deleted, claimed })
    }

    /// Re-fetch every core resource into the current generation, or into the
    /// generation for `new_version`.
    ///
    /// Resources are refreshed independently; failures are logged and
    /// reported. With a new version the generation names switch to its tag
    /// and the tracker adopts it. Clients always get `CACHE_UPDATED`.
    pub async fn refresh_generation(&self, new_version: Option<VersionDescriptor>) -> Result<RefreshReport, Error> {
        let current = self.ctx.names().await;
        let target = match &new_version {
            Some(descriptor) => current.with_tag(descriptor.tag()),
            None => current,
        };
        let generation = self.ctx.db.open_generation(&target.assets()).await?;

        let results = join_all(
            self.ctx
                .core
                .iter()
                .map(|identity| refresh_entry(&generation, identity, self.ctx.fetcher.as_ref())),
        )
        .await;

        let mut refreshed = 0;
        let mut failed = Vec::new();
        for (identity, result) in self.ctx.core.iter().zip(results) {
            match result {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    tracing::warn!("refresh of {} failed: {}", identity, e);
                    failed.push(identity.url().to_string());
                }
            }
        }

        if let Some(descriptor) = new_version {
            *self.ctx.names.write().await = target.clone();
            self.tracker.adopt(descriptor).await;
        }

        let version = self.tracker.current_version().await;
        let event = ControlEvent::CacheUpdated { version: version.clone(), refreshed, failed: failed.clone() };
        self.ctx.clients.broadcast(&event).await;

        tracing::info!("refreshed {}: {} ok, {} failed", target.assets(), refreshed, failed.len());
        Ok(RefreshReport { generation: target.assets(), refreshed, failed, version })
    }

    /// Start periodic version checks, replacing any running schedule.
    pub async fn start_periodic_check(&self) {
        let handle = self
            .tracker
            .schedule_periodic_check(self.check_interval, self.initial_check_delay);
        if let Some(previous) = self.periodic.lock().await.replace(handle) {
            previous.abort();
        }
    }

    pub async fn stop_periodic_check(&self) {
        if let Some(handle) = self.periodic.lock().await.take() {
            handle.abort();
            tracing::debug!("stopped periodic version checks");
        }
    }

    pub async fn is_checking(&self) -> bool {
        self.periodic
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Fetch `identity` past every intermediate cache and overwrite its entry.
///
/// Only storable responses are written; anything else leaves the existing
/// entry alone and is reported as an error.
pub(crate) async fn refresh_entry(
    generation: &Generation, identity: &ResourceIdentity, fetcher: &dyn Fetcher,
) -> Result<(), Error> {
    let response = fetcher.fetch(&identity.to_request().cache_defeating()).await?;
    if !response.is_storable() {
        return Err(Error::HttpError(format!("{identity}: status {}", response.status.as_u16())));
    }
    generation.put(identity, &ResponseSnapshot::capture(&response)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockNetwork, context, url};
    use bytes::Bytes;

    fn manager(ctx: WorkerContext) -> LifecycleManager {
        let endpoint = ResourceIdentity::get(url("/version.json")).unwrap();
        let tracker = Arc::new(VersionTracker::new(ctx.clone(), endpoint));
        LifecycleManager::new(ctx, tracker, Duration::from_secs(300), Duration::from_secs(3600))
    }

    fn identity(path: &str) -> ResourceIdentity {
        ResourceIdentity::get(url(path)).unwrap()
    }

    #[tokio::test]
    async fn test_install_stores_core_set() {
        let ctx = context(MockNetwork::serve_core("1.0.0", "1")).await;
        let lifecycle = manager(ctx.clone());

        let report = lifecycle.install().await.unwrap();

        assert_eq!(report.generation, "harbor-v1.0.0");
        assert_eq!(report.cached, 10);
        assert_eq!(report.version, Some(VersionDescriptor::new("1.0.0", "1")));
        assert_eq!(ctx.assets().await.len().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_install_failure_leaves_nothing_behind() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        network.fail("/icons/icon-512.png");
        let ctx = context(network).await;
        let lifecycle = manager(ctx.clone());

        let result = lifecycle.install().await;

        assert!(matches!(result, Err(Error::InstallFailed(_))));
        assert!(!ctx.db.generation_exists("harbor-v1.0.0").await.unwrap());
    }

    #[tokio::test]
    async fn test_install_rejects_non_ok_core_resource() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        network.respond("/pages/gas.html", 500, "boom");
        let ctx = context(network).await;

        assert!(matches!(manager(ctx).install().await, Err(Error::InstallFailed(_))));
    }

    #[tokio::test]
    async fn test_offline_install_reuses_complete_generation() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let ctx = context(network.clone()).await;
        let lifecycle = manager(ctx.clone());
        lifecycle.install().await.unwrap();

        network.fail("/");
        let report = lifecycle.install().await.unwrap();

        assert!(report.reused);
        assert_eq!(report.cached, 10);
        let root = ctx.assets().await.get(&identity("/")).await.unwrap().unwrap();
        assert_eq!(root.body, Bytes::from_static(b"/ v1.0.0"));
    }

    #[tokio::test]
    async fn test_install_failure_keeps_incomplete_existing_generation() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        network.fail("/manifest.json");
        let ctx = context(network).await;
        let generation = ctx.db.open_generation("harbor-v1.0.0").await.unwrap();
        let snapshot = ResponseSnapshot {
            url: "http://app.test/".into(),
            status_code: 200,
            headers: Vec::new(),
            body: Bytes::from_static(b"old root"),
            stored_at: chrono::Utc::now().to_rfc3339(),
        };
        generation.put(&identity("/"), &snapshot).await.unwrap();

        let result = manager(ctx.clone()).install().await;

        assert!(matches!(result, Err(Error::InstallFailed(_))));
        assert_eq!(generation.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_activate_deletes_stale_generations() {
        let ctx = context(MockNetwork::serve_core("1.0.0", "1")).await;
        let lifecycle = manager(ctx.clone());
        lifecycle.install().await.unwrap();
        for name in ["harbor-v0.9.0", "version-v0.9.0", "harbor-v1.0.0-static", "other-app"] {
            ctx.db.open_generation(name).await.unwrap();
        }

        let report = lifecycle.activate().await.unwrap();

        let mut deleted = report.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["harbor-v0.9.0", "other-app", "version-v0.9.0"]);
        let remaining: Vec<String> = ctx.db.generation_names().await.unwrap().into_iter().collect();
        assert_eq!(remaining, vec!["harbor-v1.0.0", "harbor-v1.0.0-static", "version-v1.0.0"]);
        assert!(lifecycle.is_checking().await);

        lifecycle.stop_periodic_check().await;
        assert!(!lifecycle.is_checking().await);
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let ctx = context(MockNetwork::serve_core("1.0.0", "1")).await;
        let lifecycle = manager(ctx.clone());
        let (id, _rx) = ctx.clients.connect().await;

        let report = lifecycle.activate().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert!(ctx.clients.is_controlled(id).await);
        lifecycle.stop_periodic_check().await;
    }

    #[tokio::test]
    async fn test_refresh_reports_partial_failure() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let ctx = context(network.clone()).await;
        let lifecycle = manager(ctx.clone());
        lifecycle.install().await.unwrap();
        let (_, mut rx) = ctx.clients.connect().await;

        network.respond("/index.html", 200, "fresh index");
        network.fail("/pages/check.html");
        let report = lifecycle.refresh_generation(None).await.unwrap();

        assert_eq!(report.refreshed, 9);
        assert_eq!(report.failed, vec!["http://app.test/pages/check.html"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            ControlEvent::CacheUpdated {
                version: Some(VersionDescriptor::new("1.0.0", "1")),
                refreshed: 9,
                failed: vec!["http://app.test/pages/check.html".to_string()],
            }
        );

        let assets = ctx.assets().await;
        let index = assets.get(&identity("/index.html")).await.unwrap().unwrap();
        assert_eq!(index.body, Bytes::from_static(b"fresh index"));
        let check = assets.get(&identity("/pages/check.html")).await.unwrap().unwrap();
        assert_eq!(check.body, Bytes::from_static(b"/pages/check.html v1.0.0"));
        assert!(
            network
                .calls_to("/index.html")
                .iter()
                .skip(1)
                .all(|call| call.cache_defeating)
        );
    }

    #[tokio::test]
    async fn test_refresh_with_new_version_switches_generation() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let ctx = context(network.clone()).await;
        let lifecycle = manager(ctx.clone());
        lifecycle.install().await.unwrap();

        let report = lifecycle
            .refresh_generation(Some(VersionDescriptor::new("1.0.1", "2")))
            .await
            .unwrap();

        assert_eq!(report.generation, "harbor-v1.0.1");
        assert_eq!(report.version, Some(VersionDescriptor::new("1.0.1", "2")));
        assert_eq!(ctx.names().await.assets(), "harbor-v1.0.1");
        assert_eq!(ctx.assets().await.len().await.unwrap(), 10);
        assert!(ctx.db.generation_exists("version-v1.0.1").await.unwrap());

        lifecycle.activate().await.unwrap();
        assert!(!ctx.db.generation_exists("harbor-v1.0.0").await.unwrap());
        lifecycle.stop_periodic_check().await;
    }
}
