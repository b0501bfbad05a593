//! Remote version tracking.
//!
//! The tracker owns the current [`VersionDescriptor`] and the time of the
//! last check. Checks always go to the network with cache-defeating headers;
//! a best-effort copy of the adopted descriptor is kept in the version
//! generation so a restart while offline still knows its version.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use harbor_core::{ControlEvent, Error, ResourceIdentity, ResponseSnapshot, VersionDescriptor};

use crate::context::WorkerContext;

/// Result of comparing the remote descriptor with the current one.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCheck {
    NoUpdate,
    UpdateAvailable {
        current: Option<VersionDescriptor>,
        latest: VersionDescriptor,
    },
}

#[derive(Debug, Default)]
struct TrackerState {
    current: Option<VersionDescriptor>,
    last_check: Option<Instant>,
}

pub struct VersionTracker {
    ctx: WorkerContext,
    endpoint: ResourceIdentity,
    state: RwLock<TrackerState>,
}

impl VersionTracker {
    pub fn new(ctx: WorkerContext, endpoint: ResourceIdentity) -> Self {
        Self { ctx, endpoint, state: RwLock::new(TrackerState::default()) }
    }

    /// Identity of the version endpoint.
    pub fn endpoint(&self) -> &ResourceIdentity {
        &self.endpoint
    }

    pub async fn current_version(&self) -> Option<VersionDescriptor> {
        self.state.read().await.current.clone()
    }

    /// Establish the current descriptor, preferring the network.
    ///
    /// Falls back to the persisted copy when the endpoint cannot be read.
    /// Never fails; if neither source works the current descriptor is left as
    /// it was.
    pub async fn load_initial(&self) -> Option<VersionDescriptor> {
        match self.fetch_remote().await {
            Ok(descriptor) => {
                tracing::info!("loaded version {} (build {})", descriptor.version, descriptor.build);
                self.adopt(descriptor.clone()).await;
                return Some(descriptor);
            }
            Err(e) => tracing::warn!("version endpoint unavailable, trying cached copy: {}", e),
        }

        match self.read_persisted().await {
            Ok(Some(descriptor)) => {
                tracing::info!("using cached version {} (build {})", descriptor.version, descriptor.build);
                self.state.write().await.current = Some(descriptor.clone());
                Some(descriptor)
            }
            Ok(None) => self.current_version().await,
            Err(e) => {
                tracing::warn!("cached version unreadable: {}", e);
                self.current_version().await
            }
        }
    }

    /// Compare the remote descriptor with the current one.
    ///
    /// A different release is broadcast to every client as
    /// `UPDATE_AVAILABLE` and becomes the current descriptor, so the same
    /// release is announced once. Failures are logged and reported as no
    /// update.
    pub async fn check_for_update(&self) -> UpdateCheck {
        self.state.write().await.last_check = Some(Instant::now());

        let latest = match self.fetch_remote().await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("version check failed: {}", e);
                return UpdateCheck::NoUpdate;
            }
        };

        let current = self.current_version().await;
        if current.as_ref().is_some_and(|c| c.same_release(&latest)) {
            tracing::debug!("version {} is current", latest.version);
            return UpdateCheck::NoUpdate;
        }

        self.adopt(latest.clone()).await;

        let event = ControlEvent::UpdateAvailable { current: current.clone(), latest: latest.clone() };
        let reached = self.ctx.clients.broadcast(&event).await;
        tracing::info!(
            "update available: {} -> {} (notified {} clients)",
            current.as_ref().map_or("none", |c| c.version.as_str()),
            latest.version,
            reached
        );

        UpdateCheck::UpdateAvailable { current, latest }
    }

    /// Make `descriptor` the current one and persist a copy into the version
    /// generation for its own tag.
    pub async fn adopt(&self, descriptor: VersionDescriptor) {
        self.state.write().await.current = Some(descriptor.clone());
        if let Err(e) = self.persist(&descriptor).await {
            tracing::warn!("failed to persist version {}: {}", descriptor.version, e);
        }
    }

    /// Whether a periodic tick should run a check.
    ///
    /// Ticks may arrive up to a tenth of the interval early.
    pub async fn check_due(&self, interval: Duration) -> bool {
        match self.state.read().await.last_check {
            Some(last) => last.elapsed() >= interval.mul_f64(0.9),
            None => true,
        }
    }

    /// Check once after `initial_delay`, then on every `interval` tick that
    /// is due.
    pub fn schedule_periodic_check(self: &Arc<Self>, interval: Duration, initial_delay: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tracker.check_due(interval).await {
                    tracker.check_for_update().await;
                } else {
                    tracing::debug!("skipping periodic version check, last check is recent");
                }
            }
        })
    }

    async fn fetch_remote(&self) -> Result<VersionDescriptor, Error> {
        let request = self.endpoint.to_request().cache_defeating();
        let response = self.ctx.fetcher.fetch(&request).await?;
        if !response.status.is_success() {
            return Err(Error::HttpError(format!("{}: status {}", self.endpoint, response.status.as_u16())));
        }
        VersionDescriptor::from_slice(&response.body)
    }

    async fn persist(&self, descriptor: &VersionDescriptor) -> Result<(), Error> {
        let name = self.ctx.names.read().await.with_tag(descriptor.tag()).version();
        let generation = self.ctx.db.open_generation(&name).await?;
        let snapshot = ResponseSnapshot {
            url: self.endpoint.url().to_string(),
            status_code: 200,
            headers: vec![("content-type".to_string(), b"application/json".to_vec())],
            body: descriptor.to_vec()?.into(),
            stored_at: chrono::Utc::now().to_rfc3339(),
        };
        generation.put(&self.endpoint, &snapshot).await
    }

    async fn read_persisted(&self) -> Result<Option<VersionDescriptor>, Error> {
        let generation = self.ctx.version_generation().await;
        match generation.get(&self.endpoint).await? {
            Some(snapshot) => VersionDescriptor::from_slice(&snapshot.body).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockNetwork, context, url};

    async fn tracker(network: Arc<MockNetwork>) -> Arc<VersionTracker> {
        let ctx = context(network).await;
        let endpoint = ResourceIdentity::get(url("/version.json")).unwrap();
        Arc::new(VersionTracker::new(ctx, endpoint))
    }

    #[tokio::test]
    async fn test_load_initial_from_network() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;

        let loaded = tracker.load_initial().await;

        assert_eq!(loaded, Some(VersionDescriptor::new("1.0.0", "1")));
        assert_eq!(tracker.current_version().await, loaded);
        assert!(network.calls_to("/version.json")[0].cache_defeating);
        assert_eq!(tracker.read_persisted().await.unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_load_initial_falls_back_to_persisted_copy() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;
        tracker.load_initial().await;

        network.fail("/version.json");
        tracker.state.write().await.current = None;

        assert_eq!(tracker.load_initial().await, Some(VersionDescriptor::new("1.0.0", "1")));
    }

    #[tokio::test]
    async fn test_load_initial_without_any_source() {
        let network = MockNetwork::new();
        network.fail("/version.json");
        let tracker = tracker(network).await;

        assert_eq!(tracker.load_initial().await, None);
        assert_eq!(tracker.current_version().await, None);
    }

    #[tokio::test]
    async fn test_check_reports_and_broadcasts_new_release() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;
        tracker.load_initial().await;
        let (_, mut rx) = tracker.ctx.clients.connect().await;

        assert_eq!(tracker.check_for_update().await, UpdateCheck::NoUpdate);

        network.set_version("1.0.1", "2");
        let expected = UpdateCheck::UpdateAvailable {
            current: Some(VersionDescriptor::new("1.0.0", "1")),
            latest: VersionDescriptor::new("1.0.1", "2"),
        };
        assert_eq!(tracker.check_for_update().await, expected);

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            ControlEvent::UpdateAvailable {
                current: Some(VersionDescriptor::new("1.0.0", "1")),
                latest: VersionDescriptor::new("1.0.1", "2"),
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.current_version().await, Some(VersionDescriptor::new("1.0.1", "2")));

        assert_eq!(tracker.check_for_update().await, UpdateCheck::NoUpdate);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_check_without_baseline_reports_update() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network).await;

        let check = tracker.check_for_update().await;
        assert_eq!(
            check,
            UpdateCheck::UpdateAvailable { current: None, latest: VersionDescriptor::new("1.0.0", "1") }
        );
    }

    #[tokio::test]
    async fn test_check_swallows_failures() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;
        tracker.load_initial().await;

        network.fail("/version.json");
        assert_eq!(tracker.check_for_update().await, UpdateCheck::NoUpdate);

        network.respond("/version.json", 503, "maintenance");
        assert_eq!(tracker.check_for_update().await, UpdateCheck::NoUpdate);

        network.respond("/version.json", 200, "<html>");
        assert_eq!(tracker.check_for_update().await, UpdateCheck::NoUpdate);
    }

    #[tokio::test]
    async fn test_adopt_persists_under_own_tag() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network).await;
        tracker.load_initial().await;

        tracker.adopt(VersionDescriptor::new("2.0.0", "9")).await;

        assert_eq!(tracker.read_persisted().await.unwrap(), Some(VersionDescriptor::new("1.0.0", "1")));
        let copy = tracker
            .ctx
            .db
            .generation("version-v2.0.0")
            .get(&tracker.endpoint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(VersionDescriptor::from_slice(&copy.body).unwrap(), VersionDescriptor::new("2.0.0", "9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_schedule() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;

        let handle = tracker.schedule_periodic_check(Duration::from_secs(60), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(network.calls_to("/version.json").len(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(network.calls_to("/version.json").len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(network.calls_to("/version.json").len(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_check_suppresses_next_tick() {
        let network = MockNetwork::serve_core("1.0.0", "1");
        let tracker = tracker(network.clone()).await;

        let handle = tracker.schedule_periodic_check(Duration::from_secs(60), Duration::from_secs(5));

        // first tick at 5s
        tokio::time::sleep(Duration::from_secs(30)).await;
        tracker.check_for_update().await;
        assert_eq!(network.calls_to("/version.json").len(), 2);

        // tick at 65s is only 30s after the manual check
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(network.calls_to("/version.json").len(), 2);

        // tick at 125s runs
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(network.calls_to("/version.json").len(), 3);

        handle.abort();
    }
}
