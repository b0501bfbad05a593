//! The worker runtime.
//!
//! Feeds events through the dispatch table, carries out the resulting
//! effects and queues their follow-up events until the table settles.

pub mod dispatch;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use harbor_core::{
    AppConfig, CacheDb, ControlCommand, ControlEvent, CoreResources, Error, Fetcher, GenerationNames, HttpResponse,
    ProxyRequest,
};

use crate::context::WorkerContext;
use crate::intercept::RequestInterceptor;
use crate::lifecycle::LifecycleManager;
use crate::notify::{ClientId, ClientRegistry};
use crate::tracker::VersionTracker;
use dispatch::{Effect, Phase, WorkerEvent};

pub struct Worker {
    phase: Mutex<Phase>,
    ctx: WorkerContext,
    tracker: Arc<VersionTracker>,
    lifecycle: LifecycleManager,
    interceptor: RequestInterceptor,
}

impl Worker {
    pub fn new(config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Result<Self, Error> {
        let origin = config.origin_url().map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let core = CoreResources::from_paths(&origin, &config.core_resources)?;
        let names = GenerationNames::new(&config.app_prefix, &config.version_tag);
        let ctx = WorkerContext::new(db, fetcher, origin, core, names);

        let tracker = Arc::new(VersionTracker::new(ctx.clone(), ctx.identity_for(&config.version_path)?));
        let lifecycle = LifecycleManager::new(
            ctx.clone(),
            Arc::clone(&tracker),
            config.check_interval(),
            config.initial_check_delay(),
        );
        let fallback = ctx.identity_for(&config.fallback_document)?;
        let interceptor = RequestInterceptor::new(ctx.clone(), tracker.endpoint().clone(), fallback);

        Ok(Self { phase: Mutex::new(Phase::Parsed), ctx, tracker, lifecycle, interceptor })
    }

    pub async fn phase(&self) -> Phase {
        *self.phase.lock().await
    }

    /// Install and, on success, activate.
    pub async fn start(&self) -> Result<(), Error> {
        self.dispatch(WorkerEvent::Install).await.map(|_| ())
    }

    /// Run `event` and every follow-up it causes.
    ///
    /// Returns the reply produced along the way, if any. All effects run
    /// even when one fails; the first failure is returned.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<Option<ControlEvent>, Error> {
        let mut queue = VecDeque::from([event]);
        let mut reply = None;
        let mut first_error = None;

        while let Some(event) = queue.pop_front() {
            let transition = {
                let mut phase = self.phase.lock().await;
                let transition = dispatch::dispatch(*phase, &event);
                if transition.phase != *phase {
                    tracing::info!("worker {:?} -> {:?}", *phase, transition.phase);
                }
                *phase = transition.phase;
                transition
            };

            for effect in transition.effects {
                match self.run_effect(effect, &mut queue).await {
                    Ok(Some(event)) => reply = Some(event),
                    Ok(None) => {}
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reply),
        }
    }

    async fn run_effect(
        &self, effect: Effect, queue: &mut VecDeque<WorkerEvent>,
    ) -> Result<Option<ControlEvent>, Error> {
        match effect {
            Effect::Install => match self.lifecycle.install().await {
                Ok(_) => queue.push_back(WorkerEvent::InstallSucceeded),
                Err(e) => {
                    queue.push_back(WorkerEvent::InstallFailed);
                    return Err(e);
                }
            },
            Effect::SkipWaiting => queue.push_back(WorkerEvent::Activate),
            Effect::Activate => {
                self.lifecycle.activate().await?;
                queue.push_back(WorkerEvent::Activated);
            }
            Effect::CheckForUpdate => {
                self.tracker.check_for_update().await;
            }
            Effect::ForceUpdate => {
                let latest = self.tracker.load_initial().await;
                let tag = self.ctx.names().await.tag().to_string();
                let new_version = latest.filter(|descriptor| descriptor.tag() != tag);
                self.lifecycle.refresh_generation(new_version).await?;
            }
            Effect::RefreshCache => {
                self.lifecycle.refresh_generation(None).await?;
            }
            Effect::ReplyVersion { to } => {
                let event = ControlEvent::VersionInfo { version: self.tracker.current_version().await };
                if let Some(id) = to
                    && !self.ctx.clients.post(id, event.clone()).await
                {
                    tracing::debug!("{} left before its version reply", id);
                }
                return Ok(Some(event));
            }
            Effect::PushReceived { payload } => {
                tracing::info!("push received ({} bytes)", payload.as_deref().map_or(0, str::len));
            }
            Effect::SyncRequested { tag } => {
                tracing::info!("sync requested: {}", tag);
            }
        }
        Ok(None)
    }

    /// Handle a command from a connected client.
    pub async fn handle_message(&self, from: ClientId, command: ControlCommand) -> Result<Option<ControlEvent>, Error> {
        tracing::debug!("{} sent {:?}", from, command);
        self.dispatch(WorkerEvent::Message { from: Some(from), command }).await
    }

    pub async fn push(&self, payload: Option<String>) -> Result<(), Error> {
        self.dispatch(WorkerEvent::Push { payload }).await.map(|_| ())
    }

    pub async fn sync(&self, tag: impl Into<String>) -> Result<(), Error> {
        self.dispatch(WorkerEvent::Sync { tag: tag.into() }).await.map(|_| ())
    }

    /// Answer a proxied request.
    ///
    /// Returns `Ok(None)` when the request should be forwarded untouched,
    /// which is always the case until the worker is active.
    pub async fn handle_fetch(&self, request: &ProxyRequest) -> Result<Option<HttpResponse>, Error> {
        if self.phase().await != Phase::Activated {
            return Ok(None);
        }
        self.interceptor.handle(request).await
    }

    pub async fn shutdown(&self) {
        self.lifecycle.stop_periodic_check().await;
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.ctx.clients
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.ctx.fetcher
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }
}
