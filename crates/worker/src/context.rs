use std::sync::Arc;

use url::Url;

use harbor_core::{CacheDb, CoreResources, Error, Fetcher, Generation, GenerationNames, ResourceIdentity};

use crate::SharedNames;
use crate::notify::ClientRegistry;

/// Handles every worker component shares.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: CacheDb,
    pub fetcher: Arc<dyn Fetcher>,
    /// Origin the proxy serves; only same-origin GETs are cached.
    pub origin: Url,
    pub core: Arc<CoreResources>,
    pub names: SharedNames,
    pub clients: Arc<ClientRegistry>,
}

impl WorkerContext {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, origin: Url, core: CoreResources, names: GenerationNames,
    ) -> Self {
        Self {
            db,
            fetcher,
            origin,
            core: Arc::new(core),
            names: Arc::new(tokio::sync::RwLock::new(names)),
            clients: Arc::new(ClientRegistry::new()),
        }
    }

    /// Snapshot of the current generation names.
    pub async fn names(&self) -> GenerationNames {
        self.names.read().await.clone()
    }

    /// Handle to the current asset generation.
    pub async fn assets(&self) -> Generation {
        let name = self.names.read().await.assets();
        self.db.generation(&name)
    }

    /// Handle to the current version generation.
    pub async fn version_generation(&self) -> Generation {
        let name = self.names.read().await.version();
        self.db.generation(&name)
    }

    /// Identity of a same-origin GET for `path`.
    pub fn identity_for(&self, path: &str) -> Result<ResourceIdentity, Error> {
        ResourceIdentity::get(harbor_core::identity::resolve(&self.origin, path)?)
    }
}
