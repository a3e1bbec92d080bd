use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::ResourceService;
use crate::connection::{PostgresConfig, ReplicaRouter, connect_postgres};
use crate::core::{Context, StoreError, StoreResult};
use crate::store::{DocumentStore, ResourceKind};
use crate::version::{MonotonicAllocator, ResourceVersion, ResourceVersionAllocator};
use crate::watch::BroadcasterConfig;

/// Entry point: one router, one version allocator and one
/// [`ResourceService`] per kind.
pub struct Storage {
    router: Arc<ReplicaRouter>,
    versions: Arc<MonotonicAllocator>,
    services: BTreeMap<String, Arc<ResourceService>>,
}

impl Storage {
    /// Connect to Postgres and bootstrap every kind.
    pub async fn open(
        ctx: &Context,
        config: &PostgresConfig,
        kinds: Vec<ResourceKind>,
        broadcaster: BroadcasterConfig,
    ) -> StoreResult<Self> {
        info!(url = %config.to_url(), replicas = config.read_replica_hosts.len(), "Opening storage");
        let router = connect_postgres(ctx, config).await?;
        Self::with_router(ctx, Arc::new(router), kinds, broadcaster).await
    }

    /// Bootstrap every kind over an existing router and seed the version
    /// allocator past every stored version.
    pub async fn with_router(
        ctx: &Context,
        router: Arc<ReplicaRouter>,
        kinds: Vec<ResourceKind>,
        broadcaster: BroadcasterConfig,
    ) -> StoreResult<Self> {
        let versions = Arc::new(MonotonicAllocator::new());
        let mut services = BTreeMap::new();

        for kind in kinds {
            let name = kind.kind.clone();
            if services.contains_key(&name) {
                return Err(StoreError::InvalidArgument(format!("kind {} registered twice", name)));
            }

            let store = DocumentStore::new(kind, Arc::clone(&router), versions.clone())?;
            store.bootstrap(ctx).await?;
            if let Some(max) = store.max_resource_version(ctx).await? {
                versions.observe(max);
            }
            services.insert(name, Arc::new(ResourceService::new(store, broadcaster)));
        }

        info!(
            kinds = services.len(),
            resource_version = %versions.current(),
            "Storage ready"
        );
        Ok(Self {
            router,
            versions,
            services,
        })
    }

    /// Service for a kind, by kind name.
    pub fn kind(&self, kind: &str) -> StoreResult<Arc<ResourceService>> {
        self.services
            .get(kind)
            .cloned()
            .ok_or_else(|| StoreError::not_found("kind", kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn router(&self) -> &Arc<ReplicaRouter> {
        &self.router
    }

    /// Latest version handed out across all kinds.
    pub fn current_version(&self) -> ResourceVersion {
        self.versions.current()
    }

    /// Readiness probe: the primary answers a ping.
    pub async fn ready(&self, ctx: &Context) -> bool {
        self.router.ready(ctx).await
    }

    /// End every watch stream of every kind.
    pub async fn shutdown(&self) {
        for service in self.services.values() {
            service.destroy().await;
        }
        info!("Storage shut down");
    }
}
