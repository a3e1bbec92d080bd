#![allow(dead_code)]

use std::sync::{Arc, Once};

use catalogdb::{
    BroadcasterConfig, Document, MemoryDatabase, MemoryHandle, ReplicaRouter, ResourceKind,
    SqlHandle, Storage, Context,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route crate logs to the test output. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A primary and its replicas over one in-memory database.
pub struct Cluster {
    pub db: Arc<MemoryDatabase>,
    pub primary: Arc<MemoryHandle>,
    pub replicas: Vec<Arc<MemoryHandle>>,
    pub router: Arc<ReplicaRouter>,
}

pub fn cluster(replica_count: usize) -> Cluster {
    init_tracing();
    let db = MemoryDatabase::new();
    cluster_over(db, replica_count)
}

pub fn cluster_over(db: Arc<MemoryDatabase>, replica_count: usize) -> Cluster {
    let primary = Arc::new(db.handle("primary"));
    let replicas: Vec<Arc<MemoryHandle>> = (0..replica_count)
        .map(|i| Arc::new(db.handle(&format!("replica-{}", i + 1))))
        .collect();

    let router = Arc::new(ReplicaRouter::new(
        primary.clone(),
        replicas
            .iter()
            .map(|r| r.clone() as Arc<dyn SqlHandle>)
            .collect(),
    ));

    Cluster {
        db,
        primary,
        replicas,
        router,
    }
}

pub async fn storage(cluster: &Cluster) -> Storage {
    storage_with(cluster, BroadcasterConfig::default()).await
}

pub async fn storage_with(cluster: &Cluster, config: BroadcasterConfig) -> Storage {
    Storage::with_router(
        &Context::background(),
        cluster.router.clone(),
        ResourceKind::report_kinds(),
        config,
    )
    .await
    .expect("storage should bootstrap")
}

/// A policy report with a small opaque body.
pub fn report(name: &str, namespace: &str) -> Document {
    Document::new(name)
        .with_namespace(namespace)
        .with_field("apiVersion", json!("wgpolicyk8s.io/v1alpha2"))
        .with_field("kind", json!("PolicyReport"))
        .with_field("summary", json!({"pass": 4, "fail": 1, "warn": 0}))
        .with_field(
            "results",
            json!([{"policy": "require-labels", "result": "fail"}]),
        )
}
