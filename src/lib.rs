// ============================================================================
// catalogdb Library
// ============================================================================

//! Replicated, SQL-backed document store for namespaced, multi-tenant
//! resource catalogs: versioned JSON documents, primary/replica routing
//! and ordered watch streams.
//!
//! # Examples
//!
//! ```no_run
//! use catalogdb::{Context, Document, PostgresConfig, ResourceKind, Storage};
//! use catalogdb::{BroadcasterConfig, CreateOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = Context::background();
//! let config = PostgresConfig::from_url("postgres://reports:secret@db:5432/reports")?;
//! let storage = Storage::open(&ctx, &config, ResourceKind::report_kinds(), BroadcasterConfig::default()).await?;
//!
//! let reports = storage.kind("PolicyReport")?;
//! let doc = Document::new("polr-nginx").with_namespace("default");
//! let created = reports.create(&ctx, "cluster-a", None, doc, &CreateOptions::default()).await?;
//! println!("stored at version {:?}", created.resource_version());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod core;
pub mod facade;
pub mod filter;
pub mod result;
pub mod sql;
pub mod storage;
pub mod store;
pub mod version;
pub mod watch;

// Re-export main types for convenience
pub use crate::core::{Context, DataType, DbError, Document, ObjectMeta, StoreError, StoreResult, Value};
pub use result::QueryResult;

// ============================================================================
// Connections
// ============================================================================

pub use connection::{
    PgHandle, PostgresConfig, ReplicaRouter, RetryPolicy, SqlHandle, SslMode, connect_postgres,
};
pub use storage::{MemoryDatabase, MemoryHandle};

// ============================================================================
// Documents, versions and watches
// ============================================================================

pub use facade::{CreateOptions, DeleteOptions, ResourceService, Storage, UpdateOptions};
pub use filter::{ConsistencyFilter, DocumentList, LabelSelector, ListOptions, ResourceVersionMatch};
pub use store::{DocumentStore, ResourceKind};
pub use version::{MonotonicAllocator, ResourceVersion, ResourceVersionAllocator};
pub use watch::{
    BroadcasterConfig, EventFilter, EventType, PublishReport, Subscription, WatchBroadcaster,
    WatchEvent,
};
