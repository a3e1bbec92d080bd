//! Generic CRUD over versioned JSON documents, one table per kind.

mod schema;

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ReplicaRouter;
use crate::core::document::DocumentKey;
use crate::core::{
    Context, DbError, Document, Row, StoreError, StoreResult, Value, validate_identifier,
};
use crate::result::QueryResult;
use crate::sql::Statement;
use crate::version::{ResourceVersion, ResourceVersionAllocator};

/// Static description of one resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKind {
    /// Kind name used in errors and logs, e.g. `PolicyReport`.
    pub kind: String,
    /// Backing table.
    pub table: String,
    /// Whether documents live in a namespace.
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn namespaced(kind: &str, table: &str) -> Self {
        Self {
            kind: kind.to_string(),
            table: table.to_string(),
            namespaced: true,
        }
    }

    pub fn cluster_scoped(kind: &str, table: &str) -> Self {
        Self {
            kind: kind.to_string(),
            table: table.to_string(),
            namespaced: false,
        }
    }

    /// The policy and ephemeral report kinds, namespaced and cluster-scoped.
    pub fn report_kinds() -> Vec<Self> {
        vec![
            Self::namespaced("PolicyReport", "policyreports"),
            Self::cluster_scoped("ClusterPolicyReport", "clusterpolicyreports"),
            Self::namespaced("EphemeralReport", "ephemeralreports"),
            Self::cluster_scoped("ClusterEphemeralReport", "clusterephemeralreports"),
        ]
    }
}

/// Persistence for one [`ResourceKind`].
///
/// Mutations go to the primary and are serialized by a per-store lock, so
/// versions are assigned in commit order. Reads never take the lock.
pub struct DocumentStore {
    kind: ResourceKind,
    router: Arc<ReplicaRouter>,
    versions: Arc<dyn ResourceVersionAllocator>,
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(
        kind: ResourceKind,
        router: Arc<ReplicaRouter>,
        versions: Arc<dyn ResourceVersionAllocator>,
    ) -> StoreResult<Self> {
        validate_identifier(&kind.table)?;
        Ok(Self {
            kind,
            router,
            versions,
            write_lock: Mutex::new(()),
        })
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Create the table and its indexes when missing.
    pub async fn bootstrap(&self, ctx: &Context) -> StoreResult<()> {
        self.router
            .execute_primary(ctx, &schema::create_table(&self.kind), &[])
            .await?;
        for index in schema::create_indexes(&self.kind) {
            self.router.execute_primary(ctx, &index, &[]).await?;
        }

        info!(kind = %self.kind.kind, table = %self.kind.table, "Schema ready");
        Ok(())
    }

    /// Documents of `tenant`, optionally restricted to one namespace.
    /// Served by a replica when one is healthy.
    pub async fn list(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        let (stmt, params) = self.scope(tenant, namespace);
        let result = self.router.read_query(ctx, &stmt, &params).await?;
        self.decode_all(result)
    }

    /// Like [`list`](Self::list), but always read from the primary.
    pub async fn list_from_primary(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
    ) -> StoreResult<Vec<Document>> {
        let (stmt, params) = self.scope(tenant, namespace);
        let result = self.router.query_primary(ctx, &stmt, &params).await?;
        self.decode_all(result)
    }

    pub async fn get(
        &self,
        ctx: &Context,
        tenant: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> StoreResult<Document> {
        let namespace = self.effective_namespace(namespace);
        let stmt = Statement::select(&self.kind.table, &[schema::DOCUMENT], schema::key_columns(&self.kind));
        let params = self.key_params(tenant, name, namespace);

        match self.router.read_query_row(ctx, &stmt, &params).await? {
            Some(row) => self.decode(row),
            None => Err(self.not_found(name, namespace)),
        }
    }

    /// Persist a new document.
    ///
    /// Assigns `tenant`, `resourceVersion`, `creationTimestamp`,
    /// `generation = 1` and, when empty, `uid`.
    pub async fn create(&self, ctx: &Context, tenant: &str, mut doc: Document) -> StoreResult<Document> {
        self.check_key(&mut doc)?;

        let _guard = self.write_lock.lock().await;
        ctx.check()?;

        let meta = &mut doc.metadata;
        meta.tenant = tenant.to_string();
        if meta.uid.is_empty() {
            meta.uid = Uuid::new_v4().to_string();
        }
        meta.creation_timestamp = Some(Utc::now().trunc_subsecs(0));
        meta.generation = 1;
        let version = self.versions.next();
        meta.resource_version = Some(version);

        let mut params = self.key_params(tenant, doc.name(), doc.namespace());
        params.push(Value::Json(doc.to_json()?));
        let stmt = Statement::insert(&self.kind.table, schema::insert_columns(&self.kind));

        match self.router.execute_primary(ctx, &stmt, &params).await {
            Ok(_) => {}
            Err(DbError::ConstraintViolation(_)) => {
                return Err(StoreError::already_exists(&self.kind.kind, doc.key().to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            kind = %self.kind.kind,
            tenant,
            namespace = doc.namespace(),
            name = doc.name(),
            resource_version = %version,
            "Created document"
        );
        Ok(doc)
    }

    /// Replace an existing document.
    ///
    /// `uid` and `creationTimestamp` are kept from the stored copy;
    /// `generation` is incremented and a fresh version assigned.
    pub async fn update(&self, ctx: &Context, tenant: &str, mut doc: Document) -> StoreResult<Document> {
        self.check_key(&mut doc)?;

        let _guard = self.write_lock.lock().await;
        let current = self
            .fetch_primary(ctx, tenant, doc.name(), doc.namespace())
            .await?
            .ok_or_else(|| self.not_found(doc.name(), doc.namespace()))?;

        let meta = &mut doc.metadata;
        meta.tenant = tenant.to_string();
        meta.uid = current.metadata.uid;
        meta.creation_timestamp = current.metadata.creation_timestamp;
        meta.generation = current.metadata.generation + 1;
        meta.resource_version = Some(self.versions.next());

        let mut params = vec![Value::Json(doc.to_json()?)];
        params.extend(self.key_params(tenant, doc.name(), doc.namespace()));
        let stmt = Statement::update(&self.kind.table, &[schema::DOCUMENT], schema::key_columns(&self.kind));

        if self.router.execute_primary(ctx, &stmt, &params).await? == 0 {
            return Err(self.not_found(doc.name(), doc.namespace()));
        }

        info!(
            kind = %self.kind.kind,
            tenant,
            namespace = doc.namespace(),
            name = doc.name(),
            generation = doc.metadata.generation,
            "Updated document"
        );
        Ok(doc)
    }

    /// Remove a document. A missing key is not an error.
    ///
    /// The removed document is returned stamped with the version of the
    /// deletion.
    pub async fn delete(
        &self,
        ctx: &Context,
        tenant: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> StoreResult<Option<Document>> {
        let namespace = self.effective_namespace(namespace);

        let _guard = self.write_lock.lock().await;
        let Some(mut removed) = self.fetch_primary(ctx, tenant, name, namespace).await? else {
            debug!(kind = %self.kind.kind, tenant, namespace, name, "Delete of missing document");
            return Ok(None);
        };

        let stmt = Statement::delete(&self.kind.table, schema::key_columns(&self.kind));
        let params = self.key_params(tenant, name, namespace);
        if self.router.execute_primary(ctx, &stmt, &params).await? == 0 {
            return Ok(None);
        }
        removed.metadata.resource_version = Some(self.versions.next());

        info!(kind = %self.kind.kind, tenant, namespace, name, "Deleted document");
        Ok(Some(removed))
    }

    /// Highest version stored in the table, across every tenant.
    pub async fn max_resource_version(&self, ctx: &Context) -> StoreResult<Option<ResourceVersion>> {
        let stmt = Statement::select(&self.kind.table, &[schema::DOCUMENT], &[]);
        let result = self.router.query_primary(ctx, &stmt, &[]).await?;
        Ok(self
            .decode_all(result)?
            .iter()
            .filter_map(Document::resource_version)
            .max())
    }

    /// Validates the key and normalizes the namespace for the kind's scope.
    fn check_key(&self, doc: &mut Document) -> StoreResult<()> {
        if doc.metadata.name.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "{}: metadata.name is required",
                self.kind.kind
            )));
        }
        if !self.kind.namespaced {
            doc.metadata.namespace.clear();
        } else if doc.metadata.namespace.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "{} \"{}\": metadata.namespace is required",
                self.kind.kind, doc.metadata.name
            )));
        }
        Ok(())
    }

    fn effective_namespace<'a>(&self, namespace: Option<&'a str>) -> &'a str {
        if self.kind.namespaced {
            namespace.unwrap_or_default()
        } else {
            ""
        }
    }

    fn key_params(&self, tenant: &str, name: &str, namespace: &str) -> Vec<Value> {
        let mut params = vec![Value::from(name)];
        if self.kind.namespaced {
            params.push(Value::from(namespace));
        }
        params.push(Value::from(tenant));
        params
    }

    /// SELECT for every document of a tenant, optionally in one namespace.
    fn scope(&self, tenant: &str, namespace: Option<&str>) -> (Statement, Vec<Value>) {
        match namespace.filter(|ns| self.kind.namespaced && !ns.is_empty()) {
            Some(ns) => (
                Statement::select(
                    &self.kind.table,
                    &[schema::DOCUMENT],
                    &[schema::NAMESPACE, schema::TENANT],
                ),
                vec![Value::from(ns), Value::from(tenant)],
            ),
            None => (
                Statement::select(&self.kind.table, &[schema::DOCUMENT], &[schema::TENANT]),
                vec![Value::from(tenant)],
            ),
        }
    }

    async fn fetch_primary(
        &self,
        ctx: &Context,
        tenant: &str,
        name: &str,
        namespace: &str,
    ) -> StoreResult<Option<Document>> {
        let stmt = Statement::select(&self.kind.table, &[schema::DOCUMENT], schema::key_columns(&self.kind));
        let params = self.key_params(tenant, name, namespace);
        self.router
            .query_primary(ctx, &stmt, &params)
            .await?
            .into_first()
            .map(|row| self.decode(row))
            .transpose()
    }

    fn decode(&self, row: Row) -> StoreResult<Document> {
        let json = row
            .into_iter()
            .next()
            .and_then(Value::into_json)
            .ok_or_else(|| {
                StoreError::Internal(format!("{}: row without a JSON document", self.kind.kind))
            })?;
        Ok(Document::from_json(json)?)
    }

    fn decode_all(&self, result: QueryResult) -> StoreResult<Vec<Document>> {
        result.rows.into_iter().map(|row| self.decode(row)).collect()
    }

    fn not_found(&self, name: &str, namespace: &str) -> StoreError {
        let key = DocumentKey::new(name, namespace);
        StoreError::not_found(&self.kind.kind, key.to_string())
    }
}
