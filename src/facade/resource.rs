use rand::Rng;
use tracing::{debug, info};

use crate::core::{Context, Document, StoreError, StoreResult};
use crate::filter::{ConsistencyFilter, DocumentList, ListOptions};
use crate::store::{DocumentStore, ResourceKind};
use crate::watch::{
    BroadcasterConfig, EventFilter, EventType, Subscription, WatchBroadcaster, WatchEvent,
};

const NAME_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const RANDOM_SUFFIX_LEN: usize = 5;
const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = MAX_NAME_LEN - RANDOM_SUFFIX_LEN;

/// `prefix` (cut to fit) followed by five random characters.
pub fn generate_name(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut name: String = prefix.chars().take(MAX_PREFIX_LEN).collect();
    for _ in 0..RANDOM_SUFFIX_LEN {
        name.push(NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char);
    }
    name
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub dry_run: bool,
    /// Create the document when it does not exist yet.
    pub force_allow_create: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub dry_run: bool,
}

/// List/get/watch/create/update/delete for one kind.
///
/// Every committed mutation publishes exactly one watch event, under the
/// broadcaster's sequencer, after the store accepted it. Failed and
/// dry-run mutations publish nothing.
pub struct ResourceService {
    store: DocumentStore,
    broadcaster: WatchBroadcaster,
}

impl ResourceService {
    pub fn new(store: DocumentStore, config: BroadcasterConfig) -> Self {
        Self {
            store,
            broadcaster: WatchBroadcaster::new(config),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        self.store.kind()
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn broadcaster(&self) -> &WatchBroadcaster {
        &self.broadcaster
    }

    pub async fn list(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> StoreResult<DocumentList> {
        let filter = ConsistencyFilter::new(options)?;
        let scanned = self.store.list(ctx, tenant, namespace).await?;
        let list = filter.apply(scanned);

        debug!(
            kind = %self.kind().kind,
            tenant,
            namespace = namespace.unwrap_or_default(),
            items = list.len(),
            resource_version = %list.resource_version,
            "Listed documents"
        );
        Ok(list)
    }

    pub async fn get(
        &self,
        ctx: &Context,
        tenant: &str,
        name: &str,
        namespace: Option<&str>,
    ) -> StoreResult<Document> {
        self.store.get(ctx, tenant, name, namespace).await
    }

    /// Create a document; a missing name is generated from
    /// `metadata.generateName`.
    pub async fn create(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
        mut doc: Document,
        options: &CreateOptions,
    ) -> StoreResult<Document> {
        default_namespace(&mut doc, namespace);
        if doc.metadata.name.is_empty() {
            if doc.metadata.generate_name.is_empty() {
                return Err(StoreError::Conflict(format!(
                    "{}: name and generateName not provided",
                    self.kind().kind
                )));
            }
            doc.metadata.name = generate_name(&doc.metadata.generate_name);
        }

        if options.dry_run {
            return Ok(doc);
        }

        let sequencer = self.broadcaster.sequence().await;
        let created = self.store.create(ctx, tenant, doc).await?;
        sequencer.publish(EventType::Added, created.clone()).await;
        Ok(created)
    }

    /// Replace a document. Returns the stored document and whether it was
    /// created by `force_allow_create`.
    pub async fn update(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
        mut doc: Document,
        options: &UpdateOptions,
    ) -> StoreResult<(Document, bool)> {
        default_namespace(&mut doc, namespace);

        if options.dry_run {
            return match self.store.get(ctx, tenant, doc.name(), Some(doc.namespace())).await {
                Ok(_) => Ok((doc, false)),
                Err(e) if e.is_not_found() && options.force_allow_create => Ok((doc, true)),
                Err(e) => Err(e),
            };
        }

        let sequencer = self.broadcaster.sequence().await;
        match self.store.update(ctx, tenant, doc.clone()).await {
            Ok(updated) => {
                sequencer.publish(EventType::Modified, updated.clone()).await;
                Ok((updated, false))
            }
            Err(e) if e.is_not_found() && options.force_allow_create => {
                info!(kind = %self.kind().kind, tenant, name = doc.name(), "Update created missing document");
                let created = self.store.create(ctx, tenant, doc).await?;
                sequencer.publish(EventType::Added, created.clone()).await;
                Ok((created, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a document. Deleting a missing document succeeds with `None`.
    pub async fn delete(
        &self,
        ctx: &Context,
        tenant: &str,
        name: &str,
        namespace: Option<&str>,
        options: &DeleteOptions,
    ) -> StoreResult<Option<Document>> {
        if options.dry_run {
            return match self.store.get(ctx, tenant, name, namespace).await {
                Ok(doc) => Ok(Some(doc)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            };
        }

        let sequencer = self.broadcaster.sequence().await;
        let removed = self.store.delete(ctx, tenant, name, namespace).await?;
        if let Some(doc) = &removed {
            sequencer.publish(EventType::Deleted, doc.clone()).await;
        }
        Ok(removed)
    }

    /// Delete everything a List with `list_options` returns.
    pub async fn delete_collection(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
        list_options: &ListOptions,
        options: &DeleteOptions,
    ) -> StoreResult<Vec<Document>> {
        let list = self.list(ctx, tenant, namespace, list_options).await?;
        if options.dry_run {
            return Ok(list.items);
        }

        let mut removed = Vec::with_capacity(list.len());
        for doc in list.items {
            let ns = Some(doc.namespace());
            if let Some(doc) = self.delete(ctx, tenant, doc.name(), ns, options).await? {
                removed.push(doc);
            }
        }

        info!(kind = %self.kind().kind, tenant, removed = removed.len(), "Deleted collection");
        Ok(removed)
    }

    /// Watch for changes.
    ///
    /// Without a resource version (or with `"0"`) only changes from now on
    /// are delivered. Otherwise the matching documents are replayed as
    /// `ADDED`, read from the primary, followed by live changes.
    pub async fn watch(
        &self,
        ctx: &Context,
        tenant: &str,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> StoreResult<Subscription> {
        let filter = ConsistencyFilter::new(options)?;
        let namespace = namespace.filter(|_| self.kind().namespaced);
        let events = EventFilter::new(tenant)
            .namespace(namespace)
            .selector(filter.selector().clone());

        if options.is_live_watch() {
            return Ok(self.broadcaster.subscribe(events).await);
        }

        let sequencer = self.broadcaster.sequence().await;
        let snapshot = self.store.list_from_primary(ctx, tenant, namespace).await?;
        let replay = filter
            .apply(snapshot)
            .items
            .into_iter()
            .map(|doc| WatchEvent::new(EventType::Added, doc))
            .collect();

        Ok(sequencer.subscribe_with_replay(events, replay).await)
    }

    /// End every open watch.
    pub async fn destroy(&self) {
        self.broadcaster.shutdown().await;
    }
}

fn default_namespace(doc: &mut Document, namespace: Option<&str>) {
    if doc.metadata.namespace.is_empty()
        && let Some(ns) = namespace
    {
        doc.metadata.namespace = ns.to_string();
    }
}
