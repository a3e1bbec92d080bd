use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use super::{RetryPolicy, SqlHandle};
use crate::core::{Context, DbError, Result, Row, Value};
use crate::result::QueryResult;
use crate::sql::Statement;

/// Routes reads across read replicas and writes to the primary.
///
/// Every read snapshots the replica list, shuffles it, and tries each
/// replica in turn. A replica error is logged and the next replica is
/// tried; when all of them fail (or there are none) the read goes to the
/// primary, whose error is returned unchanged. Caller cancellation stops
/// the chain at once.
pub struct ReplicaRouter {
    primary: Arc<dyn SqlHandle>,
    replicas: RwLock<Vec<Arc<dyn SqlHandle>>>,
}

impl ReplicaRouter {
    pub fn new(primary: Arc<dyn SqlHandle>, replicas: Vec<Arc<dyn SqlHandle>>) -> Self {
        Self {
            primary,
            replicas: RwLock::new(replicas),
        }
    }

    /// Build a router after every handle answered a ping.
    ///
    /// Each handle gets `retry.max_attempts` pings spaced by
    /// `retry.interval`; a handle that never answers fails construction.
    pub async fn connect(
        ctx: &Context,
        primary: Arc<dyn SqlHandle>,
        replicas: Vec<Arc<dyn SqlHandle>>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        ping_with_retry(ctx, primary.as_ref(), retry).await?;
        for replica in &replicas {
            ping_with_retry(ctx, replica.as_ref(), retry).await?;
        }

        info!(
            primary = primary.name(),
            replicas = replicas.len(),
            "Connected to database"
        );
        Ok(Self::new(primary, replicas))
    }

    pub fn primary(&self) -> &Arc<dyn SqlHandle> {
        &self.primary
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Randomized copy of the replica list for one call.
    fn shuffled_replicas(&self) -> Result<Vec<Arc<dyn SqlHandle>>> {
        let mut replicas = self.replicas.read()?.clone();
        replicas.shuffle(&mut rand::thread_rng());
        Ok(replicas)
    }

    /// Run a read on a replica, falling back to the primary.
    pub async fn read_query(
        &self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<QueryResult> {
        for replica in self.shuffled_replicas()? {
            match ctx.run(replica.query(stmt, params)).await {
                Ok(result) => {
                    debug!(replica = replica.name(), table = stmt.table_name(), "Read served by replica");
                    return Ok(result);
                }
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => {
                    warn!(replica = replica.name(), error = %e, "Replica read failed, trying next");
                }
            }
        }

        self.query_primary(ctx, stmt, params).await
    }

    /// Like [`read_query`](Self::read_query), keeping at most the first row.
    ///
    /// An empty answer from a replica is a valid answer and does not move
    /// the read to the next handle.
    pub async fn read_query_row(
        &self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<Option<Row>> {
        Ok(self.read_query(ctx, stmt, params).await?.into_first())
    }

    /// Run a read on the primary only.
    pub async fn query_primary(
        &self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<QueryResult> {
        ctx.run(self.primary.query(stmt, params)).await.inspect_err(|e| {
            if !e.is_abort() {
                error!(primary = self.primary.name(), error = %e, "Primary query failed");
            }
        })
    }

    /// Run a write on the primary.
    pub async fn execute_primary(
        &self,
        ctx: &Context,
        stmt: &Statement,
        params: &[Value],
    ) -> Result<u64> {
        ctx.run(self.primary.execute(stmt, params)).await.inspect_err(|e| {
            if !e.is_abort() && !matches!(e, DbError::ConstraintViolation(_)) {
                error!(primary = self.primary.name(), error = %e, "Primary execute failed");
            }
        })
    }

    /// Readiness probe: pings only the primary.
    pub async fn ready(&self, ctx: &Context) -> bool {
        match ctx.run(self.primary.ping()).await {
            Ok(()) => true,
            Err(e) => {
                error!(primary = self.primary.name(), error = %e, "Database is not ready");
                false
            }
        }
    }
}

async fn ping_with_retry(ctx: &Context, handle: &dyn SqlHandle, retry: RetryPolicy) -> Result<()> {
    let mut last_error = None;

    for attempt in 1..=retry.max_attempts {
        match ctx.run(handle.ping()).await {
            Ok(()) => {
                debug!(handle = handle.name(), attempt, "Ping succeeded");
                return Ok(());
            }
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                debug!(handle = handle.name(), attempt, error = %e, "Ping failed");
                last_error = Some(e);
            }
        }

        if attempt < retry.max_attempts {
            ctx.run(async {
                tokio::time::sleep(retry.interval).await;
                Ok(())
            })
            .await?;
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    error!(handle = handle.name(), attempts = retry.max_attempts, error = %reason, "Database unreachable");
    Err(DbError::Connection(format!(
        "{} unreachable after {} attempts: {}",
        handle.name(),
        retry.max_attempts,
        reason
    )))
}
