pub mod config;
pub mod postgres;
pub mod router;

use async_trait::async_trait;

use crate::core::{Result, Value};
use crate::result::QueryResult;
use crate::sql::Statement;

pub use config::{PostgresConfig, RetryPolicy, SslMode};
pub use postgres::{PgHandle, connect_postgres};
pub use router::ReplicaRouter;

/// One database endpoint: a primary or a read replica.
///
/// The router and the document stores are written against this trait, so
/// the same code runs over Postgres ([`PgHandle`]) and over the in-process
/// engine ([`crate::storage::MemoryHandle`]).
#[async_trait]
pub trait SqlHandle: Send + Sync {
    /// Label used in logs, e.g. the host name.
    fn name(&self) -> &str;

    /// Execute a statement that returns rows (SELECT).
    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement that modifies data or schema; returns affected rows.
    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64>;

    /// Check that the endpoint is reachable.
    async fn ping(&self) -> Result<()>;
}
