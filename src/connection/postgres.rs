use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column as _, Postgres, Row as _, TypeInfo as _};
use tracing::debug;

use super::{PostgresConfig, ReplicaRouter, SqlHandle};
use crate::core::{Context, DbError, Result, Row, Value};
use crate::result::QueryResult;
use crate::sql::Statement;

/// A PostgreSQL endpoint backed by a sqlx pool.
///
/// The pool connects lazily; reachability is established by
/// [`ReplicaRouter::connect`] pinging every handle.
#[derive(Clone)]
pub struct PgHandle {
    name: String,
    pool: PgPool,
}

impl PgHandle {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Lazily connected pool for one host of `config`.
    pub fn connect_lazy(config: &PostgresConfig, host: &str) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(config.connect_options(host));
        Self::new(host, pool)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Integer(i) => query.bind(*i),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Json(j) => query.bind(Json(j)),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Row> {
    row.columns()
        .iter()
        .map(|column| -> Result<Value> {
            let idx = column.ordinal();
            let value = match column.type_info().name() {
                "JSONB" | "JSON" => row
                    .try_get::<Option<serde_json::Value>, _>(idx)?
                    .map(Value::Json),
                "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Integer),
                "INT4" => row
                    .try_get::<Option<i32>, _>(idx)?
                    .map(|i| Value::Integer(i64::from(i))),
                _ => row.try_get::<Option<String>, _>(idx)?.map(Value::Text),
            };
            Ok(value.unwrap_or(Value::Null))
        })
        .collect()
}

fn check_params(stmt: &Statement, params: &[Value]) -> Result<()> {
    if stmt.param_count() != params.len() {
        return Err(DbError::Query(format!(
            "statement expects {} parameters, got {}",
            stmt.param_count(),
            params.len()
        )));
    }
    Ok(())
}

#[async_trait]
impl SqlHandle for PgHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        check_params(stmt, params)?;
        let sql = stmt.to_string();
        debug!(handle = %self.name, sql = %sql, "query");

        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await?;

        let columns = match stmt {
            Statement::Select(select) => select.projection.clone(),
            _ => rows
                .first()
                .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default(),
        };
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;

        Ok(QueryResult::new(columns, rows))
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        check_params(stmt, params)?;
        let sql = stmt.to_string();
        debug!(handle = %self.name, sql = %sql, "execute");

        let done = bind_params(sqlx::query(&sql), params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open the primary and every configured replica and wait until all of
/// them answer a ping.
pub async fn connect_postgres(ctx: &Context, config: &PostgresConfig) -> Result<ReplicaRouter> {
    config.validate().map_err(DbError::Connection)?;

    let primary: Arc<dyn SqlHandle> = Arc::new(PgHandle::connect_lazy(config, &config.host));
    let replicas = config
        .read_replica_hosts
        .iter()
        .map(|host| Arc::new(PgHandle::connect_lazy(config, host)) as Arc<dyn SqlHandle>)
        .collect();

    ReplicaRouter::connect(ctx, primary, replicas, config.retry).await
}
