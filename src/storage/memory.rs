use super::{Table, TableSchema};
use crate::connection::SqlHandle;
use crate::core::{Column, DbError, Result, Value, validate_identifier};
use crate::result::QueryResult;
use crate::sql::{
    CreateIndexStmt, CreateTableStmt, DeleteStmt, InsertStmt, SelectStmt, Statement, UpdateStmt,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

struct TableEntry {
    table: Arc<RwLock<Table>>,
    index_names: HashSet<String>,
}

/// In-process database executing [`Statement`]s.
///
/// Every table has its own lock; the catalog lock is only held to look a
/// table up or to create one. Each statement commits on its own.
pub struct MemoryDatabase {
    tables: RwLock<HashMap<String, TableEntry>>,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: RwLock::new(HashMap::new()),
        })
    }

    /// A named endpoint over this database. Several handles over one
    /// database behave like a primary and its fully caught-up replicas.
    pub fn handle(self: &Arc<Self>, name: &str) -> MemoryHandle {
        MemoryHandle {
            name: name.to_string(),
            db: Arc::clone(self),
            offline: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    fn get_table_sync(tables: &HashMap<String, TableEntry>, name: &str) -> Result<Arc<RwLock<Table>>> {
        tables
            .get(name)
            .map(|entry| Arc::clone(&entry.table))
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    async fn get_table(&self, name: &str) -> Result<Arc<RwLock<Table>>> {
        let tables = self.tables.read().await;
        Self::get_table_sync(&tables, name)
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    pub async fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn row_count(&self, table_name: &str) -> Result<usize> {
        let table = self.get_table(table_name).await?;
        let table = table.read().await;
        Ok(table.row_count())
    }

    pub async fn is_indexed(&self, table_name: &str, column: &str) -> Result<bool> {
        let table = self.get_table(table_name).await?;
        let table = table.read().await;
        Ok(table.schema().is_indexed(column))
    }

    pub async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        check_params(stmt, params)?;
        match stmt {
            Statement::CreateTable(s) => self.create_table(s).await,
            Statement::CreateIndex(s) => self.create_index(s).await,
            Statement::Insert(s) => self.insert(s, params).await,
            Statement::Update(s) => self.update(s, params).await,
            Statement::Delete(s) => self.delete(s, params).await,
            Statement::Select(s) => Ok(self.select(s, params).await?.row_count() as u64),
        }
    }

    pub async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        check_params(stmt, params)?;
        match stmt {
            Statement::Select(s) => self.select(s, params).await,
            other => {
                self.execute(other, params).await?;
                Ok(QueryResult::empty())
            }
        }
    }

    async fn create_table(&self, stmt: &CreateTableStmt) -> Result<u64> {
        validate_identifier(&stmt.table_name)?;
        let mut tables = self.tables.write().await;

        if tables.contains_key(&stmt.table_name) {
            if stmt.if_not_exists {
                return Ok(0);
            }
            return Err(DbError::Query(format!(
                "relation '{}' already exists",
                stmt.table_name
            )));
        }

        let columns = stmt
            .columns
            .iter()
            .map(|def| -> Result<Column> {
                validate_identifier(&def.name)?;
                let column = Column::new(def.name.clone(), def.data_type);
                Ok(if def.nullable { column } else { column.not_null() })
            })
            .collect::<Result<Vec<_>>>()?;

        let schema = TableSchema::new(stmt.table_name.clone(), columns)
            .with_primary_key(&stmt.primary_key)?;

        debug!(table = %stmt.table_name, "Created table");
        tables.insert(
            stmt.table_name.clone(),
            TableEntry {
                table: Arc::new(RwLock::new(Table::new(schema))),
                index_names: HashSet::new(),
            },
        );
        Ok(0)
    }

    async fn create_index(&self, stmt: &CreateIndexStmt) -> Result<u64> {
        validate_identifier(&stmt.index_name)?;
        let mut tables = self.tables.write().await;
        let entry = tables
            .get_mut(&stmt.table_name)
            .ok_or_else(|| DbError::TableNotFound(stmt.table_name.clone()))?;

        if entry.index_names.contains(&stmt.index_name) {
            if stmt.if_not_exists {
                return Ok(0);
            }
            return Err(DbError::Query(format!(
                "relation '{}' already exists",
                stmt.index_name
            )));
        }

        entry.table.write().await.create_index(&stmt.column)?;
        entry.index_names.insert(stmt.index_name.clone());
        Ok(0)
    }

    async fn insert(&self, stmt: &InsertStmt, params: &[Value]) -> Result<u64> {
        let table = self.get_table(&stmt.table_name).await?;
        let mut table = table.write().await;

        let schema = table.schema().schema();
        let mut row = vec![Value::Null; schema.column_count()];
        for (column, value) in stmt.columns.iter().zip(params) {
            let idx = column_index(table.schema(), column)?;
            row[idx] = value.clone();
        }

        table.insert(row)?;
        Ok(1)
    }

    async fn update(&self, stmt: &UpdateStmt, params: &[Value]) -> Result<u64> {
        let table = self.get_table(&stmt.table_name).await?;
        let mut table = table.write().await;

        let (assigned, filtered) = params.split_at(stmt.assignments.len());
        let mut assignments = Vec::with_capacity(assigned.len());
        for (column, value) in stmt.assignments.iter().zip(assigned) {
            assignments.push((column_index(table.schema(), column)?, value));
        }
        let filter = predicate(table.schema(), &stmt.selection, filtered)?;

        let mut affected = 0;
        for (id, mut row) in table.select(&filter)? {
            for (idx, value) in &assignments {
                row[*idx] = (*value).clone();
            }
            if table.update(id, row)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, stmt: &DeleteStmt, params: &[Value]) -> Result<u64> {
        let table = self.get_table(&stmt.table_name).await?;
        let mut table = table.write().await;

        let filter = predicate(table.schema(), &stmt.selection, params)?;
        let mut affected = 0;
        for (id, _) in table.select(&filter)? {
            if table.delete(id)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn select(&self, stmt: &SelectStmt, params: &[Value]) -> Result<QueryResult> {
        let table = self.get_table(&stmt.table_name).await?;
        let table = table.read().await;

        let projection = stmt
            .projection
            .iter()
            .map(|column| column_index(table.schema(), column))
            .collect::<Result<Vec<_>>>()?;
        let filter = predicate(table.schema(), &stmt.selection, params)?;

        let rows = table
            .select(&filter)?
            .into_iter()
            .map(|(_, row)| projection.iter().map(|idx| row[*idx].clone()).collect())
            .collect();

        Ok(QueryResult::new(stmt.projection.clone(), rows))
    }
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

fn column_index(schema: &TableSchema, column: &str) -> Result<usize> {
    schema
        .schema()
        .find_column_index(column)
        .ok_or_else(|| DbError::ColumnNotFound(column.to_string(), schema.name().to_string()))
}

fn predicate<'a>(
    schema: &TableSchema,
    selection: &[String],
    params: &'a [Value],
) -> Result<Vec<(usize, &'a Value)>> {
    let mut filter = Vec::with_capacity(selection.len());
    for (column, value) in selection.iter().zip(params) {
        filter.push((column_index(schema, column)?, value));
    }
    Ok(filter)
}

/// A [`SqlHandle`] over a shared [`MemoryDatabase`].
///
/// A handle can be taken offline, after which every call fails with a
/// connection error while the database itself stays intact.
pub struct MemoryHandle {
    name: String,
    db: Arc<MemoryDatabase>,
    offline: AtomicBool,
    calls: AtomicU64,
}

impl MemoryHandle {
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Number of queries and statements this handle was asked to run.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.is_offline() {
            return Err(DbError::Connection(format!("{} is offline", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, stmt: &Statement, params: &[Value]) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.db.query(stmt, params).await
    }

    async fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.db.execute(stmt, params).await
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }
}
