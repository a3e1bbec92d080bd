use crate::core::{Column, DbError, Result, Row, Schema, Value};
use std::collections::{BTreeMap, HashMap};

/// Equality key for primary-key and secondary-index lookups.
///
/// Indexed columns are scalar (`VARCHAR`/`BIGINT`); JSON columns are never
/// part of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum IndexKey {
    Null,
    Integer(i64),
    Text(String),
}

impl IndexKey {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Integer(i) => Ok(Self::Integer(*i)),
            Value::Text(s) => Ok(Self::Text(s.clone())),
            Value::Json(_) => Err(DbError::TypeMismatch("JSONB values cannot be indexed".into())),
        }
    }
}

/// One in-memory table: rows in insertion order, a unique primary-key map
/// and optional secondary indexes.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    primary_index: HashMap<Vec<IndexKey>, usize>,
    indexes: HashMap<String, BTreeMap<IndexKey, Vec<usize>>>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            primary_index: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn insert(&mut self, row: Row) -> Result<usize> {
        self.validate_row(&row)?;
        let key = self.primary_key_of(&row)?;
        self.check_uniqueness(&key, None)?;

        let id = self.next_row_id;
        self.next_row_id += 1;

        self.update_indexes(id, &row)?;
        if let Some(key) = key {
            self.primary_index.insert(key, id);
        }
        self.rows.insert(id, row);

        Ok(id)
    }

    pub fn update(&mut self, id: usize, new_row: Row) -> Result<bool> {
        self.validate_row(&new_row)?;
        let new_key = self.primary_key_of(&new_row)?;
        self.check_uniqueness(&new_key, Some(id))?;

        let Some(old_row) = self.rows.remove(&id) else {
            return Ok(false);
        };

        self.remove_from_indexes(id, &old_row);
        if let Some(old_key) = self.primary_key_of(&old_row)? {
            self.primary_index.remove(&old_key);
        }

        self.update_indexes(id, &new_row)?;
        if let Some(key) = new_key {
            self.primary_index.insert(key, id);
        }
        self.rows.insert(id, new_row);

        Ok(true)
    }

    pub fn delete(&mut self, id: usize) -> Result<bool> {
        let Some(row) = self.rows.remove(&id) else {
            return Ok(false);
        };

        self.remove_from_indexes(id, &row);
        if let Some(key) = self.primary_key_of(&row)? {
            self.primary_index.remove(&key);
        }
        Ok(true)
    }

    /// Rows whose columns equal every `(column index, value)` pair, in
    /// insertion order. Uses the primary key or a secondary index when the
    /// predicate allows it.
    pub fn select(&self, predicate: &[(usize, &Value)]) -> Result<Vec<(usize, Row)>> {
        let candidates: Vec<usize> = match self.lookup(predicate)? {
            Some(mut ids) => {
                ids.sort_unstable();
                ids
            }
            None => self.rows.keys().copied().collect(),
        };

        Ok(candidates
            .into_iter()
            .filter_map(|id| self.rows.get(&id).map(|row| (id, row)))
            .filter(|(_, row)| predicate.iter().all(|(idx, value)| &row[*idx] == *value))
            .map(|(id, row)| (id, row.clone()))
            .collect())
    }

    fn lookup(&self, predicate: &[(usize, &Value)]) -> Result<Option<Vec<usize>>> {
        let pk = &self.schema.primary_key;
        if !pk.is_empty() {
            let key: Option<Vec<&Value>> = pk
                .iter()
                .map(|col| predicate.iter().find(|(idx, _)| idx == col).map(|(_, v)| *v))
                .collect();
            if let Some(values) = key {
                let key = values
                    .into_iter()
                    .map(IndexKey::from_value)
                    .collect::<Result<Vec<_>>>()?;
                return Ok(Some(self.primary_index.get(&key).copied().into_iter().collect()));
            }
        }

        for (idx, value) in predicate {
            let column = &self.schema.schema().columns()[*idx];
            if let Some(index) = self.indexes.get(&column.name) {
                let key = IndexKey::from_value(value)?;
                return Ok(Some(index.get(&key).cloned().unwrap_or_default()));
            }
        }

        Ok(None)
    }

    fn primary_key_of(&self, row: &Row) -> Result<Option<Vec<IndexKey>>> {
        if self.schema.primary_key.is_empty() {
            return Ok(None);
        }
        self.schema
            .primary_key
            .iter()
            .map(|idx| IndexKey::from_value(&row[*idx]))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn check_uniqueness(&self, key: &Option<Vec<IndexKey>>, ignore_id: Option<usize>) -> Result<()> {
        if let Some(key) = key
            && let Some(existing) = self.primary_index.get(key)
            && Some(*existing) != ignore_id
        {
            return Err(DbError::ConstraintViolation(format!(
                "duplicate key value violates primary key of '{}'",
                self.schema.name
            )));
        }
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::Query(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    pub fn create_index(&mut self, column_name: &str) -> Result<()> {
        if self.indexes.contains_key(column_name) {
            return Ok(());
        }
        let col_idx = self
            .schema
            .schema()
            .find_column_index(column_name)
            .ok_or_else(|| DbError::ColumnNotFound(column_name.to_string(), self.schema.name.clone()))?;

        let mut index = BTreeMap::new();
        for (id, row) in &self.rows {
            let key = IndexKey::from_value(&row[col_idx])?;
            index.entry(key).or_insert_with(Vec::new).push(*id);
        }
        self.indexes.insert(column_name.to_string(), index);
        self.schema.indexes.push(column_name.to_string());
        Ok(())
    }

    fn update_indexes(&mut self, id: usize, row: &Row) -> Result<()> {
        for (col_name, index) in &mut self.indexes {
            if let Some(col_idx) = self.schema.schema.find_column_index(col_name) {
                let key = IndexKey::from_value(&row[col_idx])?;
                index.entry(key).or_insert_with(Vec::new).push(id);
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, id: usize, row: &Row) {
        for (col_name, index) in &mut self.indexes {
            if let Some(col_idx) = self.schema.schema.find_column_index(col_name)
                && let Ok(key) = IndexKey::from_value(&row[col_idx])
                && let Some(ids) = index.get_mut(&key)
            {
                ids.retain(|&x| x != id);
                if ids.is_empty() {
                    index.remove(&key);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
    /// Column indexes forming the primary key, in key order.
    primary_key: Vec<usize>,
    pub indexes: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: &[String]) -> Result<Self> {
        self.primary_key = columns
            .iter()
            .map(|name| {
                self.schema
                    .find_column_index(name)
                    .ok_or_else(|| DbError::ColumnNotFound(name.clone(), self.name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        self.indexes.iter().any(|idx| idx == column)
    }
}
