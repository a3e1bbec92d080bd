use super::ResourceKind;
use crate::core::DataType;
use crate::sql::{ColumnDef, CreateIndexStmt, CreateTableStmt, Statement};

pub(crate) const NAME: &str = "name";
pub(crate) const NAMESPACE: &str = "namespace";
pub(crate) const TENANT: &str = "tenant";
pub(crate) const DOCUMENT: &str = "document";

/// Key columns in primary-key order.
pub(crate) fn key_columns(kind: &ResourceKind) -> &'static [&'static str] {
    if kind.namespaced {
        &[NAME, NAMESPACE, TENANT]
    } else {
        &[NAME, TENANT]
    }
}

/// Every column written on insert.
pub(crate) fn insert_columns(kind: &ResourceKind) -> &'static [&'static str] {
    if kind.namespaced {
        &[NAME, NAMESPACE, TENANT, DOCUMENT]
    } else {
        &[NAME, TENANT, DOCUMENT]
    }
}

pub(crate) fn create_table(kind: &ResourceKind) -> Statement {
    let columns = insert_columns(kind)
        .iter()
        .map(|&name| {
            let data_type = if name == DOCUMENT {
                DataType::Jsonb
            } else {
                DataType::Varchar
            };
            ColumnDef::not_null(name, data_type)
        })
        .collect();

    Statement::CreateTable(CreateTableStmt {
        table_name: kind.table.clone(),
        columns,
        primary_key: key_columns(kind).iter().map(|c| c.to_string()).collect(),
        if_not_exists: true,
    })
}

/// Lookup indexes: namespace (namespaced kinds only) and tenant.
pub(crate) fn create_indexes(kind: &ResourceKind) -> Vec<Statement> {
    let mut columns = Vec::new();
    if kind.namespaced {
        columns.push(NAMESPACE);
    }
    columns.push(TENANT);

    columns
        .into_iter()
        .map(|column| {
            Statement::CreateIndex(CreateIndexStmt {
                index_name: format!("{}_{}", kind.table, column),
                table_name: kind.table.clone(),
                column: column.to_string(),
                if_not_exists: true,
            })
        })
        .collect()
}
