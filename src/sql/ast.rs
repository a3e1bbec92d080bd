use std::fmt;

use crate::core::DataType;

/// Root statement type.
///
/// Statements are built by the store, never parsed. Parameters are always
/// positional: `SET` assignments first, then the `WHERE` equalities, each
/// bound to the next `$n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable(CreateTableStmt),
    CreateIndex(CreateIndexStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Select(SelectStmt),
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableStmt {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn not_null(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable: false,
        }
    }
}

/// CREATE INDEX statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIndexStmt {
    pub index_name: String,
    pub table_name: String,
    pub column: String,
    pub if_not_exists: bool,
}

/// INSERT statement, one row of parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStmt {
    pub table_name: String,
    pub columns: Vec<String>,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateStmt {
    pub table_name: String,
    pub assignments: Vec<String>,
    /// Conjunction of `column = $n`.
    pub selection: Vec<String>,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStmt {
    pub table_name: String,
    /// Conjunction of `column = $n`.
    pub selection: Vec<String>,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStmt {
    pub table_name: String,
    pub projection: Vec<String>,
    /// Conjunction of `column = $n`; empty selects every row.
    pub selection: Vec<String>,
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

impl Statement {
    pub fn select(table: &str, projection: &[&str], selection: &[&str]) -> Self {
        Self::Select(SelectStmt {
            table_name: table.to_string(),
            projection: owned(projection),
            selection: owned(selection),
        })
    }

    pub fn insert(table: &str, columns: &[&str]) -> Self {
        Self::Insert(InsertStmt {
            table_name: table.to_string(),
            columns: owned(columns),
        })
    }

    pub fn update(table: &str, assignments: &[&str], selection: &[&str]) -> Self {
        Self::Update(UpdateStmt {
            table_name: table.to_string(),
            assignments: owned(assignments),
            selection: owned(selection),
        })
    }

    pub fn delete(table: &str, selection: &[&str]) -> Self {
        Self::Delete(DeleteStmt {
            table_name: table.to_string(),
            selection: owned(selection),
        })
    }

    pub fn table_name(&self) -> &str {
        match self {
            Self::CreateTable(s) => &s.table_name,
            Self::CreateIndex(s) => &s.table_name,
            Self::Insert(s) => &s.table_name,
            Self::Update(s) => &s.table_name,
            Self::Delete(s) => &s.table_name,
            Self::Select(s) => &s.table_name,
        }
    }

    /// Number of `$n` placeholders the statement expects.
    pub fn param_count(&self) -> usize {
        match self {
            Self::CreateTable(_) | Self::CreateIndex(_) => 0,
            Self::Insert(s) => s.columns.len(),
            Self::Update(s) => s.assignments.len() + s.selection.len(),
            Self::Delete(s) => s.selection.len(),
            Self::Select(s) => s.selection.len(),
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Select(_))
    }
}

fn write_selection(f: &mut fmt::Formatter<'_>, selection: &[String], first: usize) -> fmt::Result {
    for (i, column) in selection.iter().enumerate() {
        let keyword = if i == 0 { " WHERE " } else { " AND " };
        write!(f, "{}{} = ${}", keyword, column, first + i)?;
    }
    Ok(())
}

/// Renders PostgreSQL text with `$n` placeholders.
impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(s) => {
                write!(f, "CREATE TABLE ")?;
                if s.if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} (", s.table_name)?;
                for (i, col) in s.columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", col.name, col.data_type)?;
                    if !col.nullable {
                        write!(f, " NOT NULL")?;
                    }
                }
                if !s.primary_key.is_empty() {
                    write!(f, ", PRIMARY KEY({})", s.primary_key.join(", "))?;
                }
                write!(f, ")")
            }
            Self::CreateIndex(s) => {
                write!(f, "CREATE INDEX ")?;
                if s.if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} ON {}({})", s.index_name, s.table_name, s.column)
            }
            Self::Insert(s) => {
                let placeholders: Vec<String> =
                    (1..=s.columns.len()).map(|i| format!("${}", i)).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    s.table_name,
                    s.columns.join(", "),
                    placeholders.join(", ")
                )
            }
            Self::Update(s) => {
                write!(f, "UPDATE {} SET ", s.table_name)?;
                let assignments: Vec<String> = s
                    .assignments
                    .iter()
                    .enumerate()
                    .map(|(i, col)| format!("{} = ${}", col, i + 1))
                    .collect();
                write!(f, "{}", assignments.join(", "))?;
                write_selection(f, &s.selection, s.assignments.len() + 1)
            }
            Self::Delete(s) => {
                write!(f, "DELETE FROM {}", s.table_name)?;
                write_selection(f, &s.selection, 1)
            }
            Self::Select(s) => {
                write!(f, "SELECT {} FROM {}", s.projection.join(", "), s.table_name)?;
                write_selection(f, &s.selection, 1)
            }
        }
    }
}
