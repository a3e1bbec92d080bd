pub mod ast;

pub use ast::{
    ColumnDef, CreateIndexStmt, CreateTableStmt, DeleteStmt, InsertStmt, SelectStmt, Statement,
    UpdateStmt,
};
