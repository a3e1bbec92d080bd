pub mod context;
pub mod document;
pub mod error;
pub mod types;
pub mod value;

pub use context::Context;
pub use document::{Document, ObjectMeta};
pub use error::{DbError, Result, StoreError, StoreResult};
pub use types::{Column, Row, Schema, validate_identifier};
pub use value::{DataType, Value};
