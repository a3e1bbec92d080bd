pub mod memory;
pub mod table;

pub use memory::{MemoryDatabase, MemoryHandle};
pub use table::{Table, TableSchema};
