pub mod resource;
pub mod storage;

pub use resource::{CreateOptions, DeleteOptions, ResourceService, UpdateOptions, generate_name};
pub use storage::Storage;
