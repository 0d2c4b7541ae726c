//! Persistence layer: tabular roster storage behind one trait.

pub mod libsql_backend;
pub mod locks;
pub mod memory;
pub mod sheets;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use sheets::SheetsStore;
pub use traits::{FoundRow, RecordStore};
