//! Device-local persistence for the offline layer.

pub mod in_memory;
pub mod sqlite;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use r#trait::{OfflineStore, StoreError};
pub use sqlite::{SqliteStore, default_db_path};
