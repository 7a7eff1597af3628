//! Durable backend boundary.
//!
//! The offline layer only needs four things from the remote store: a cheap
//! check, equality-filtered selects, inserts, and patches. Anything that can
//! do those (Supabase's REST interface, an in-memory fake) plugs in here.

pub mod in_memory;
pub mod rest;
pub mod r#trait;

pub use in_memory::InMemoryBackend;
pub use r#trait::{Backend, BackendError, CLIENT_REF_COLUMN, Filter, row_id};
pub use rest::RestBackend;
