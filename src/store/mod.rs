//! Session persistence: backend abstraction plus the dual-backend store.

pub mod backend;
pub mod session_store;

pub use backend::{MemoryBackend, RocksBackend, SessionBackend, StoreError};
pub use session_store::{BackendSelector, SessionStore, StorePolicy};
