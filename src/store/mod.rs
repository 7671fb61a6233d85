pub mod base;
pub mod file_store;
pub mod memory_store;

pub use base::{create_store, StoreKey, TokenStore};
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
