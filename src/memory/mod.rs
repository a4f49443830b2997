//! Memory module for vibemem
//!
//! Records, the JSON-backed store, and the keyword relevance preview.

mod record;
mod relevance;
mod store;

pub use record::{Category, MemoryRecord, NewMemory, Priority, Scope};
pub use relevance::{rank_relevant, relevance_score};
pub use store::{merge, MemoryStore, ID_PREFIX, MEMORY_FILE, STORE_DIR};
