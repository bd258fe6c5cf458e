//! # zapmux-store
//!
//! Persistence for the session manager: one opaque credential record per
//! connection id and one fully-replaced group snapshot per connection id,
//! both in a shared SQLite database so resumption works across restarts
//! and horizontally-scaled instances. `MemoryStore` is the test double.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqlxStore;
