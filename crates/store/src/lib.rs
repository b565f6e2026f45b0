//! Persisted Record Store adapters.
//!
//! Implements [`lifecycle::RecordStore`] and [`lifecycle::SignupStore`]:
//!
//! - [`MemoryStore`] keeps everything in process memory.
//! - [`FileStore`] keeps a durable JSON snapshot so reconciliation state
//!   survives restarts.
//!
//! Both enforce the same conditional-write rules: a create fails if the key
//! exists, an update or delete fails unless the caller presents the version it
//! read. A failed condition returns [`lifecycle::StoreError::Conflict`] and
//! changes nothing.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** No domain rules live here beyond the write conditions.

mod file;
mod memory;
mod state;

pub use file::FileStore;
pub use memory::MemoryStore;
