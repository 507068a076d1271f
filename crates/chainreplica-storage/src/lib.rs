//! chainreplica-storage — pluggable [`Database`](chainreplica_core::Database)
//! backends for ChainReplica.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryDatabase;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
