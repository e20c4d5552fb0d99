//! recordindex-storage: storage backends for the ingestion pipeline.
//!
//! Backends:
//! - [`memory`]: in-memory, with staged transactions and fault injection (tests, dry runs)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{EntityRow, InMemoryStorage, Tables};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
