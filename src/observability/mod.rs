//! Persistence for request logs and sealed insights
//!
//! ```text
//! LogIngester ──► PersistenceWriter (mpsc, single consumer)
//!                     │
//!                     ▼
//!               LogRepository (SQLite, WAL) ◄── SearchQueryEngine, auth
//!                     ▲
//!               cleanup task (daily TTL)
//! ```

pub mod cleanup;
pub mod database;
pub mod writer;

pub use cleanup::{run_cleanup, spawn_cleanup_task, CleanupConfig, CleanupStats};
pub use database::{connect, run_migrations, LogRepository, StoredUser};
pub use writer::PersistenceWriter;
