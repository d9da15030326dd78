//! SQLite backend for the scindex contract-state index.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The index can live on disk or in
//! memory with a backing file; see [`StorageMode`].

mod encode;
mod schema;
mod store;

pub mod error;
pub mod mode;
pub mod settings;

pub use error::{Error, Result};
pub use mode::StorageMode;
pub use settings::SettingsStore;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
