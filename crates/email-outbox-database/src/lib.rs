//! SQLite storage for the email outbox.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Versioned migrations for the outbox, template and audit tables
//! - Query helpers that work on any `&Connection`
//! - [`SqliteOutboxStore`], which implements the dispatcher ports
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let store = SqliteOutboxStore::new(db, Duration::from_secs(300));
//! store.enqueue(NewOutboxEmail::new("welcome", "ada@example.com", "reg-1")).await?;
//! ```
//!
//! Only SQL runs inside `db.call()`. Rendering and network calls happen in
//! the dispatcher.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
pub use store::SqliteOutboxStore;
