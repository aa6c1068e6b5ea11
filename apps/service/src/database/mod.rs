/// Database abstraction layer
///
/// Provides the persistence collaborator the engine records through:
/// monitor definitions, append-only status history, and push heartbeats.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
