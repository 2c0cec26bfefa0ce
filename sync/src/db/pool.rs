//! Database connection pool management.

use crate::config::ConnectionProfile;
use crate::error::{Result, SyncError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool for a profile.
///
/// Sized for the worker pool plus the orchestrator's own statements.
pub async fn create_pool(profile: &ConnectionProfile) -> Result<Pool> {
    PgPoolOptions::new()
        .max_connections(profile.workers() as u32 + 2)
        .connect(&profile.database_url())
        .await
        .map_err(SyncError::ConnectFailure)
}
