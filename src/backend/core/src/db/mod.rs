//! Database layer for Appguard.
//!
//! Uses PostgreSQL for persistent storage with sqlx.
//!
//! - [`PgMembershipDirectory`]: the member directory behind the policy evaluator
//! - [`PgResourceStore`]: resource rows, versions and the tenant list for cleanup
//! - [`push_scope_filter`]: translation of a [`ScopeFilter`](crate::rbac::ScopeFilter) into SQL

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{AppguardError, Result};

pub mod membership;
pub mod resources;
pub mod scope;

pub use membership::PgMembershipDirectory;
pub use resources::PgResourceStore;
pub use scope::push_scope_filter;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database pool ready"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppguardError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn membership_directory(&self) -> PgMembershipDirectory {
        PgMembershipDirectory::new(self.pool.clone())
    }

    pub fn resource_store(&self) -> PgResourceStore {
        PgResourceStore::new(self.pool.clone())
    }
}
