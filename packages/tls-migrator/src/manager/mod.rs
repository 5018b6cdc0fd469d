//! Migration manager boundary.
//!
//! The wrapper only sequences calls on a [`MigrationManager`]; ordering,
//! bookkeeping and squashing belong to the implementation.
//! [`SchemaMigrationManager`] is the implementation used by the CLI.

pub mod catalog;
pub mod clickhouse;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ConnOptions;
use crate::conn::Connection;
use crate::error::ManagerError;

pub use catalog::{Migration, MigrationCatalog};
pub use clickhouse::{SchemaManagerFactory, SchemaMigrationManager, MIGRATIONS_TABLE};

#[async_trait]
pub trait MigrationManager: Send + Sync {
    /// Idempotent preparation of the database and bookkeeping table.
    async fn bootstrap(&self) -> Result<(), ManagerError>;

    async fn run_squashed_migrations(&self, cancel: &CancellationToken)
        -> Result<(), ManagerError>;

    /// Apply `versions` in order; an empty slice applies every pending one.
    async fn migrate_up_sync(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError>;

    /// Revert `versions` in order; an empty slice reverts nothing.
    async fn migrate_down_sync(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError>;

    /// Like [`MigrationManager::migrate_up_sync`], without waiting for
    /// server-side mutations to finish.
    async fn migrate_up_async(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError>;

    async fn migrate_down_async(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError>;
}

/// Builds a manager around an open connection.
pub trait ManagerFactory: Send + Sync {
    fn create(
        &self,
        conn: Box<dyn Connection>,
        config: ManagerConfig,
    ) -> Result<Box<dyn MigrationManager>, ManagerError>;
}

/// Settings a manager is constructed with.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub cluster_name: String,
    pub replication_enabled: bool,
    pub development: bool,
    pub conn_options: ConnOptions,
}

impl ManagerConfig {
    pub fn new(
        cluster_name: impl Into<String>,
        replication_enabled: bool,
        development: bool,
        conn_options: ConnOptions,
    ) -> Result<Self, ManagerError> {
        let config = Self {
            cluster_name: cluster_name.into(),
            replication_enabled,
            development,
            conn_options,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cluster and database names end up inside DDL, so both are restricted
    /// to identifier characters.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.replication_enabled && self.cluster_name.is_empty() {
            return Err(ManagerError::InvalidConfig {
                message: "cluster name is required when replication is enabled".to_string(),
            });
        }
        if !is_identifier(&self.cluster_name, true) {
            return Err(ManagerError::InvalidConfig {
                message: format!("invalid cluster name '{}'", self.cluster_name),
            });
        }
        if self.conn_options.database.is_empty()
            || !is_identifier(&self.conn_options.database, false)
        {
            return Err(ManagerError::InvalidConfig {
                message: format!("invalid database name '{}'", self.conn_options.database),
            });
        }
        Ok(())
    }

    pub fn database(&self) -> &str {
        &self.conn_options.database
    }
}

fn is_identifier(value: &str, allow_dash: bool) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-'))
}
