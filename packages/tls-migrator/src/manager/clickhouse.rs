use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conn::Connection;
use crate::error::ManagerError;
use crate::manager::catalog::{Migration, MigrationCatalog};
use crate::manager::{ManagerConfig, ManagerFactory, MigrationManager};

pub const MIGRATIONS_TABLE: &str = "schema_migrations";

const STATUS_FINISHED: &str = "finished";
const STATUS_REVERTED: &str = "reverted";

/// Server settings that make ALTERs and mutations return before completion.
const ASYNC_SETTINGS: &[(&str, &str)] = &[("alter_sync", "0"), ("mutations_sync", "0")];

const CREATE_DATABASE: &str = "CREATE DATABASE IF NOT EXISTS {{DATABASE}}{{ON_CLUSTER}}";

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS {{DATABASE}}.schema_migrations{{ON_CLUSTER}} (
    migration_id UInt64,
    status LowCardinality(String),
    created_at DateTime64(3) DEFAULT now64(3)
) ENGINE = {{REPLICATED}}ReplacingMergeTree(created_at)
ORDER BY migration_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Sync,
    Async,
}

impl Mode {
    fn settings(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Mode::Sync => &[],
            Mode::Async => ASYNC_SETTINGS,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

/// Builds [`SchemaMigrationManager`]s sharing one catalog.
#[derive(Debug, Clone, Default)]
pub struct SchemaManagerFactory {
    catalog: Arc<MigrationCatalog>,
}

impl SchemaManagerFactory {
    pub fn new(catalog: MigrationCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }
}

impl ManagerFactory for SchemaManagerFactory {
    fn create(
        &self,
        conn: Box<dyn Connection>,
        config: ManagerConfig,
    ) -> Result<Box<dyn MigrationManager>, ManagerError> {
        let manager = SchemaMigrationManager::new(conn, config, Arc::clone(&self.catalog))?;
        Ok(Box::new(manager))
    }
}

/// Applies catalog migrations over a connection and records them in
/// `<database>.schema_migrations`.
///
/// A version counts as applied when its latest row has status `finished`.
pub struct SchemaMigrationManager {
    conn: Box<dyn Connection>,
    config: ManagerConfig,
    catalog: Arc<MigrationCatalog>,
}

impl SchemaMigrationManager {
    pub fn new(
        conn: Box<dyn Connection>,
        config: ManagerConfig,
        catalog: Arc<MigrationCatalog>,
    ) -> Result<Self, ManagerError> {
        config.validate()?;
        Ok(Self {
            conn,
            config,
            catalog,
        })
    }

    /// Expand the SQL placeholders for this cluster and database.
    pub fn render(&self, sql: &str) -> String {
        let (on_cluster, replicated) = if self.config.replication_enabled {
            (format!(" ON CLUSTER {}", self.config.cluster_name), "Replicated")
        } else {
            (String::new(), "")
        };
        sql.replace("{{DATABASE}}", self.config.database())
            .replace("{{ON_CLUSTER}}", &on_cluster)
            .replace("{{REPLICATED}}", replicated)
    }

    fn table(&self) -> String {
        format!("{}.{}", self.config.database(), MIGRATIONS_TABLE)
    }

    pub async fn applied_versions(&self) -> Result<BTreeSet<u64>, ManagerError> {
        let sql = format!(
            "SELECT migration_id FROM {} FINAL WHERE status = '{}' ORDER BY migration_id",
            self.table(),
            STATUS_FINISHED
        );
        let mut applied = BTreeSet::new();
        for line in self.conn.query_lines(&sql).await? {
            match line.trim().parse::<u64>() {
                Ok(version) => {
                    applied.insert(version);
                }
                Err(_) => warn!(row = %line, "ignoring unexpected row in migrations table"),
            }
        }
        Ok(applied)
    }

    async fn run_statements(
        &self,
        version: u64,
        statements: &[String],
        mode: Mode,
    ) -> Result<(), ManagerError> {
        for statement in statements {
            let sql = self.render(statement);
            if self.config.development {
                info!(version, mode = mode.as_str(), sql = %sql, "running statement");
            } else {
                debug!(version, mode = mode.as_str(), sql = %sql, "running statement");
            }
            self.conn
                .exec(&sql, mode.settings())
                .await
                .map_err(|source| ManagerError::Statement { version, source })?;
        }
        Ok(())
    }

    async fn record(&self, version: u64, status: &str) -> Result<(), ManagerError> {
        let sql = format!(
            "INSERT INTO {} (migration_id, status) VALUES ({version}, '{status}')",
            self.table()
        );
        self.conn
            .exec(&sql, &[])
            .await
            .map_err(|source| ManagerError::Statement { version, source })
    }

    async fn apply(
        &self,
        cancel: &CancellationToken,
        migrations: &[&Migration],
        mode: Mode,
    ) -> Result<(), ManagerError> {
        for migration in migrations {
            if cancel.is_cancelled() {
                return Err(ManagerError::Cancelled {
                    version: migration.version,
                });
            }
            info!(
                version = migration.version,
                name = %migration.name,
                mode = mode.as_str(),
                "applying migration"
            );
            self.run_statements(migration.version, &migration.up, mode)
                .await?;
            self.record(migration.version, STATUS_FINISHED).await?;
        }
        Ok(())
    }

    async fn revert(
        &self,
        cancel: &CancellationToken,
        migrations: &[&Migration],
        mode: Mode,
    ) -> Result<(), ManagerError> {
        for migration in migrations {
            if cancel.is_cancelled() {
                return Err(ManagerError::Cancelled {
                    version: migration.version,
                });
            }
            info!(
                version = migration.version,
                name = %migration.name,
                mode = mode.as_str(),
                "reverting migration"
            );
            self.run_statements(migration.version, &migration.down, mode)
                .await?;
            self.record(migration.version, STATUS_REVERTED).await?;
        }
        Ok(())
    }

    /// Resolve every requested version before anything runs. Repeats keep
    /// their first position only.
    fn resolve(&self, versions: &[u64]) -> Result<Vec<&Migration>, ManagerError> {
        let mut seen = HashSet::new();
        versions
            .iter()
            .filter(|&&version| seen.insert(version))
            .map(|&version| {
                self.catalog
                    .get(version)
                    .ok_or(ManagerError::UnknownVersion { version })
            })
            .collect()
    }

    async fn migrate_up(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
        mode: Mode,
    ) -> Result<(), ManagerError> {
        let requested: Vec<&Migration> = if versions.is_empty() {
            self.catalog.migrations().iter().collect()
        } else {
            self.resolve(versions)?
        };

        let applied = self.applied_versions().await?;
        let pending: Vec<&Migration> = requested
            .into_iter()
            .filter(|m| {
                let done = applied.contains(&m.version);
                if done {
                    debug!(version = m.version, "already applied, skipping");
                }
                !done
            })
            .collect();

        info!(pending = pending.len(), mode = mode.as_str(), "migrating up");
        self.apply(cancel, &pending, mode).await
    }

    async fn migrate_down(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
        mode: Mode,
    ) -> Result<(), ManagerError> {
        if versions.is_empty() {
            info!("no down migrations requested");
            return Ok(());
        }
        let requested = self.resolve(versions)?;

        let applied = self.applied_versions().await?;
        let to_revert: Vec<&Migration> = requested
            .into_iter()
            .filter(|m| {
                let done = applied.contains(&m.version);
                if !done {
                    debug!(version = m.version, "not applied, skipping");
                }
                done
            })
            .collect();

        info!(count = to_revert.len(), mode = mode.as_str(), "migrating down");
        self.revert(cancel, &to_revert, mode).await
    }
}

#[async_trait]
impl MigrationManager for SchemaMigrationManager {
    async fn bootstrap(&self) -> Result<(), ManagerError> {
        for statement in [CREATE_DATABASE, CREATE_MIGRATIONS_TABLE] {
            let sql = self.render(statement);
            debug!(sql = %sql, "bootstrap");
            self.conn.exec(&sql, &[]).await?;
        }
        Ok(())
    }

    async fn run_squashed_migrations(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        let applied = self.applied_versions().await?;
        let pending: Vec<&Migration> = self
            .catalog
            .squashed()
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();

        info!(pending = pending.len(), "running squashed migrations");
        self.apply(cancel, &pending, Mode::Sync).await
    }

    async fn migrate_up_sync(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.migrate_up(cancel, versions, Mode::Sync).await
    }

    async fn migrate_down_sync(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.migrate_down(cancel, versions, Mode::Sync).await
    }

    async fn migrate_up_async(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.migrate_up(cancel, versions, Mode::Async).await
    }

    async fn migrate_down_async(
        &self,
        cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.migrate_down(cancel, versions, Mode::Async).await
    }
}
