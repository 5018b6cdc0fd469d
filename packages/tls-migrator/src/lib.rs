//! mTLS-aware schema migration wrapper for ClickHouse.
//! Used by the `schema-migrator` CLI and by services embedding the migrator.

pub mod config;
pub mod conn;
pub mod error;
pub mod manager;
pub mod migrator;
pub mod telemetry;
pub mod tls;

pub use config::args::{parse_versions, CertPaths, MigrateArgs};
pub use config::dsn::{parse_dsn, sanitize_dsn, ConnOptions};
pub use conn::{Connection, Connector, HttpConnector};
pub use error::{error_chain, ConnError, DsnError, ManagerError, MigratorError, TlsError};
pub use manager::{
    ManagerConfig, ManagerFactory, Migration, MigrationCatalog, MigrationManager,
    SchemaManagerFactory,
};
pub use migrator::TlsMigrator;
