//! The wrapper tying certificate loading, connection setup and the
//! migration manager together.
//!
//! Sync run: parse args → parse DSN → build TLS → open connection →
//! bootstrap → squashed migrations → up or down. The first failing stage
//! ends the run; nothing is retried.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{dispatcher, error, info, warn, Dispatch};

use crate::config::{parse_dsn, sanitize_dsn, ConnOptions, MigrateArgs};
use crate::conn::{Connector, HttpConnector};
use crate::error::{error_chain, MigratorError, TlsError};
use crate::manager::{
    ManagerConfig, ManagerFactory, MigrationCatalog, MigrationManager, SchemaManagerFactory,
};
use crate::telemetry::build_logger;
use crate::tls::{create_tls_config, validate_cert_files, CertExpiry};

pub struct TlsMigrator<C = HttpConnector, F = SchemaManagerFactory> {
    logger: Dispatch,
    connector: C,
    managers: F,
}

impl TlsMigrator {
    /// Migrator talking HTTP(S) to ClickHouse, applying `catalog`, logging
    /// JSON to stderr.
    pub fn new(catalog: MigrationCatalog) -> Self {
        Self::with_parts(build_logger(), HttpConnector, SchemaManagerFactory::new(catalog))
    }
}

impl<C, F> TlsMigrator<C, F>
where
    C: Connector,
    F: ManagerFactory,
{
    pub fn with_parts(logger: Dispatch, connector: C, managers: F) -> Self {
        Self {
            logger,
            connector,
            managers,
        }
    }

    pub fn logger(&self) -> &Dispatch {
        &self.logger
    }

    /// Run bootstrap, squashed migrations, then up or down migrations with
    /// mTLS. `args.certs` is required.
    pub async fn run_sync_migrate(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        self.sync_migrate(args)
            .with_subscriber(self.logger.clone())
            .await
    }

    /// Sync run with default certificate names, no replication and every
    /// pending up migration.
    pub async fn run_sync_migrate_with_defaults(
        &self,
        dsn: &str,
        cluster_name: &str,
        cert_dir: impl Into<PathBuf>,
    ) -> Result<(), MigratorError> {
        let args = MigrateArgs::with_defaults(dsn, cluster_name, cert_dir);
        self.run_sync_migrate(&args).await
    }

    pub async fn run_up_migrations(
        &self,
        dsn: &str,
        cluster_name: &str,
        cert_dir: impl Into<PathBuf>,
        versions: Vec<u64>,
    ) -> Result<(), MigratorError> {
        let mut args = MigrateArgs::with_defaults(dsn, cluster_name, cert_dir);
        args.up_versions = versions;
        self.run_sync_migrate(&args).await
    }

    pub async fn run_down_migrations(
        &self,
        dsn: &str,
        cluster_name: &str,
        cert_dir: impl Into<PathBuf>,
        versions: Vec<u64>,
    ) -> Result<(), MigratorError> {
        let mut args = MigrateArgs::with_defaults(dsn, cluster_name, cert_dir);
        args.down_versions = versions;
        self.run_sync_migrate(&args).await
    }

    /// Up or down migrations in async mode, without bootstrap or squashed
    /// migrations. TLS is used only when `args.certs` is set.
    pub async fn run_async_migrate(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        self.async_migrate(args)
            .with_subscriber(self.logger.clone())
            .await
    }

    /// Check the certificate files without connecting.
    pub fn validate_tls_config(&self, args: &MigrateArgs) -> Result<CertExpiry, MigratorError> {
        dispatcher::with_default(&self.logger, || {
            let certs = args
                .certs
                .as_ref()
                .ok_or(TlsError::NotConfigured)
                .map_err(MigratorError::TlsValidation)?;
            validate_cert_files(certs).map_err(MigratorError::TlsValidation)
        })
    }

    /// Open an mTLS connection, ping it and close it again.
    pub async fn test_connection(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        self.ping_and_close(args).with_subscriber(self.logger.clone()).await
    }

    async fn sync_migrate(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        info!(
            dsn = %sanitize_dsn(&args.dsn),
            replication = args.replication_enabled,
            cluster_name = %args.cluster_name,
            "Starting TLS migrator"
        );

        let result: Result<(), MigratorError> = async {
            args.check_versions()?;
            let opts = self.connection_options(args, true)?;
            let manager = self.open_manager(args, opts).await?;

            manager.bootstrap().await.map_err(MigratorError::Bootstrap)?;
            info!("Bootstrapped migrations");

            let cancel = CancellationToken::new();
            manager
                .run_squashed_migrations(&cancel)
                .await
                .map_err(MigratorError::SquashedMigrations)?;
            info!("Ran squashed migrations");

            if args.is_down() {
                info!(versions = ?args.down_versions, "Migrating down");
                manager
                    .migrate_down_sync(&cancel, &args.down_versions)
                    .await
                    .map_err(MigratorError::MigrateDown)
            } else {
                info!(versions = ?args.up_versions, "Migrating up");
                manager
                    .migrate_up_sync(&cancel, &args.up_versions)
                    .await
                    .map_err(MigratorError::MigrateUp)
            }
        }
        .await;

        log_outcome(&result);
        result
    }

    async fn async_migrate(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        info!(
            dsn = %sanitize_dsn(&args.dsn),
            replication = args.replication_enabled,
            cluster_name = %args.cluster_name,
            tls = args.certs.is_some(),
            "Running migrations in async mode"
        );
        info!(versions = ?args.up_versions, "Up migrations");
        info!(versions = ?args.down_versions, "Down migrations");

        let result: Result<(), MigratorError> = async {
            args.check_versions()?;
            let opts = self.connection_options(args, false)?;
            let manager = self.open_manager(args, opts).await?;

            let cancel = CancellationToken::new();
            if args.is_down() {
                info!("Migrating down");
                manager
                    .migrate_down_async(&cancel, &args.down_versions)
                    .await
                    .map_err(MigratorError::MigrateDown)
            } else {
                info!("Migrating up");
                manager
                    .migrate_up_async(&cancel, &args.up_versions)
                    .await
                    .map_err(MigratorError::MigrateUp)
            }
        }
        .await;

        log_outcome(&result);
        result
    }

    async fn ping_and_close(&self, args: &MigrateArgs) -> Result<(), MigratorError> {
        let opts = self.connection_options(args, true)?;
        let conn = self
            .connector
            .open(&opts)
            .await
            .map_err(MigratorError::OpenConnection)?;

        let pinged = conn.ping().await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close connection");
        }
        pinged.map_err(MigratorError::Ping)?;

        info!("Database connection test successful");
        Ok(())
    }

    /// Parse the DSN and attach the mTLS configuration. Without certificate
    /// paths this fails when `require_tls` is set and connects in plain text
    /// otherwise.
    fn connection_options(
        &self,
        args: &MigrateArgs,
        require_tls: bool,
    ) -> Result<ConnOptions, MigratorError> {
        let mut opts = parse_dsn(&args.dsn).map_err(MigratorError::ParseDsn)?;
        info!(opts = ?opts, "Parsed DSN");

        match &args.certs {
            Some(certs) => {
                let tls = create_tls_config(certs).map_err(MigratorError::TlsConfig)?;
                opts.tls = Some(tls);
            }
            None if require_tls => {
                return Err(MigratorError::TlsConfig(TlsError::NotConfigured));
            }
            None => info!("No certificate directory given, connecting without TLS"),
        }
        Ok(opts)
    }

    /// The manager configuration is validated before the connection opens.
    async fn open_manager(
        &self,
        args: &MigrateArgs,
        opts: ConnOptions,
    ) -> Result<Box<dyn MigrationManager>, MigratorError> {
        let config = ManagerConfig::new(
            args.cluster_name.clone(),
            args.replication_enabled,
            args.development,
            opts,
        )
        .map_err(MigratorError::CreateManager)?;

        info!("Opening connection");
        let conn = self
            .connector
            .open(&config.conn_options)
            .await
            .map_err(MigratorError::OpenConnection)?;
        info!("Opened connection successfully");

        self.managers
            .create(conn, config)
            .map_err(MigratorError::CreateManager)
    }
}

fn log_outcome(result: &Result<(), MigratorError>) {
    match result {
        Ok(()) => info!("Migrations completed"),
        Err(e) => error!(stage = e.stage(), error = %error_chain(e), "Migration run failed"),
    }
}
