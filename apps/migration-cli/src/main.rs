use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tls_migrator::config::args::{
    DEFAULT_CA_NAME, DEFAULT_CERT_NAME, DEFAULT_CLUSTER_NAME, DEFAULT_KEY_NAME,
};
use tls_migrator::config::VersionParseError;
use tls_migrator::telemetry::build_logger;
use tls_migrator::{
    error_chain, parse_versions, CertPaths, HttpConnector, ManagerError, MigrateArgs,
    MigrationCatalog, MigratorError, SchemaManagerFactory, TlsMigrator,
};
use tracing::{dispatcher, error, Dispatch};

#[derive(Parser, Debug)]
#[command(name = "schema-migrator")]
#[command(about = "ClickHouse schema migrations over mutual TLS")]
struct Cli {
    /// ClickHouse connection string
    #[arg(long, env = "DSN", global = true)]
    dsn: Option<String>,

    /// Create tables as replicated, with ON CLUSTER clauses
    #[arg(long, env = "REPLICATION", global = true)]
    replication: bool,

    /// Cluster used for ON CLUSTER clauses
    #[arg(long, env = "CLUSTER_NAME", global = true, default_value = DEFAULT_CLUSTER_NAME)]
    cluster_name: String,

    /// Development mode: log every statement
    #[arg(long, env = "DEV", global = true)]
    dev: bool,

    /// Directory holding `<version>_<name>.up.sql` / `.down.sql` files
    #[arg(long, env = "MIGRATIONS_DIR", global = true, default_value = "migrations")]
    migrations_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap, run squashed migrations, then migrate up or down
    Sync(MigrateCmd),
    /// Migrate up or down without waiting for mutations
    Async(MigrateCmd),
    /// Check the certificate files only
    Validate(CertArgs),
    /// Open a connection, ping it and close it
    Ping(CertArgs),
}

#[derive(Args, Debug)]
struct MigrateCmd {
    #[command(flatten)]
    versions: VersionArgs,

    #[command(flatten)]
    certs: CertArgs,
}

/// Raw version lists, parsed after clap so a bad token exits like any other
/// error.
#[derive(Args, Debug, Default)]
struct VersionArgs {
    /// Comma separated versions to apply; empty applies every pending one
    #[arg(long, env = "UP", default_value = "")]
    up: String,

    /// Comma separated versions to revert
    #[arg(long, env = "DOWN", default_value = "")]
    down: String,
}

#[derive(Args, Debug)]
struct CertArgs {
    /// Directory holding the client certificate, key and CA bundle
    #[arg(long, env = "CERT_DIR")]
    cert_dir: Option<PathBuf>,

    #[arg(long, env = "CERT_NAME", default_value = DEFAULT_CERT_NAME)]
    cert_name: String,

    #[arg(long, env = "KEY_NAME", default_value = DEFAULT_KEY_NAME)]
    key_name: String,

    #[arg(long, env = "CA_NAME", default_value = DEFAULT_CA_NAME)]
    ca_name: String,
}

impl CertArgs {
    fn paths(&self) -> Option<CertPaths> {
        self.cert_dir.as_ref().map(|dir| CertPaths {
            dir: dir.clone(),
            cert_name: self.cert_name.clone(),
            key_name: self.key_name.clone(),
            ca_name: self.ca_name.clone(),
        })
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("no DSN given, set --dsn or DSN")]
    MissingDsn,
    #[error("invalid --{flag} list")]
    Versions {
        flag: &'static str,
        #[source]
        source: VersionParseError,
    },
    #[error("failed to load migrations from {path}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: ManagerError,
    },
    #[error(transparent)]
    Migrator(#[from] MigratorError),
}

impl Cli {
    fn dsn(&self) -> Result<&str, CliError> {
        self.dsn
            .as_deref()
            .filter(|dsn| !dsn.trim().is_empty())
            .ok_or(CliError::MissingDsn)
    }

    fn migrate_args(
        &self,
        versions: &VersionArgs,
        certs: &CertArgs,
    ) -> Result<MigrateArgs, CliError> {
        let up_versions = parse_versions(&versions.up)
            .map_err(|source| CliError::Versions { flag: "up", source })?;
        let down_versions = parse_versions(&versions.down)
            .map_err(|source| CliError::Versions { flag: "down", source })?;

        Ok(MigrateArgs {
            dsn: self.dsn()?.to_string(),
            cluster_name: self.cluster_name.clone(),
            replication_enabled: self.replication,
            development: self.dev,
            up_versions,
            down_versions,
            certs: certs.paths(),
        })
    }

    fn cert_args(&self, certs: &CertArgs) -> MigrateArgs {
        MigrateArgs {
            cluster_name: self.cluster_name.clone(),
            certs: certs.paths(),
            ..MigrateArgs::new(self.dsn.clone().unwrap_or_default())
        }
    }

    fn migrator(&self, logger: Dispatch) -> Result<TlsMigrator, CliError> {
        let catalog =
            MigrationCatalog::from_dir(&self.migrations_dir).map_err(|source| {
                CliError::Catalog {
                    path: self.migrations_dir.clone(),
                    source,
                }
            })?;
        Ok(TlsMigrator::with_parts(
            logger,
            HttpConnector,
            SchemaManagerFactory::new(catalog),
        ))
    }
}

async fn run(cli: &Cli, logger: Dispatch) -> Result<(), CliError> {
    match &cli.command {
        Command::Sync(cmd) => {
            let args = cli.migrate_args(&cmd.versions, &cmd.certs)?;
            args.check_versions()?;
            cli.migrator(logger)?.run_sync_migrate(&args).await?;
        }
        Command::Async(cmd) => {
            let args = cli.migrate_args(&cmd.versions, &cmd.certs)?;
            args.check_versions()?;
            cli.migrator(logger)?.run_async_migrate(&args).await?;
        }
        Command::Validate(certs) => {
            let args = cli.cert_args(certs);
            TlsMigrator::with_parts(logger, HttpConnector, SchemaManagerFactory::default())
                .validate_tls_config(&args)?;
        }
        Command::Ping(certs) => {
            cli.dsn()?;
            let args = cli.cert_args(certs);
            TlsMigrator::with_parts(logger, HttpConnector, SchemaManagerFactory::default())
                .test_connection(&args)
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let logger = build_logger();
    if let Err(e) = run(&cli, logger.clone()).await {
        let message = error_chain(&e);
        dispatcher::with_default(&logger, || error!(error = %message, "schema-migrator failed"));
        eprintln!("Migration failed: {message}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: &[&str] = &[
        "DSN",
        "REPLICATION",
        "CLUSTER_NAME",
        "DEV",
        "MIGRATIONS_DIR",
        "UP",
        "DOWN",
        "CERT_DIR",
        "CERT_NAME",
        "KEY_NAME",
        "CA_NAME",
    ];

    /// Clears the flag environment for the duration of a test.
    struct CleanEnv {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl CleanEnv {
        fn new() -> Self {
            let saved = ENV_VARS
                .iter()
                .map(|&name| (name, std::env::var(name).ok()))
                .collect();
            for name in ENV_VARS {
                std::env::remove_var(name);
            }
            Self { saved }
        }
    }

    impl Drop for CleanEnv {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    fn parse(argv: &[&str]) -> Cli {
        let mut full = vec!["schema-migrator"];
        full.extend_from_slice(argv);
        Cli::try_parse_from(full).expect("arguments should parse")
    }

    fn migrate_args(cli: &Cli) -> Result<MigrateArgs, CliError> {
        match &cli.command {
            Command::Sync(cmd) | Command::Async(cmd) => cli.migrate_args(&cmd.versions, &cmd.certs),
            other => panic!("not a migrate command: {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn sync_up_list_is_parsed_in_order() {
        let _env = CleanEnv::new();
        let cli = parse(&[
            "--dsn",
            "clickhouse://h:9000",
            "sync",
            "--up",
            "1,2,3",
            "--cert-dir",
            "/certs",
        ]);

        let args = migrate_args(&cli).unwrap();
        assert_eq!(args.up_versions, vec![1, 2, 3]);
        assert!(args.down_versions.is_empty());

        let certs = args.certs.expect("cert dir given");
        assert_eq!(certs.cert_file(), PathBuf::from("/certs/fullchain.crt"));
        assert_eq!(certs.key_file(), PathBuf::from("/certs/private_migration.key"));
        assert_eq!(certs.ca_file(), PathBuf::from("/certs/partialchain.crt"));
    }

    #[test]
    #[serial]
    fn malformed_version_list_is_rejected() {
        let _env = CleanEnv::new();
        let cli = parse(&["--dsn", "clickhouse://h", "sync", "--up", "1,x,3"]);

        let err = migrate_args(&cli).unwrap_err();
        match err {
            CliError::Versions { flag, source } => {
                assert_eq!(flag, "up");
                assert_eq!(source.token, "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn global_flags_work_after_the_subcommand() {
        let _env = CleanEnv::new();
        let cli = parse(&[
            "async",
            "--down",
            "4",
            "--dsn",
            "clickhouse://h",
            "--replication",
            "--cluster-name",
            "prod",
            "--dev",
        ]);

        let args = migrate_args(&cli).unwrap();
        assert_eq!(args.down_versions, vec![4]);
        assert!(args.replication_enabled);
        assert!(args.development);
        assert_eq!(args.cluster_name, "prod");
        assert!(args.certs.is_none(), "async without --cert-dir has no TLS");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_flags_or_env() {
        let _env = CleanEnv::new();
        let cli = parse(&["--dsn", "clickhouse://h", "sync"]);

        assert_eq!(cli.cluster_name, "cluster");
        assert_eq!(cli.migrations_dir, PathBuf::from("migrations"));
        assert!(!cli.replication);
        assert!(!cli.dev);
        let args = migrate_args(&cli).unwrap();
        assert!(args.up_versions.is_empty());
        assert!(args.certs.is_none());
    }

    #[test]
    #[serial]
    fn environment_fills_unset_flags() {
        let _env = CleanEnv::new();
        std::env::set_var("DSN", "clickhouse://from-env");
        std::env::set_var("CLUSTER_NAME", "env-cluster");
        std::env::set_var("REPLICATION", "true");
        std::env::set_var("CERT_DIR", "/env/certs");
        std::env::set_var("KEY_NAME", "env.key");
        std::env::set_var("UP", "5,6");

        let cli = parse(&["sync"]);
        let args = migrate_args(&cli).unwrap();

        assert_eq!(args.dsn, "clickhouse://from-env");
        assert_eq!(args.cluster_name, "env-cluster");
        assert!(args.replication_enabled);
        assert_eq!(args.up_versions, vec![5, 6]);
        let certs = args.certs.unwrap();
        assert_eq!(certs.key_file(), PathBuf::from("/env/certs/env.key"));
        assert_eq!(certs.cert_name, DEFAULT_CERT_NAME);
    }

    #[test]
    #[serial]
    fn flags_take_precedence_over_environment() {
        let _env = CleanEnv::new();
        std::env::set_var("CLUSTER_NAME", "env-cluster");
        std::env::set_var("DSN", "clickhouse://from-env");

        let cli = parse(&[
            "--cluster-name",
            "flag-cluster",
            "--dsn",
            "clickhouse://from-flag",
            "sync",
        ]);

        assert_eq!(cli.cluster_name, "flag-cluster");
        assert_eq!(cli.dsn.as_deref(), Some("clickhouse://from-flag"));
    }

    #[test]
    #[serial]
    fn missing_dsn_is_an_error() {
        let _env = CleanEnv::new();
        let cli = parse(&["sync", "--up", "1"]);

        assert!(matches!(migrate_args(&cli), Err(CliError::MissingDsn)));
    }

    #[test]
    #[serial]
    fn validate_does_not_need_a_dsn() {
        let _env = CleanEnv::new();
        let cli = parse(&["validate", "--cert-dir", "/certs", "--ca-name", "ca.pem"]);

        let Command::Validate(certs) = &cli.command else {
            panic!("expected validate");
        };
        let args = cli.cert_args(certs);
        assert!(args.dsn.is_empty());
        assert_eq!(
            args.certs.unwrap().ca_file(),
            PathBuf::from("/certs/ca.pem")
        );
    }

    #[tokio::test]
    #[serial]
    async fn conflicting_lists_fail_before_reading_migrations() {
        let _env = CleanEnv::new();
        for command in ["sync", "async"] {
            let cli = parse(&[
                "--dsn",
                "clickhouse://h",
                "--migrations-dir",
                "/nonexistent/migrations",
                command,
                "--up",
                "1",
                "--down",
                "2",
            ]);

            let err = run(&cli, Dispatch::none()).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    CliError::Migrator(MigratorError::ConflictingVersions)
                ),
                "{command}: {err:?}"
            );
        }
    }

    #[tokio::test]
    #[serial]
    async fn missing_migrations_dir_is_reported() {
        let _env = CleanEnv::new();
        let cli = parse(&[
            "--dsn",
            "clickhouse://h",
            "--migrations-dir",
            "/nonexistent/migrations",
            "async",
            "--up",
            "1",
        ]);

        let err = run(&cli, Dispatch::none()).await.unwrap_err();
        assert!(matches!(err, CliError::Catalog { .. }), "{err:?}");
    }

    #[test]
    fn error_chain_lists_causes() {
        let err = CliError::Versions {
            flag: "down",
            source: VersionParseError {
                token: "abc".to_string(),
            },
        };
        assert_eq!(
            error_chain(&err),
            "invalid --down list: failed to parse version 'abc'"
        );

        let err = CliError::from(MigratorError::ConflictingVersions);
        assert_eq!(
            error_chain(&err),
            "cannot provide both up and down migrations"
        );
    }
}
