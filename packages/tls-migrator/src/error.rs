use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Connection string parsing errors
#[derive(Debug, Error)]
pub enum DsnError {
    #[error("unsupported scheme '{scheme}' (expected clickhouse, tcp, http or https)")]
    UnsupportedScheme { scheme: String },
    #[error("missing '://' separator")]
    MissingScheme,
    #[error("no host given")]
    MissingHost,
    #[error("invalid port in address '{addr}'")]
    InvalidPort { addr: String },
    #[error("invalid value '{value}' for parameter '{param}'")]
    InvalidParam { param: String, value: String },
    #[error("invalid percent-encoding in {field}")]
    InvalidEncoding { field: &'static str },
}

/// Certificate loading and TLS assembly errors
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("no certificate directory configured")]
    NotConfigured,
    #[error("certificate file not accessible: {path}")]
    CertFileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("key file not accessible: {path}")]
    KeyFileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CA file not accessible: {path}")]
    CaFileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to load client key pair (cert={cert}, key={key}): {detail}")]
    KeyPair {
        cert: PathBuf,
        key: PathBuf,
        detail: String,
    },
    #[error("failed to read ca certificate: {path}")]
    ReadCa {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse CA certificate: {path}")]
    ParseCa { path: PathBuf },
    #[error("TLS configuration error")]
    Config(#[from] rustls::Error),
}

/// Transport level errors raised by a [`crate::conn::Connection`]
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("http client error")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("connection is closed")]
    Closed,
    #[error("invalid endpoint '{endpoint}'")]
    Endpoint { endpoint: String },
}

/// Errors surfaced by a migration manager
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid manager configuration: {message}")]
    InvalidConfig { message: String },
    #[error("unknown migration version {version}")]
    UnknownVersion { version: u64 },
    #[error("duplicate migration version {version}")]
    DuplicateVersion { version: u64 },
    #[error("failed to read migration catalog at {path}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid migration file name '{name}'")]
    CatalogEntry { name: String },
    #[error("migration {version} failed")]
    Statement {
        version: u64,
        #[source]
        source: ConnError,
    },
    #[error("migration run cancelled before version {version}")]
    Cancelled { version: u64 },
    #[error(transparent)]
    Conn(#[from] ConnError),
}

/// Stage-level errors returned by [`crate::migrator::TlsMigrator`]
#[derive(Debug, Error)]
pub enum MigratorError {
    #[error("cannot provide both up and down migrations")]
    ConflictingVersions,
    #[error("failed to parse dsn")]
    ParseDsn(#[source] DsnError),
    #[error("failed to get tls config")]
    TlsConfig(#[source] TlsError),
    #[error("TLS configuration validation failed")]
    TlsValidation(#[source] TlsError),
    #[error("failed to open connection")]
    OpenConnection(#[source] ConnError),
    #[error("failed to ping database")]
    Ping(#[source] ConnError),
    #[error("failed to create migration manager")]
    CreateManager(#[source] ManagerError),
    #[error("failed to bootstrap migrations")]
    Bootstrap(#[source] ManagerError),
    #[error("failed to run squashed migrations")]
    SquashedMigrations(#[source] ManagerError),
    #[error("failed to migrate up")]
    MigrateUp(#[source] ManagerError),
    #[error("failed to migrate down")]
    MigrateDown(#[source] ManagerError),
}

impl MigratorError {
    /// Short stage name used in log lines.
    pub fn stage(&self) -> &'static str {
        match self {
            MigratorError::ConflictingVersions => "parse-args",
            MigratorError::ParseDsn(_) => "parse-dsn",
            MigratorError::TlsConfig(_) => "build-tls",
            MigratorError::TlsValidation(_) => "validate-tls",
            MigratorError::OpenConnection(_) => "open-connection",
            MigratorError::Ping(_) => "ping",
            MigratorError::CreateManager(_) => "create-manager",
            MigratorError::Bootstrap(_) => "bootstrap",
            MigratorError::SquashedMigrations(_) => "run-squashed",
            MigratorError::MigrateUp(_) => "migrate-up",
            MigratorError::MigrateDown(_) => "migrate-down",
        }
    }
}

/// Render an error followed by each of its sources, `: ` separated.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_lists_each_cause_once() {
        let err = MigratorError::Bootstrap(ManagerError::Statement {
            version: 7,
            source: ConnError::Server {
                status: 500,
                body: "Code: 62. Syntax error".to_string(),
            },
        });

        assert_eq!(err.to_string(), "failed to bootstrap migrations");
        assert_eq!(
            error_chain(&err),
            "failed to bootstrap migrations: migration 7 failed: \
             server returned 500: Code: 62. Syntax error"
        );
    }

    #[test]
    fn transparent_conn_errors_are_not_repeated() {
        let err = MigratorError::MigrateUp(ManagerError::Conn(ConnError::Closed));
        assert_eq!(
            error_chain(&err),
            "failed to migrate up: connection is closed"
        );
    }
}
