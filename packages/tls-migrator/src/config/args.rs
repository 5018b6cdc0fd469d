use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::MigratorError;

pub const DEFAULT_CLUSTER_NAME: &str = "cluster";
pub const DEFAULT_CERT_NAME: &str = "fullchain.crt";
pub const DEFAULT_KEY_NAME: &str = "private_migration.key";
pub const DEFAULT_CA_NAME: &str = "partialchain.crt";

/// Location of the client certificate, private key and CA bundle.
///
/// Each file name is joined onto `dir`; the directory itself is never checked,
/// a missing directory surfaces as a failed read of one of the three files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub dir: PathBuf,
    pub cert_name: String,
    pub key_name: String,
    pub ca_name: String,
}

impl CertPaths {
    /// Certificate directory with the default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn cert_file(&self) -> PathBuf {
        self.dir.join(&self.cert_name)
    }

    pub fn key_file(&self) -> PathBuf {
        self.dir.join(&self.key_name)
    }

    pub fn ca_file(&self) -> PathBuf {
        self.dir.join(&self.ca_name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for CertPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            cert_name: DEFAULT_CERT_NAME.to_string(),
            key_name: DEFAULT_KEY_NAME.to_string(),
            ca_name: DEFAULT_CA_NAME.to_string(),
        }
    }
}

/// Arguments for a single migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateArgs {
    pub dsn: String,
    pub cluster_name: String,
    pub replication_enabled: bool,
    pub development: bool,
    /// Versions to apply. Empty means every pending migration.
    pub up_versions: Vec<u64>,
    /// Versions to revert. Must be explicit; empty reverts nothing.
    pub down_versions: Vec<u64>,
    /// `None` connects without TLS (async path only).
    pub certs: Option<CertPaths>,
}

impl MigrateArgs {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            replication_enabled: false,
            development: false,
            up_versions: Vec::new(),
            down_versions: Vec::new(),
            certs: None,
        }
    }

    /// Defaults used by the convenience entry points: no replication, no
    /// development mode, default certificate names inside `cert_dir`.
    pub fn with_defaults(
        dsn: impl Into<String>,
        cluster_name: impl Into<String>,
        cert_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            certs: Some(CertPaths::in_dir(cert_dir)),
            ..Self::new(dsn)
        }
    }

    /// Up and down lists are mutually exclusive.
    pub fn check_versions(&self) -> Result<(), MigratorError> {
        if !self.up_versions.is_empty() && !self.down_versions.is_empty() {
            return Err(MigratorError::ConflictingVersions);
        }
        Ok(())
    }

    pub fn is_down(&self) -> bool {
        !self.down_versions.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("failed to parse version '{token}'")]
pub struct VersionParseError {
    pub token: String,
}

/// Parse a comma separated list of migration versions.
///
/// Empty tokens are skipped, so `""` yields an empty list.
pub fn parse_versions(input: &str) -> Result<Vec<u64>, VersionParseError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<u64>().map_err(|_| VersionParseError {
                token: token.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_list() {
        assert_eq!(parse_versions("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_versions("30, 10 ,20").unwrap(), vec![30, 10, 20]);
    }

    #[test]
    fn empty_tokens_are_skipped() {
        assert!(parse_versions("").unwrap().is_empty());
        assert_eq!(parse_versions("1,,2,").unwrap(), vec![1, 2]);
    }

    #[test]
    fn malformed_token_is_reported() {
        let err = parse_versions("1,x,3").unwrap_err();
        assert_eq!(err.token, "x");
        assert!(parse_versions("-1").is_err());
        assert!(parse_versions("18446744073709551616").is_err());
    }

    #[test]
    fn up_and_down_are_exclusive() {
        let mut args = MigrateArgs::new("clickhouse://localhost");
        args.up_versions = vec![1];
        assert!(args.check_versions().is_ok());

        args.down_versions = vec![2];
        assert!(matches!(
            args.check_versions(),
            Err(MigratorError::ConflictingVersions)
        ));
    }

    #[test]
    fn defaults_use_standard_cert_names() {
        let args = MigrateArgs::with_defaults("clickhouse://h", "prod", "/tmp/certs");
        let certs = args.certs.expect("certs configured");
        assert_eq!(certs.cert_file(), PathBuf::from("/tmp/certs/fullchain.crt"));
        assert_eq!(
            certs.key_file(),
            PathBuf::from("/tmp/certs/private_migration.key")
        );
        assert_eq!(certs.ca_file(), PathBuf::from("/tmp/certs/partialchain.crt"));
        assert_eq!(args.cluster_name, "prod");
        assert!(!args.replication_enabled);
        assert!(args.up_versions.is_empty());
    }
}
