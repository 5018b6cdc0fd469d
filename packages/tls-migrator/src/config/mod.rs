pub mod args;
pub mod dsn;

pub use args::{parse_versions, CertPaths, MigrateArgs, VersionParseError};
pub use dsn::{parse_dsn, sanitize_dsn, ConnOptions};
