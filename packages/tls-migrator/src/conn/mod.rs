//! Database connection seam.
//!
//! The migrator only needs to ping, execute DDL and read back a column of
//! values. [`HttpConnector`] talks to the ClickHouse HTTP interface; tests
//! substitute their own implementations.

pub mod http;

use async_trait::async_trait;

use crate::config::ConnOptions;
use crate::error::ConnError;

pub use http::{HttpConnection, HttpConnector};

#[async_trait]
pub trait Connection: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> Result<(), ConnError>;

    /// Execute a statement, discarding any result. `settings` are applied to
    /// this statement only, on top of the connection's settings.
    async fn exec(&self, sql: &str, settings: &[(&str, &str)]) -> Result<(), ConnError>;

    /// Run a query and return its output one row per line (tab separated).
    async fn query_lines(&self, sql: &str) -> Result<Vec<String>, ConnError>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), ConnError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, opts: &ConnOptions) -> Result<Box<dyn Connection>, ConnError>;
}
