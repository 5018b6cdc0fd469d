//! Migrator test support utilities
//!
//! Certificate fixtures, fake connections and a recording migration manager
//! shared by the integration tests of the workspace.

pub mod certs;
pub mod fakes;
pub mod logging;

pub use certs::{CertDir, CertTriple};
pub use fakes::{Executed, FakeConnection, FakeConnector, ManagerCall, Opened, RecordingFactory};
pub use logging::test_logger;
