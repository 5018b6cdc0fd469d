//! In-memory stand-ins for the connection and manager seams.
//!
//! Every fake shares its state through an `Arc`, so a test keeps a clone and
//! inspects what the migrator did after the run.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tls_migrator::{
    ConnError, ConnOptions, Connection, Connector, ManagerConfig, ManagerError, ManagerFactory,
    MigrationManager,
};
use tokio_util::sync::CancellationToken;

/// What a connection was opened with.
#[derive(Debug, Clone)]
pub struct Opened {
    pub addrs: Vec<String>,
    pub database: String,
    pub tls: bool,
}

/// A statement passed to [`Connection::exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub sql: String,
    pub settings: Vec<(String, String)>,
}

#[derive(Default)]
struct ConnState {
    opened: Mutex<Vec<Opened>>,
    executed: Mutex<Vec<Executed>>,
    queries: Mutex<Vec<String>>,
    rows: Mutex<Vec<String>>,
    fail_exec_on: Mutex<Option<String>>,
    fail_open: AtomicBool,
    fail_ping: AtomicBool,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<ConnState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_open(self) -> Self {
        self.state.fail_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_ping(self) -> Self {
        self.state.fail_ping.store(true, Ordering::SeqCst);
        self
    }

    /// Make `exec` fail for statements containing `needle`.
    pub fn failing_exec_on(self, needle: &str) -> Self {
        *self.state.fail_exec_on.lock().expect("fake state poisoned") = Some(needle.to_string());
        self
    }

    /// Lines returned by every `query_lines` call.
    pub fn with_rows(self, rows: &[&str]) -> Self {
        *self.state.rows.lock().expect("fake state poisoned") =
            rows.iter().map(|r| r.to_string()).collect();
        self
    }

    /// A connection sharing this connector's state, without going through
    /// `open`.
    pub fn connection(&self) -> FakeConnection {
        FakeConnection {
            state: Arc::clone(&self.state),
        }
    }

    pub fn opened(&self) -> Vec<Opened> {
        self.state.opened.lock().expect("fake state poisoned").clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.state.executed.lock().expect("fake state poisoned").clone()
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|e| e.sql).collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().expect("fake state poisoned").clone()
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, opts: &ConnOptions) -> Result<Box<dyn Connection>, ConnError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(ConnError::Server {
                status: 503,
                body: "injected open failure".to_string(),
            });
        }
        self.state
            .opened
            .lock()
            .expect("fake state poisoned")
            .push(Opened {
                addrs: opts.addrs.clone(),
                database: opts.database.clone(),
                tls: opts.tls.is_some(),
            });
        Ok(Box::new(self.connection()))
    }
}

pub struct FakeConnection {
    state: Arc<ConnState>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn ping(&self) -> Result<(), ConnError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(ConnError::Server {
                status: 500,
                body: "injected ping failure".to_string(),
            });
        }
        Ok(())
    }

    async fn exec(&self, sql: &str, settings: &[(&str, &str)]) -> Result<(), ConnError> {
        self.state
            .executed
            .lock()
            .expect("fake state poisoned")
            .push(Executed {
                sql: sql.to_string(),
                settings: settings
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });

        let fail_on = self.state.fail_exec_on.lock().expect("fake state poisoned");
        if let Some(needle) = fail_on.as_deref() {
            if sql.contains(needle) {
                return Err(ConnError::Server {
                    status: 500,
                    body: format!("injected failure on '{needle}'"),
                });
            }
        }
        Ok(())
    }

    async fn query_lines(&self, sql: &str) -> Result<Vec<String>, ConnError> {
        self.state
            .queries
            .lock()
            .expect("fake state poisoned")
            .push(sql.to_string());
        Ok(self.state.rows.lock().expect("fake state poisoned").clone())
    }

    async fn close(&self) -> Result<(), ConnError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Calls received by a [`RecordingFactory`] manager, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    Bootstrap,
    Squashed,
    UpSync(Vec<u64>),
    DownSync(Vec<u64>),
    UpAsync(Vec<u64>),
    DownAsync(Vec<u64>),
}

impl ManagerCall {
    fn step(&self) -> &'static str {
        match self {
            ManagerCall::Bootstrap => "bootstrap",
            ManagerCall::Squashed => "squashed",
            ManagerCall::UpSync(_) => "up_sync",
            ManagerCall::DownSync(_) => "down_sync",
            ManagerCall::UpAsync(_) => "up_async",
            ManagerCall::DownAsync(_) => "down_async",
        }
    }
}

#[derive(Default)]
struct ManagerState {
    calls: Mutex<Vec<ManagerCall>>,
    configs: Mutex<Vec<ManagerConfig>>,
    fail_at: Mutex<Option<&'static str>>,
}

/// Factory whose managers record every call instead of migrating.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    state: Arc<ManagerState>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given step: `bootstrap`, `squashed`, `up_sync`, `down_sync`,
    /// `up_async` or `down_async`.
    pub fn failing_at(self, step: &'static str) -> Self {
        *self.state.fail_at.lock().expect("fake state poisoned") = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<ManagerCall> {
        self.state.calls.lock().expect("fake state poisoned").clone()
    }

    pub fn configs(&self) -> Vec<ManagerConfig> {
        self.state.configs.lock().expect("fake state poisoned").clone()
    }
}

impl ManagerFactory for RecordingFactory {
    fn create(
        &self,
        conn: Box<dyn Connection>,
        config: ManagerConfig,
    ) -> Result<Box<dyn MigrationManager>, ManagerError> {
        self.state
            .configs
            .lock()
            .expect("fake state poisoned")
            .push(config);
        Ok(Box::new(RecordingManager {
            _conn: conn,
            state: Arc::clone(&self.state),
        }))
    }
}

struct RecordingManager {
    _conn: Box<dyn Connection>,
    state: Arc<ManagerState>,
}

impl RecordingManager {
    fn record(&self, call: ManagerCall) -> Result<(), ManagerError> {
        let step = call.step();
        self.state
            .calls
            .lock()
            .expect("fake state poisoned")
            .push(call);
        if *self.state.fail_at.lock().expect("fake state poisoned") == Some(step) {
            return Err(ManagerError::Conn(ConnError::Server {
                status: 500,
                body: format!("injected {step} failure"),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationManager for RecordingManager {
    async fn bootstrap(&self) -> Result<(), ManagerError> {
        self.record(ManagerCall::Bootstrap)
    }

    async fn run_squashed_migrations(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<(), ManagerError> {
        self.record(ManagerCall::Squashed)
    }

    async fn migrate_up_sync(
        &self,
        _cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.record(ManagerCall::UpSync(versions.to_vec()))
    }

    async fn migrate_down_sync(
        &self,
        _cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.record(ManagerCall::DownSync(versions.to_vec()))
    }

    async fn migrate_up_async(
        &self,
        _cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.record(ManagerCall::UpAsync(versions.to_vec()))
    }

    async fn migrate_down_async(
        &self,
        _cancel: &CancellationToken,
        versions: &[u64],
    ) -> Result<(), ManagerError> {
        self.record(ManagerCall::DownAsync(versions.to_vec()))
    }
}
