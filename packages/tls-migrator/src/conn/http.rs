use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use tracing::debug;

use crate::config::ConnOptions;
use crate::conn::{Connection, Connector};
use crate::error::ConnError;

pub const DEFAULT_HTTP_PORT: u16 = 8123;
pub const DEFAULT_HTTPS_PORT: u16 = 8443;

/// Opens connections against the ClickHouse HTTP interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn open(&self, opts: &ConnOptions) -> Result<Box<dyn Connection>, ConnError> {
        Ok(Box::new(HttpConnection::new(opts)?))
    }
}

/// A client bound to the first address of the DSN.
///
/// Construction does not contact the server; the first request (usually
/// [`Connection::ping`]) does.
pub struct HttpConnection {
    client: reqwest::Client,
    base: Url,
    ping_url: Url,
    database: String,
    username: String,
    password: String,
    settings: BTreeMap<String, String>,
    debug: bool,
    closed: AtomicBool,
}

impl HttpConnection {
    pub fn new(opts: &ConnOptions) -> Result<Self, ConnError> {
        let base = endpoint(opts)?;
        let ping_url = base.join("ping").map_err(|_| ConnError::Endpoint {
            endpoint: base.to_string(),
        })?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(opts.dial_timeout)
            .timeout(opts.read_timeout);
        if let Some(tls) = &opts.tls {
            builder = builder.use_preconfigured_tls(tls.as_ref().clone());
        }

        Ok(Self {
            client: builder.build()?,
            base,
            ping_url,
            database: opts.database.clone(),
            username: opts.username.clone(),
            password: opts.password.clone(),
            settings: opts.settings.clone(),
            debug: opts.debug,
            closed: AtomicBool::new(false),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn ensure_open(&self) -> Result<(), ConnError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnError::Closed);
        }
        Ok(())
    }

    fn statement(&self, sql: &str, extra: &[(&str, &str)]) -> RequestBuilder {
        let mut query: Vec<(&str, &str)> = vec![("database", self.database.as_str())];
        query.extend(self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        query.extend_from_slice(extra);

        self.client
            .post(self.base.clone())
            .query(&query)
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, ConnError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ConnError::Server {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn ping(&self) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.send(self.client.get(self.ping_url.clone())).await?;
        Ok(())
    }

    async fn exec(&self, sql: &str, settings: &[(&str, &str)]) -> Result<(), ConnError> {
        self.ensure_open()?;
        if self.debug {
            debug!(sql = %sql, "exec");
        }
        self.send(self.statement(sql, settings)).await?;
        Ok(())
    }

    async fn query_lines(&self, sql: &str) -> Result<Vec<String>, ConnError> {
        self.ensure_open()?;
        if self.debug {
            debug!(sql = %sql, "query");
        }
        let body = self
            .send(self.statement(sql, &[("default_format", "TabSeparated")]))
            .await?;
        Ok(body
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn close(&self) -> Result<(), ConnError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Base URL for the first configured address.
fn endpoint(opts: &ConnOptions) -> Result<Url, ConnError> {
    let addr = opts.addrs.first().ok_or_else(|| ConnError::Endpoint {
        endpoint: String::new(),
    })?;
    let (scheme, default_port) = if opts.use_https() {
        ("https", DEFAULT_HTTPS_PORT)
    } else {
        ("http", DEFAULT_HTTP_PORT)
    };

    let raw = format!("{scheme}://{addr}/");
    let invalid = || ConnError::Endpoint {
        endpoint: raw.clone(),
    };
    let mut url = Url::parse(&raw).map_err(|_| invalid())?;
    if !has_port(addr) {
        url.set_port(Some(default_port)).map_err(|_| invalid())?;
    }
    Ok(url)
}

fn has_port(addr: &str) -> bool {
    let host_end = addr.rfind(']').map(|i| i + 1).unwrap_or(0);
    addr[host_end..].contains(':')
}
