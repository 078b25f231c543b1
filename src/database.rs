//! Connection layer: descriptors, the driver boundary and the connection manager.
//! Supports PostgreSQL, MySQL/MariaDB and SQLite through sqlx.
use crate::password_sanitizer::sanitize_connection_url;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Driver name that switches server addressing to DSN lookup.
pub const DSN_DRIVER: &str = "dsn";

/// chrono format for ISO-8601 timestamps without zone.
pub(crate) const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Trait for database type specific behavior to eliminate match statements
pub trait DatabaseTypeExt {
    /// Get the display name for this database type
    fn display_name(&self) -> &'static str;

    /// Get the URL scheme for building URLs
    fn url_scheme(&self) -> &'static str;

    /// Check if this database type is file-based (no network connection)
    fn is_file_based(&self) -> bool;
}

impl DatabaseTypeExt for DatabaseType {
    fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::PostgreSQL => "PostgreSQL",
            DatabaseType::MySQL => "MySQL",
            DatabaseType::SQLite => "SQLite",
        }
    }

    fn url_scheme(&self) -> &'static str {
        match self {
            DatabaseType::PostgreSQL => "postgres",
            DatabaseType::MySQL => "mysql",
            DatabaseType::SQLite => "sqlite",
        }
    }

    fn is_file_based(&self) -> bool {
        matches!(self, DatabaseType::SQLite)
    }
}

impl DatabaseType {
    /// Map a driver name (`--driver`) or URL scheme to a backend.
    pub fn from_driver_name(name: &str) -> Option<DatabaseType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(DatabaseType::PostgreSQL),
            "mysql" | "mariadb" => Some(DatabaseType::MySQL),
            "sqlite" | "sqlite3" => Some(DatabaseType::SQLite),
            _ => None,
        }
    }
}

/// Errors that can occur during database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    ExecutionError(String),

    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    #[error("Connection lost: {0}")]
    ConnectivityLost(String),

    #[error("Not connected to a database. Use :use <database> to reconnect")]
    NotConnected,
}

impl DatabaseError {
    /// Classify a driver error raised while opening a connection.
    pub fn from_connect(err: sqlx::Error) -> Self {
        DatabaseError::ConnectionError(err.to_string())
    }

    /// Classify a driver error raised by a statement. Transport-level failures
    /// mean the connection itself is gone.
    pub fn from_execution(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DatabaseError::ConnectivityLost(err.to_string()),
            sqlx::Error::Database(db_err) => DatabaseError::ExecutionError(db_err.message().to_string()),
            other => DatabaseError::ExecutionError(other.to_string()),
        }
    }

    /// Whether the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DatabaseError::ConnectivityLost(_))
    }
}

/// Where the server lives: a host (with optional port) or a DSN name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub port: Option<u16>,
    pub dsn: bool,
}

impl ServerSpec {
    /// Parse `host`, `host,port` or `host:port`. An explicit `port` wins over
    /// one embedded in the server string.
    pub fn parse(spec: &str, port: Option<u16>, dsn: bool) -> Self {
        let spec = spec.trim();
        if dsn {
            return Self { name: spec.to_string(), port: None, dsn };
        }

        let (host, embedded) = split_port(spec);
        // Bare IPv6 addresses are bracketed so they can sit in a URL.
        let name = if host.matches(':').count() > 1 && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };

        Self {
            name,
            port: port.or(embedded),
            dsn,
        }
    }
}

/// `host,port`, `host:port` or `[v6]:port`. A bare IPv6 address has no port.
fn split_port(spec: &str) -> (&str, Option<u16>) {
    let parts = match spec.rsplit_once(',') {
        Some(parts) => Some(parts),
        None if spec.starts_with('[') => spec
            .rsplit_once("]:")
            .map(|(host, port)| (&spec[..host.len() + 1], port)),
        None if spec.matches(':').count() == 1 => spec.split_once(':'),
        None => None,
    };

    match parts {
        Some((host, port)) => match port.trim().parse::<u16>() {
            Ok(parsed) => (host.trim(), Some(parsed)),
            Err(_) => (spec, None),
        },
        None => (spec, None),
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{},{}", self.name, port),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Rely on the driver's own authentication (peer auth, socket, OS user).
    Integrated,
    Password { user: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Integrated => write!(f, "Integrated"),
            Credentials::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Everything needed to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub server: ServerSpec,
    pub database: String,
    pub credentials: Credentials,
    pub driver: String,
}

impl ConnectionDescriptor {
    /// Same server, credentials and driver, different database.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// Keyword style descriptor for diagnostics. The password is never included.
    pub fn connection_string(&self) -> String {
        let mut parts = vec![format!("Driver={}", self.driver)];
        if self.server.dsn {
            parts.push(format!("DSN={}", self.server.name));
        } else {
            parts.push(format!("Server={}", self.server));
        }
        parts.push(format!("Database={}", self.database));
        match &self.credentials {
            Credentials::Integrated => parts.push("Trusted_Connection=Yes".to_string()),
            Credentials::Password { user, .. } => {
                parts.push(format!("Uid={user}"));
                parts.push("Pwd=[REDACTED]".to_string());
            }
        }
        parts.join(";")
    }

    /// Resolve the backend and the sqlx connection URL. DSN names are looked
    /// up in `dsn`.
    pub fn to_url(
        &self,
        dsn: &HashMap<String, String>,
    ) -> Result<(DatabaseType, String), DatabaseError> {
        if self.server.dsn {
            return self.dsn_url(dsn);
        }

        let database_type = DatabaseType::from_driver_name(&self.driver)
            .ok_or_else(|| DatabaseError::UnsupportedDriver(self.driver.clone()))?;

        if database_type.is_file_based() {
            return Ok((database_type, sqlite_url(&self.database)));
        }

        let mut url = Url::parse(&format!("{}://{}", database_type.url_scheme(), self.server.name))
            .map_err(|e| DatabaseError::ConnectionError(format!("Invalid server '{}': {e}", self.server.name)))?;
        self.apply_to_url(&mut url)?;
        Ok((database_type, url.to_string()))
    }

    fn dsn_url(
        &self,
        dsn: &HashMap<String, String>,
    ) -> Result<(DatabaseType, String), DatabaseError> {
        let base = dsn.get(&self.server.name).ok_or_else(|| {
            DatabaseError::ConnectionError(format!(
                "DSN '{}' is not defined in the [dsn] section of the configuration",
                self.server.name
            ))
        })?;

        let scheme = base.split(':').next().unwrap_or_default();
        let database_type = DatabaseType::from_driver_name(scheme)
            .ok_or_else(|| DatabaseError::UnsupportedDriver(scheme.to_string()))?;

        if database_type.is_file_based() {
            if self.database.is_empty() {
                return Ok((database_type, base.clone()));
            }
            return Ok((database_type, sqlite_url(&self.database)));
        }

        let mut url = Url::parse(base)
            .map_err(|e| DatabaseError::ConnectionError(format!("Invalid DSN '{}': {e}", self.server.name)))?;
        self.apply_to_url(&mut url)?;
        Ok((database_type, url.to_string()))
    }

    fn apply_to_url(&self, url: &mut Url) -> Result<(), DatabaseError> {
        let invalid = |what: &str| DatabaseError::ConnectionError(format!("Cannot set {what} on connection URL"));

        if self.server.port.is_some() {
            url.set_port(self.server.port).map_err(|_| invalid("port"))?;
        }
        if let Credentials::Password { user, password } = &self.credentials {
            url.set_username(user).map_err(|_| invalid("user"))?;
            url.set_password(Some(password)).map_err(|_| invalid("password"))?;
        }
        if !self.database.is_empty() {
            url.set_path(&format!("/{}", self.database));
        }
        Ok(())
    }
}

fn sqlite_url(database: &str) -> String {
    if database == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite:{database}")
    }
}

/// One displayable value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Null => "[NULL]".to_string(),
            CellValue::Bool(v) => v.to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::UInt(v) => v.to_string(),
            CellValue::Float(v) => v.to_string(),
            CellValue::Text(v) => v.clone(),
            CellValue::Bytes(v) => format!("0x{}", hex::encode(v)),
        }
    }
}

/// Columns and rows produced by one statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// Outcome of one statement inside an executed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows(ResultSet),
    RowsAffected(u64),
}

/// Groups a driver's interleaved row / statement-complete stream into
/// per-statement results.
#[derive(Default)]
pub struct StatementCollector {
    results: Vec<StatementResult>,
    current: Option<ResultSet>,
}

impl StatementCollector {
    pub fn push_row(&mut self, columns: Vec<String>, cells: Vec<CellValue>) {
        match &mut self.current {
            Some(set) if set.columns == columns => set.rows.push(cells),
            _ => {
                self.flush();
                self.current = Some(ResultSet {
                    columns,
                    rows: vec![cells],
                });
            }
        }
    }

    /// A statement finished. Statements that produced rows are already
    /// represented by their result set.
    pub fn finish_statement(&mut self, rows_affected: u64) {
        if self.current.is_some() {
            self.flush();
        } else {
            self.results.push(StatementResult::RowsAffected(rows_affected));
        }
    }

    pub fn finish(mut self) -> Vec<StatementResult> {
        self.flush();
        self.results
    }

    /// The execution was one statement that produced no rows. It may still
    /// be a query whose result set is empty.
    pub fn is_single_rowless_statement(&self) -> bool {
        self.current.is_none() && matches!(self.results.as_slice(), [StatementResult::RowsAffected(_)])
    }

    /// Like [`finish`](Self::finish), but a single row-less statement whose
    /// prepared form declares `columns` becomes an empty result set.
    pub fn finish_with_columns(mut self, columns: Vec<String>) -> Vec<StatementResult> {
        if !columns.is_empty() && self.is_single_rowless_statement() {
            self.results = vec![StatementResult::Rows(ResultSet {
                columns,
                rows: Vec::new(),
            })];
        }
        self.finish()
    }

    fn flush(&mut self) {
        if let Some(set) = self.current.take() {
            self.results.push(StatementResult::Rows(set));
        }
    }
}

/// A live connection as seen by the shell.
#[async_trait]
pub trait DatabaseClient: Send {
    /// Execute a batch with `?` bind markers bound to `params` in order.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError>;

    fn database_type(&self) -> DatabaseType;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Opens connections from descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseClient>, DatabaseError>;
}

/// Connector backed by the sqlx drivers.
pub struct SqlxConnector {
    dsn: HashMap<String, String>,
}

impl SqlxConnector {
    pub fn new(dsn: HashMap<String, String>) -> Self {
        Self { dsn }
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseClient>, DatabaseError> {
        let (database_type, url) = descriptor.to_url(&self.dsn)?;
        debug!(
            "[SqlxConnector::connect] {} via {}",
            descriptor.connection_string(),
            sanitize_connection_url(&url)
        );
        create_database_client(database_type, &url).await
    }
}

/// Factory for creating database clients
pub async fn create_database_client(
    database_type: DatabaseType,
    url: &str,
) -> Result<Box<dyn DatabaseClient>, DatabaseError> {
    match database_type {
        DatabaseType::PostgreSQL => {
            let client = crate::database_postgresql::PostgreSQLClient::connect(url).await?;
            Ok(Box::new(client))
        }
        DatabaseType::MySQL => {
            let client = crate::database_mysql::MySqlClient::connect(url).await?;
            Ok(Box::new(client))
        }
        DatabaseType::SQLite => {
            let client = crate::database_sqlite::SqliteClient::connect(url).await?;
            Ok(Box::new(client))
        }
    }
}

/// Owns the single active connection of a session.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    descriptor: ConnectionDescriptor,
    database_type: DatabaseType,
    client: Option<Box<dyn DatabaseClient>>,
    timeout_seconds: u64,
}

impl ConnectionManager {
    pub async fn open(
        connector: Box<dyn Connector>,
        descriptor: ConnectionDescriptor,
        timeout_seconds: u64,
    ) -> Result<Self, DatabaseError> {
        let client = connector.connect(&descriptor).await?;
        debug!(
            "[ConnectionManager::open] connected to {} ({})",
            descriptor.connection_string(),
            client.database_type()
        );
        Ok(Self {
            connector,
            descriptor,
            database_type: client.database_type(),
            client: Some(client),
            timeout_seconds,
        })
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// 0 disables the timeout.
    pub fn set_timeout(&mut self, seconds: u64) {
        self.timeout_seconds = seconds;
    }

    /// Run `sql` under the current timeout. A dead connection is dropped so
    /// that nothing else is sent over it.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError> {
        let client = self.client.as_mut().ok_or(DatabaseError::NotConnected)?;
        debug!(
            "[ConnectionManager::execute] {} bound parameter(s), timeout {}s",
            params.len(),
            self.timeout_seconds
        );

        let outcome = if self.timeout_seconds == 0 {
            client.execute(sql, params).await
        } else {
            match tokio::time::timeout(
                Duration::from_secs(self.timeout_seconds),
                client.execute(sql, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DatabaseError::Timeout(self.timeout_seconds)),
            }
        };

        if let Err(e) = &outcome {
            if e.is_fatal() {
                debug!("[ConnectionManager::execute] dropping dead connection: {e}");
                self.client = None;
            }
        }
        outcome
    }

    /// Close the current connection and open a new one on the same server.
    /// On failure the manager stays disconnected.
    pub async fn switch_database(&mut self, database: &str) -> Result<(), DatabaseError> {
        self.close().await;

        let descriptor = self.descriptor.with_database(database);
        let client = self.connector.connect(&descriptor).await?;
        debug!(
            "[ConnectionManager::switch_database] now on {}",
            descriptor.connection_string()
        );
        self.database_type = client.database_type();
        self.client = Some(client);
        self.descriptor = descriptor;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.close().await {
                debug!("[ConnectionManager::close] error while closing: {e}");
            }
        }
    }
}
