//! In-memory connector used by unit tests.
use crate::database::{
    ConnectionDescriptor, Connector, DatabaseClient, DatabaseError, DatabaseType,
    StatementResult,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub enum FakeResponse {
    Results(Vec<StatementResult>),
    Error(String),
    Lost(String),
    Hang,
}

#[derive(Debug, Default)]
pub struct FakeLog {
    pub connects: Vec<ConnectionDescriptor>,
    pub executed: Vec<(String, Vec<String>)>,
    pub closed: usize,
}

impl FakeLog {
    pub fn statements(&self) -> Vec<&str> {
        self.executed.iter().map(|(sql, _)| sql.as_str()).collect()
    }
}

pub struct FakeConnector {
    log: Arc<Mutex<FakeLog>>,
    responses: Arc<Mutex<VecDeque<FakeResponse>>>,
    refused: Vec<String>,
    database_type: DatabaseType,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(FakeLog::default())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            refused: Vec::new(),
            database_type: DatabaseType::PostgreSQL,
        }
    }

    pub fn with_database_type(mut self, database_type: DatabaseType) -> Self {
        self.database_type = database_type;
        self
    }

    pub fn refuse_database(mut self, database: &str) -> Self {
        self.refused.push(database.to_string());
        self
    }

    pub fn log(&self) -> Arc<Mutex<FakeLog>> {
        Arc::clone(&self.log)
    }

    /// Queue the response for the next execution. Unqueued executions succeed
    /// with no results.
    pub fn respond(&self, response: FakeResponse) {
        self.responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DatabaseClient>, DatabaseError> {
        self.log.lock().unwrap().connects.push(descriptor.clone());
        if self.refused.contains(&descriptor.database) {
            return Err(DatabaseError::ConnectionError(format!(
                "database \"{}\" does not exist",
                descriptor.database
            )));
        }
        Ok(Box::new(FakeClient {
            log: Arc::clone(&self.log),
            responses: Arc::clone(&self.responses),
            database_type: self.database_type,
        }))
    }
}

struct FakeClient {
    log: Arc<Mutex<FakeLog>>,
    responses: Arc<Mutex<VecDeque<FakeResponse>>>,
    database_type: DatabaseType,
}

#[async_trait]
impl DatabaseClient for FakeClient {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError> {
        self.log
            .lock()
            .unwrap()
            .executed
            .push((sql.to_string(), params.to_vec()));
        let response = self.responses.lock().unwrap().pop_front();
        match response {
            None => Ok(Vec::new()),
            Some(FakeResponse::Results(results)) => Ok(results),
            Some(FakeResponse::Error(message)) => Err(DatabaseError::ExecutionError(message)),
            Some(FakeResponse::Lost(message)) => Err(DatabaseError::ConnectivityLost(message)),
            Some(FakeResponse::Hang) => std::future::pending().await,
        }
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}
