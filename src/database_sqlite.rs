//! SQLite implementation of the database abstraction layer
use crate::database::{
    CellValue, DatabaseClient, DatabaseError, DatabaseType, StatementCollector, StatementResult,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, Connection, Either, Executor, Row, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::debug;

/// SQLite database client
pub struct SqliteClient {
    conn: SqliteConnection,
}

impl SqliteClient {
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(DatabaseError::from_connect)?
            .create_if_missing(true);
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(DatabaseError::from_connect)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError> {
        debug!("[SqliteClient::execute] {} parameter(s)", params.len());

        let mut stream = if params.is_empty() {
            (&mut self.conn).fetch_many(sqlx::raw_sql(sql))
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = query.bind(param.as_str());
            }
            (&mut self.conn).fetch_many(query)
        };

        let mut collector = StatementCollector::default();
        while let Some(item) = stream
            .try_next()
            .await
            .map_err(DatabaseError::from_execution)?
        {
            match item {
                Either::Left(done) => collector.finish_statement(done.rows_affected()),
                Either::Right(row) => {
                    let columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    let cells = (0..row.len()).map(|i| decode_sqlite_value(&row, i)).collect();
                    collector.push_row(columns, cells);
                }
            }
        }
        drop(stream);

        if !collector.is_single_rowless_statement() {
            return Ok(collector.finish());
        }
        // An empty result set still has columns; the prepared statement has them.
        let columns = match (&mut self.conn).prepare(sql).await {
            Ok(statement) => statement.columns().iter().map(|c| c.name().to_string()).collect(),
            Err(e) => {
                debug!("[SqliteClient::execute] no column metadata: {e}");
                Vec::new()
            }
        };
        Ok(collector.finish_with_columns(columns))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .close()
            .await
            .map_err(DatabaseError::from_execution)
    }
}

/// SQLite is dynamically typed, so decode by the value's storage class rather
/// than the declared column type.
fn decode_sqlite_value(row: &SqliteRow, column_index: usize) -> CellValue {
    let storage = match row.try_get_raw(column_index) {
        Ok(value) if value.is_null() => return CellValue::Null,
        Ok(value) => value.type_info().name().to_string(),
        Err(_) => return CellValue::Null,
    };

    let decoded = match storage.as_str() {
        "INTEGER" => row.try_get_unchecked::<i64, _>(column_index).ok().map(CellValue::Int),
        "REAL" => row.try_get_unchecked::<f64, _>(column_index).ok().map(CellValue::Float),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(column_index)
            .ok()
            .map(CellValue::Bytes),
        _ => None,
    };

    decoded
        .or_else(|| {
            row.try_get_unchecked::<String, _>(column_index)
                .ok()
                .map(CellValue::Text)
        })
        .unwrap_or_else(|| CellValue::Text(format!("<{storage}>")))
}
