//! MySQL / MariaDB implementation of the database abstraction layer
use crate::database::{
    CellValue, DatabaseClient, DatabaseError, DatabaseType, ISO_DATETIME, StatementCollector,
    StatementResult,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySql, MySqlConnection, MySqlRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue};
use sqlx::{Column, Connection, Either, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

/// MySQL database client
pub struct MySqlClient {
    conn: MySqlConnection,
}

impl MySqlClient {
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let conn = MySqlConnection::connect(url)
            .await
            .map_err(DatabaseError::from_connect)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError> {
        debug!("[MySqlClient::execute] {} parameter(s)", params.len());

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
                    let cells = (0..row.len()).map(|i| decode_mysql_value(&row, i)).collect();
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
                debug!("[MySqlClient::execute] no column metadata: {e}");
                Vec::new()
            }
        };
        Ok(collector.finish_with_columns(columns))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .close()
            .await
            .map_err(DatabaseError::from_execution)
    }
}

fn decode<T>(row: &MySqlRow, column_index: usize) -> Option<T>
where
    T: for<'r> sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get::<T, _>(column_index).ok()
}

/// Binary columns holding UTF-8 (INFORMATION_SCHEMA reports many names this
/// way) are shown as text.
fn bytes_cell(bytes: Vec<u8>) -> CellValue {
    match String::from_utf8(bytes) {
        Ok(text) => CellValue::Text(text),
        Err(e) => CellValue::Bytes(e.into_bytes()),
    }
}

fn decode_mysql_value(row: &MySqlRow, column_index: usize) -> CellValue {
    if row
        .try_get_raw(column_index)
        .map(|v| v.is_null())
        .unwrap_or(false)
    {
        return CellValue::Null;
    }

    let type_name = row.column(column_index).type_info().name().to_string();
    let decoded = match type_name.as_str() {
        "BOOLEAN" => decode::<bool>(row, column_index).map(CellValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            decode::<i64>(row, column_index).map(CellValue::Int)
        }
        t if t.ends_with("UNSIGNED") => decode::<u64>(row, column_index).map(CellValue::UInt),
        "FLOAT" => decode::<f32>(row, column_index).map(|v| CellValue::Float(v.into())),
        "DOUBLE" => decode::<f64>(row, column_index).map(CellValue::Float),
        "DECIMAL" => decode::<Decimal>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "TIMESTAMP" => decode::<DateTime<Utc>>(row, column_index)
            .map(|v| CellValue::Text(v.to_rfc3339())),
        "DATETIME" => decode::<NaiveDateTime>(row, column_index)
            .map(|v| CellValue::Text(v.format(ISO_DATETIME).to_string())),
        "DATE" => decode::<NaiveDate>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "TIME" => decode::<NaiveTime>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "JSON" => decode::<JsonValue>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            decode::<Vec<u8>>(row, column_index).map(bytes_cell)
        }
        _ => None,
    };

    decoded
        .or_else(|| {
            row.try_get_unchecked::<String, _>(column_index)
                .ok()
                .map(CellValue::Text)
        })
        .or_else(|| {
            row.try_get_unchecked::<Vec<u8>, _>(column_index)
                .ok()
                .map(bytes_cell)
        })
        .unwrap_or_else(|| CellValue::Text(format!("<{type_name}>")))
}
