//! PostgreSQL implementation of the database abstraction layer
use crate::database::{
    CellValue, DatabaseClient, DatabaseError, DatabaseType, ISO_DATETIME, StatementCollector,
    StatementResult,
};
use crate::sql_text::{number_bind_markers, rewrite_bind_markers};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgConnection, PgRow, PgTypeInfo, Postgres};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Connection, Either, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::debug;

/// PostgreSQL database client
pub struct PostgreSQLClient {
    conn: PgConnection,
}

impl PostgreSQLClient {
    pub async fn connect(url: &str) -> Result<Self, DatabaseError> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(DatabaseError::from_connect)?;
        Ok(Self { conn })
    }

    /// Number the `?` markers and cast each one to the type the server infers
    /// for it. Solicited values are always sent as text.
    async fn typed_statement(&mut self, sql: &str) -> String {
        let numbered = number_bind_markers(sql);
        let inferred: Vec<PgTypeInfo> = match (&mut self.conn).prepare(&numbered).await {
            Ok(statement) => match statement.parameters() {
                Some(Either::Left(types)) => types.to_vec(),
                _ => Vec::new(),
            },
            Err(e) => {
                // Executing the statement reports the same error to the user.
                debug!("[PostgreSQLClient::typed_statement] cannot prepare: {e}");
                return numbered;
            }
        };
        rewrite_bind_markers(sql, |n| typed_marker(n, inferred.get(n - 1)))
    }
}

/// `$n`, cast from text when the server expects another type.
fn typed_marker(n: usize, inferred: Option<&PgTypeInfo>) -> String {
    match inferred.map(|t| t.name()) {
        None | Some("TEXT" | "VARCHAR" | "UNKNOWN") => format!("${n}"),
        Some(type_name) => format!("CAST(${n} AS {type_name})"),
    }
}

#[async_trait]
impl DatabaseClient for PostgreSQLClient {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[String],
    ) -> Result<Vec<StatementResult>, DatabaseError> {
        debug!("[PostgreSQLClient::execute] {} parameter(s)", params.len());

        // Parameters need the extended protocol, which takes `$n` markers and a
        // single statement. Plain batches go through the simple protocol.
        let statement_text = if params.is_empty() {
            sql.to_string()
        } else {
            self.typed_statement(sql).await
        };

        let mut stream = if params.is_empty() {
            (&mut self.conn).fetch_many(sqlx::raw_sql(&statement_text))
        } else {
            let mut query = sqlx::query(&statement_text);
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
                    let cells = (0..row.len())
                        .map(|i| decode_postgresql_value(&row, i))
                        .collect();
                    collector.push_row(columns, cells);
                }
            }
        }
        drop(stream);

        if !collector.is_single_rowless_statement() {
            return Ok(collector.finish());
        }
        // An empty result set still has columns; the prepared statement has them.
        let columns = match (&mut self.conn).prepare(&statement_text).await {
            Ok(statement) => statement.columns().iter().map(|c| c.name().to_string()).collect(),
            Err(e) => {
                debug!("[PostgreSQLClient::execute] no column metadata: {e}");
                Vec::new()
            }
        };
        Ok(collector.finish_with_columns(columns))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .close()
            .await
            .map_err(DatabaseError::from_execution)
    }
}

fn decode<T>(row: &PgRow, column_index: usize) -> Option<T>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<T, _>(column_index).ok()
}

fn decode_postgresql_value(row: &PgRow, column_index: usize) -> CellValue {
    if row
        .try_get_raw(column_index)
        .map(|v| v.is_null())
        .unwrap_or(false)
    {
        return CellValue::Null;
    }

    let type_name = row.column(column_index).type_info().name().to_string();
    let decoded = match type_name.as_str() {
        "BOOL" => decode::<bool>(row, column_index).map(CellValue::Bool),
        "INT2" => decode::<i16>(row, column_index).map(|v| CellValue::Int(v.into())),
        "INT4" => decode::<i32>(row, column_index).map(|v| CellValue::Int(v.into())),
        "INT8" => decode::<i64>(row, column_index).map(CellValue::Int),
        "OID" => decode::<Oid>(row, column_index).map(|v| CellValue::UInt(v.0.into())),
        "FLOAT4" => decode::<f32>(row, column_index).map(|v| CellValue::Float(v.into())),
        "FLOAT8" => decode::<f64>(row, column_index).map(CellValue::Float),
        "NUMERIC" => decode::<Decimal>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "TIMESTAMPTZ" => decode::<DateTime<Utc>>(row, column_index)
            .map(|v| CellValue::Text(v.to_rfc3339())),
        "TIMESTAMP" => decode::<NaiveDateTime>(row, column_index)
            .map(|v| CellValue::Text(v.format(ISO_DATETIME).to_string())),
        "DATE" => decode::<NaiveDate>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "TIME" => decode::<NaiveTime>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "UUID" => decode::<Uuid>(row, column_index).map(|v| CellValue::Text(v.to_string())),
        "JSON" | "JSONB" => {
            decode::<JsonValue>(row, column_index).map(|v| CellValue::Text(v.to_string()))
        }
        "BYTEA" => decode::<Vec<u8>>(row, column_index).map(CellValue::Bytes),
        _ => None,
    };

    // Text-format values of any other type (arrays, intervals, enums, ranges)
    // read as their server rendering.
    decoded
        .or_else(|| {
            row.try_get_unchecked::<String, _>(column_index)
                .ok()
                .map(CellValue::Text)
        })
        .unwrap_or_else(|| CellValue::Text(format!("<{type_name}>")))
}
