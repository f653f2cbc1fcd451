use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{PersisterError, Result};
use crate::query::MySqlDialect;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row};

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    /// Create a new MySQL backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn bind_values<'q>(
        mut query: Query<'q, MySql, MySqlArguments>,
        values: &'q [Value],
    ) -> Query<'q, MySql, MySqlArguments> {
        for value in values {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else if let Some(u) = n.as_u64() {
                        query.bind(u)
                    } else {
                        query.bind(n.as_f64())
                    }
                }
                Value::String(s) => query.bind(s.as_str()),
                Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
            };
        }
        query
    }

    /// Convert MySQL row to QueryRow
    fn convert_row(row: &MySqlRow) -> Result<QueryRow> {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let column_name = column.name();

            // Text first: JSON decoding also accepts text columns
            let value = if let Ok(value) = row.try_get::<Option<String>, _>(column_name) {
                value.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i64>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<u64>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<f64>, _>(column_name) {
                value
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<bool>, _>(column_name) {
                value.map(Value::Bool).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<Value>, _>(column_name) {
                value.unwrap_or(Value::Null)
            } else {
                return Err(PersisterError::Database(format!(
                    "Could not decode column \"{}\"",
                    column_name
                )));
            };
            query_row.insert(column_name, value);
        }

        Ok(query_row)
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    type Dialect = MySqlDialect;

    async fn connect(url: &str) -> Result<Self> {
        Self::new(url).await
    }

    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        let result = Self::bind_values(sqlx::query(sql), values)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult> {
        let rows = Self::bind_values(sqlx::query(sql), values)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::convert_row).collect()
    }

    /// MySQL reports the first id generated by a multi-row insert
    async fn insert(&self, sql: &str, values: &[Value], _id_column: &str) -> Result<Option<Value>> {
        let result = Self::bind_values(sqlx::query(sql), values)
            .execute(&self.pool)
            .await?;

        Ok(match result.last_insert_id() {
            0 => None,
            id => Some(Value::from(id)),
        })
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
