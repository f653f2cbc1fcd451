use crate::backend::{DatabaseBackend, QueryResult, QueryRow};
use crate::error::{PersisterError, Result};
use crate::query::PgDialect;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Create a new PostgreSQL backend with connection pool
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn bind_values<'q>(
        mut query: Query<'q, Postgres, PgArguments>,
        values: &'q [Value],
    ) -> Query<'q, Postgres, PgArguments> {
        for value in values {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64()),
                },
                Value::String(s) => query.bind(s.as_str()),
                Value::Array(_) | Value::Object(_) => query.bind(sqlx::types::Json(value)),
            };
        }
        query
    }

    /// Convert PostgreSQL row to QueryRow
    fn convert_row(row: &PgRow) -> Result<QueryRow> {
        let mut query_row = QueryRow::new();

        for column in row.columns() {
            let column_name = column.name();

            let value = if let Ok(value) = row.try_get::<Option<Value>, _>(column_name) {
                value.unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<String>, _>(column_name) {
                value.map(Value::String).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i64>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i32>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<i16>, _>(column_name) {
                value.map(Value::from).unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<f64>, _>(column_name) {
                value
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if let Ok(value) = row.try_get::<Option<bool>, _>(column_name) {
                value.map(Value::Bool).unwrap_or(Value::Null)
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
impl DatabaseBackend for PostgresBackend {
    type Dialect = PgDialect;

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

    async fn insert(&self, sql: &str, values: &[Value], id_column: &str) -> Result<Option<Value>> {
        let row = Self::bind_values(sqlx::query(sql), values)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Self::convert_row(&row)?
                .get(id_column)
                .filter(|id| !id.is_null())
                .cloned()),
            None => Ok(None),
        }
    }

    fn is_connected(&self) -> bool {
        !self.pool.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn test_postgres_connection() {
        let backend = PostgresBackend::connect("postgresql://localhost/test").await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL running
    async fn test_postgres_insert_returning() {
        let backend = PostgresBackend::connect("postgresql://localhost/test")
            .await
            .unwrap();

        backend
            .execute(
                "CREATE TABLE IF NOT EXISTS carts (cart_id BIGSERIAL PRIMARY KEY, cart_name TEXT)",
                &[],
            )
            .await
            .unwrap();

        let id = backend
            .insert(
                "INSERT INTO \"carts\" (\"cart_name\") VALUES ($1) RETURNING \"cart_id\"",
                &[Value::from("weekly")],
                "cart_id",
            )
            .await
            .unwrap();
        assert!(id.is_some());

        let rows = backend
            .query("SELECT \"cart_name\" FROM \"carts\" WHERE \"cart_id\" = $1", &[id.unwrap()])
            .await
            .unwrap();
        assert_eq!(rows[0].get("cart_name"), Some(&Value::from("weekly")));
    }
}
