use crate::error::Result;
use crate::query::SqlDialect;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Row from a query result, keyed by column name or alias
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRow {
    pub columns: HashMap<String, Value>,
}

impl QueryRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.columns.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.columns.get(key)
    }

    /// Integer column, also accepting numeric strings as some drivers
    /// return aggregates that way
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.columns.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for QueryRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Result of a query
pub type QueryResult = Vec<QueryRow>;

/// Database backend used by [`crate::sql::SqlPersister`]
///
/// Statements arrive fully rendered for [`DatabaseBackend::Dialect`]
/// together with their positional values.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    type Dialect: SqlDialect;

    /// Connect to the database
    async fn connect(url: &str) -> Result<Self>
    where
        Self: Sized;

    /// Execute a statement and return the number of affected rows
    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64>;

    /// Query and return results
    async fn query(&self, sql: &str, values: &[Value]) -> Result<QueryResult>;

    /// Execute an INSERT and return the id generated for its first row,
    /// read from `id_column` or from the driver's last insert id
    async fn insert(&self, sql: &str, values: &[Value], id_column: &str) -> Result<Option<Value>>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}
