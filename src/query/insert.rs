use super::dialect::SqlDialect;
use super::formula::ValueListBuilder;
use super::{collect_factories, QueryBuilder, QueryValueFactory};
use crate::error::{PersisterError, Result};
use std::marker::PhantomData;

/// INSERT query builder for one or more rows
pub struct InsertQueryBuilder<D> {
    table: Option<String>,
    columns: Vec<String>,
    rows: Vec<ValueListBuilder<D>>,
    returning: Option<String>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> InsertQueryBuilder<D> {
    pub fn new() -> Self {
        Self {
            table: None,
            columns: Vec::new(),
            rows: Vec::new(),
            returning: None,
            _dialect: PhantomData,
        }
    }

    pub fn set_into_table(&mut self, table_name: impl Into<String>) {
        self.table = Some(table_name.into());
    }

    /// Adds a column unless it is already listed
    pub fn add_column(&mut self, column_name: impl Into<String>) -> bool {
        let column_name = column_name.into();
        if self.columns.contains(&column_name) {
            return false;
        }
        self.columns.push(column_name);
        true
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn add_value_list(&mut self, row: ValueListBuilder<D>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column returned by the statement; ignored by dialects without `RETURNING`
    pub fn set_returning_column(&mut self, column_name: impl Into<String>) {
        self.returning = Some(column_name.into());
    }
}

impl<D: SqlDialect> Default for InsertQueryBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDialect> QueryBuilder for InsertQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        let table = self
            .table
            .as_deref()
            .filter(|table| !table.is_empty())
            .ok_or_else(|| PersisterError::Builder("INSERT must have a table".to_string()))?;
        if self.columns.is_empty() {
            return Err(PersisterError::Builder(format!(
                "INSERT into \"{}\" must have at least one column",
                table
            )));
        }
        if self.rows.is_empty() {
            return Err(PersisterError::Builder(format!(
                "INSERT into \"{}\" must have at least one row",
                table
            )));
        }
        if let Some(row) = self.rows.iter().find(|row| row.len() != self.columns.len()) {
            return Err(PersisterError::Builder(format!(
                "INSERT into \"{}\" has {} columns but a row with {} values",
                table,
                self.columns.len(),
                row.len()
            )));
        }

        let columns = self
            .columns
            .iter()
            .map(|column| D::quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = self
            .rows
            .iter()
            .map(|row| row.build_fragment())
            .collect::<Result<Vec<_>>>()?
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            D::quote_identifier(table),
            columns,
            rows
        );
        if let Some(returning) = self.returning.as_deref().filter(|_| D::supports_returning()) {
            sql.push_str(&format!(" RETURNING {}", D::quote_identifier(returning)));
        }
        Ok(sql)
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        collect_factories(self.rows.iter())
    }

    fn build_query_string(&self) -> Result<String> {
        Ok(D::finalize_query(&self.build_fragment()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{MySqlDialect, PgDialect};
    use serde_json::json;

    fn row<D: SqlDialect>(values: Vec<serde_json::Value>) -> ValueListBuilder<D> {
        let mut row = ValueListBuilder::new();
        for value in values {
            row.set_param(value);
        }
        row
    }

    #[test]
    fn test_insert_multiple_rows() {
        let mut builder = InsertQueryBuilder::<PgDialect>::new();
        builder.set_into_table("carts");
        builder.add_column("cart_id");
        builder.add_column("cart_name");
        assert!(!builder.add_column("cart_id"));
        builder.add_value_list(row(vec![json!("c1"), json!("first")]));
        builder.add_value_list(row(vec![json!("c2"), json!(null)]));
        builder.set_returning_column("cart_id");

        let (sql, values) = builder.build().unwrap();

        assert_eq!(
            sql,
            "INSERT INTO \"carts\" (\"cart_id\", \"cart_name\") VALUES ($1, $2), ($3, NULL) RETURNING \"cart_id\""
        );
        assert_eq!(values, vec![json!("c1"), json!("first"), json!("c2")]);
    }

    #[test]
    fn test_mysql_ignores_returning() {
        let mut builder = InsertQueryBuilder::<MySqlDialect>::new();
        builder.set_into_table("carts");
        builder.add_column("cart_name");
        builder.add_value_list(row(vec![json!("first")]));
        builder.set_returning_column("cart_id");

        assert_eq!(
            builder.build_query_string().unwrap(),
            "INSERT INTO `carts` (`cart_name`) VALUES (?)"
        );
    }

    #[test]
    fn test_insert_validation() {
        let mut builder = InsertQueryBuilder::<MySqlDialect>::new();
        assert!(builder.build_query_string().is_err());

        builder.set_into_table("carts");
        assert!(builder.build_query_string().is_err());

        builder.add_column("cart_id");
        assert!(builder.build_query_string().is_err());

        builder.add_value_list(row(vec![json!(1), json!(2)]));
        let err = builder.build_query_string().unwrap_err();
        assert!(err.to_string().contains("1 columns but a row with 2 values"));
    }
}
