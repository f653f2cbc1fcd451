use super::dialect::SqlDialect;
use super::formula::Parameter;
use super::{QueryBuilder, QueryValueFactory};
use crate::error::{PersisterError, Result};
use crate::metadata::TemporalType;
use serde_json::Value;
use std::marker::PhantomData;

/// UPDATE query builder
pub struct UpdateQueryBuilder<D> {
    table: String,
    set_values: Vec<(String, Parameter)>,
    where_builder: Option<Box<dyn QueryBuilder>>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> UpdateQueryBuilder<D> {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table: table_name.into(),
            set_values: Vec::new(),
            where_builder: None,
            _dialect: PhantomData,
        }
    }

    /// Set a column value
    pub fn set(&mut self, column_name: impl Into<String>, value: Value) {
        self.set_values
            .push((column_name.into(), Parameter::new::<D>(value, None)));
    }

    /// Set a temporal column value
    pub fn set_temporal(
        &mut self,
        column_name: impl Into<String>,
        value: Value,
        temporal_type: TemporalType,
    ) {
        self.set_values.push((
            column_name.into(),
            Parameter::new::<D>(value, Some(temporal_type)),
        ));
    }

    pub fn set_where_from_query_builder(&mut self, builder: Box<dyn QueryBuilder>) {
        self.where_builder = Some(builder);
    }
}

impl<D: SqlDialect> QueryBuilder for UpdateQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        if self.set_values.is_empty() {
            return Err(PersisterError::Builder(
                "UPDATE must have at least one SET value".to_string(),
            ));
        }

        let set_clauses: Vec<String> = self
            .set_values
            .iter()
            .map(|(column, parameter)| {
                format!("{} = {}", D::quote_identifier(column), parameter.sql())
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            D::quote_identifier(&self.table),
            set_clauses.join(", ")
        );

        if let Some(where_builder) = &self.where_builder {
            sql.push_str(" WHERE ");
            sql.push_str(&where_builder.build_fragment()?);
        }

        Ok(sql)
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        let mut factories: Vec<QueryValueFactory> = self
            .set_values
            .iter()
            .filter_map(|(_, parameter)| parameter.factory())
            .collect();
        if let Some(where_builder) = &self.where_builder {
            factories.extend(where_builder.get_query_value_factories()?);
        }
        Ok(factories)
    }

    fn build_query_string(&self) -> Result<String> {
        Ok(D::finalize_query(&self.build_fragment()?))
    }
}

/// DELETE query builder; without a WHERE clause every row is removed
pub struct DeleteQueryBuilder<D> {
    table: String,
    where_builder: Option<Box<dyn QueryBuilder>>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> DeleteQueryBuilder<D> {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table: table_name.into(),
            where_builder: None,
            _dialect: PhantomData,
        }
    }

    pub fn set_where_from_query_builder(&mut self, builder: Box<dyn QueryBuilder>) {
        self.where_builder = Some(builder);
    }
}

impl<D: SqlDialect> QueryBuilder for DeleteQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", D::quote_identifier(&self.table));

        if let Some(where_builder) = &self.where_builder {
            sql.push_str(" WHERE ");
            sql.push_str(&where_builder.build_fragment()?);
        }

        Ok(sql)
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        match &self.where_builder {
            Some(where_builder) => where_builder.get_query_value_factories(),
            None => Ok(Vec::new()),
        }
    }

    fn build_query_string(&self) -> Result<String> {
        Ok(D::finalize_query(&self.build_fragment()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::chain::ChainBuilder;
    use crate::query::dialect::{MySqlDialect, PgDialect};
    use serde_json::json;

    #[test]
    fn test_update() {
        let mut builder = UpdateQueryBuilder::<PgDialect>::new("carts");
        builder.set("cart_name", json!("weekly"));
        builder.set("note", json!(null));
        builder.set_temporal("created_at", json!("2023-01-01T00:00:00Z"), TemporalType::Timestamp);
        let mut chain = ChainBuilder::<PgDialect>::and();
        chain.set_column_equals("carts", "cart_id", json!(7), None);
        builder.set_where_from_query_builder(Box::new(chain));

        let (sql, values) = builder.build().unwrap();

        assert_eq!(
            sql,
            "UPDATE \"carts\" SET \"cart_name\" = $1, \"note\" = NULL, \"created_at\" = $2::timestamptz \
             WHERE \"carts\".\"cart_id\" = $3"
        );
        assert_eq!(
            values,
            vec![json!("weekly"), json!("2023-01-01T00:00:00.000Z"), json!(7)]
        );
    }

    #[test]
    fn test_update_requires_values() {
        let builder = UpdateQueryBuilder::<MySqlDialect>::new("carts");

        let err = builder.build_query_string().unwrap_err();
        assert_eq!(err.to_string(), "Builder error: UPDATE must have at least one SET value");
    }

    #[test]
    fn test_delete() {
        let builder = DeleteQueryBuilder::<MySqlDialect>::new("carts");
        assert_eq!(builder.build_query_string().unwrap(), "DELETE FROM `carts`");

        let mut builder = DeleteQueryBuilder::<MySqlDialect>::new("carts");
        let mut chain = ChainBuilder::<MySqlDialect>::or();
        chain.set_column_equals("carts", "cart_id", json!(1), None);
        chain.set_column_equals("carts", "cart_id", json!(2), None);
        builder.set_where_from_query_builder(Box::new(chain));

        let (sql, values) = builder.build().unwrap();
        assert_eq!(
            sql,
            "DELETE FROM `carts` WHERE `carts`.`cart_id` = ? OR `carts`.`cart_id` = ?"
        );
        assert_eq!(values, vec![json!(1), json!(2)]);
    }
}
