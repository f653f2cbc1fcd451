//! Boolean chains compiled from a [`Where`] tree
//!
//! A chain joins its parts with a single logical operator. Nested groups are
//! spliced in parentheses, so operator precedence never depends on the
//! surrounding statement.

use super::dialect::SqlDialect;
use super::formula::Parameter;
use super::{collect_factories, QueryBuilder, QueryValueFactory};
use crate::error::{PersisterError, Result};
use crate::metadata::{resolve_temporal_type, EntityField, TemporalProperty, TemporalType};
use crate::predicate::{LogicalOp, Where};
use serde_json::Value;
use std::marker::PhantomData;

/// A single comparison with its parameters, e.g. `t.c BETWEEN ? AND ?`
struct Condition {
    template: Vec<String>,
    parameters: Vec<Parameter>,
}

impl QueryBuilder for Condition {
    fn build_fragment(&self) -> Result<String> {
        let mut sql = String::new();
        for (index, piece) in self.template.iter().enumerate() {
            sql.push_str(piece);
            if let Some(parameter) = self.parameters.get(index) {
                sql.push_str(parameter.sql());
            }
        }
        Ok(sql)
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        Ok(self.parameters.iter().filter_map(Parameter::factory).collect())
    }
}

/// Nested chain, always parenthesized
struct Group(Box<dyn QueryBuilder>);

impl QueryBuilder for Group {
    fn build_fragment(&self) -> Result<String> {
        Ok(format!("({})", self.0.build_fragment()?))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.0.get_query_value_factories()
    }
}

/// AND/OR chain builder
pub struct ChainBuilder<D> {
    operator: LogicalOp,
    parts: Vec<Box<dyn QueryBuilder>>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> ChainBuilder<D> {
    pub fn new(operator: LogicalOp) -> Self {
        Self {
            operator,
            parts: Vec::new(),
            _dialect: PhantomData,
        }
    }

    pub fn and() -> Self {
        Self::new(LogicalOp::And)
    }

    pub fn or() -> Self {
        Self::new(LogicalOp::Or)
    }

    pub fn operator(&self) -> LogicalOp {
        self.operator
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn push_condition(&mut self, template: Vec<String>, parameters: Vec<Parameter>) {
        self.parts.push(Box::new(Condition {
            template,
            parameters,
        }));
    }

    /// `t.c = ?`, or `t.c IS NULL` for a null value
    pub fn set_column_equals(
        &mut self,
        table_name: &str,
        column_name: &str,
        value: Value,
        temporal_type: Option<TemporalType>,
    ) {
        let column = D::quote_table_and_column(table_name, column_name);
        if value.is_null() {
            self.push_condition(vec![format!("{} IS NULL", column)], Vec::new());
        } else {
            self.push_condition(
                vec![format!("{} = ", column)],
                vec![Parameter::new::<D>(value, temporal_type)],
            );
        }
    }

    /// `t.c IN (?, ?)`; an empty list matches nothing
    pub fn set_column_in(
        &mut self,
        table_name: &str,
        column_name: &str,
        values: Vec<Value>,
        temporal_type: Option<TemporalType>,
    ) {
        if values.is_empty() {
            self.push_condition(vec!["FALSE".to_string()], Vec::new());
            return;
        }
        let column = D::quote_table_and_column(table_name, column_name);
        let mut template = vec![format!("{} IN (", column)];
        template.extend((1..values.len()).map(|_| ", ".to_string()));
        template.push(")".to_string());
        let parameters = values
            .into_iter()
            .map(|value| Parameter::new::<D>(value, temporal_type))
            .collect();
        self.push_condition(template, parameters);
    }

    /// `t.c BETWEEN ? AND ?`, bounds included
    pub fn set_column_between(
        &mut self,
        table_name: &str,
        column_name: &str,
        start: Value,
        end: Value,
        temporal_type: Option<TemporalType>,
    ) {
        let column = D::quote_table_and_column(table_name, column_name);
        self.push_condition(
            vec![format!("{} BETWEEN ", column), " AND ".to_string()],
            vec![
                Parameter::new::<D>(start, temporal_type),
                Parameter::new::<D>(end, temporal_type),
            ],
        );
    }

    pub fn set_column_after(
        &mut self,
        table_name: &str,
        column_name: &str,
        value: Value,
        temporal_type: Option<TemporalType>,
    ) {
        let column = D::quote_table_and_column(table_name, column_name);
        self.push_condition(
            vec![format!("{} > ", column)],
            vec![Parameter::new::<D>(value, temporal_type)],
        );
    }

    pub fn set_column_before(
        &mut self,
        table_name: &str,
        column_name: &str,
        value: Value,
        temporal_type: Option<TemporalType>,
    ) {
        let column = D::quote_table_and_column(table_name, column_name);
        self.push_condition(
            vec![format!("{} < ", column)],
            vec![Parameter::new::<D>(value, temporal_type)],
        );
    }

    /// Splices another boolean builder in parentheses
    pub fn set_from_query_builder(&mut self, builder: Box<dyn QueryBuilder>) {
        self.parts.push(Box::new(Group(builder)));
    }

    /// Compiles a filter tree against the fields of `table_name`.
    ///
    /// A leaf at the root yields a one-condition AND chain.
    pub fn from_where(
        filter: &Where,
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) -> Result<Self> {
        let (operator, conditions) = match filter {
            Where::And(conditions) => (LogicalOp::And, conditions.as_slice()),
            Where::Or(conditions) => (LogicalOp::Or, conditions.as_slice()),
            leaf => (LogicalOp::And, std::slice::from_ref(leaf)),
        };

        let mut chain = Self::new(operator);
        for condition in conditions {
            chain.add_where(condition, table_name, fields, temporal_properties)?;
        }
        Ok(chain)
    }

    fn add_where(
        &mut self,
        filter: &Where,
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) -> Result<()> {
        if let Where::And(_) | Where::Or(_) = filter {
            let nested = Self::from_where(filter, table_name, fields, temporal_properties)?;
            self.set_from_query_builder(Box::new(nested));
            return Ok(());
        }

        let property = filter.property().unwrap_or_default();
        let field = fields
            .iter()
            .find(|field| field.property_name == property)
            .ok_or_else(|| {
                PersisterError::Metadata(format!(
                    "Could not find field for property \"{}\" in table \"{}\"",
                    property, table_name
                ))
            })?;
        let column = field.column_name.as_str();
        let temporal_type = resolve_temporal_type(field, temporal_properties);

        match filter {
            Where::Equals { value, .. } => {
                self.set_column_equals(table_name, column, value.clone(), temporal_type)
            }
            Where::In { values, .. } => {
                self.set_column_in(table_name, column, values.clone(), temporal_type)
            }
            Where::Between { start, end, .. } => self.set_column_between(
                table_name,
                column,
                start.clone(),
                end.clone(),
                temporal_type,
            ),
            Where::After { value, .. } => {
                self.set_column_after(table_name, column, value.clone(), temporal_type)
            }
            Where::Before { value, .. } => {
                self.set_column_before(table_name, column, value.clone(), temporal_type)
            }
            Where::And(_) | Where::Or(_) => {}
        }
        Ok(())
    }
}

impl<D: SqlDialect> QueryBuilder for ChainBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        if self.parts.is_empty() {
            return Ok(match self.operator {
                LogicalOp::And => "TRUE",
                LogicalOp::Or => "FALSE",
            }
            .to_string());
        }
        let separator = format!(" {} ", self.operator);
        Ok(self
            .parts
            .iter()
            .map(|part| part.build_fragment())
            .collect::<Result<Vec<_>>>()?
            .join(&separator))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        collect_factories(self.parts.iter().map(|part| part.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{MySqlDialect, PgDialect};
    use serde_json::json;

    fn fields() -> Vec<EntityField> {
        vec![
            EntityField::new("id", "cart_id"),
            EntityField::new("name", "cart_name"),
            EntityField::new("createdAt", "created_at").with_definition("TIMESTAMP"),
        ]
    }

    #[test]
    fn test_nested_groups() {
        let filter = Where::and(vec![
            Where::property_equals("name", "weekly"),
            Where::or(vec![
                Where::property_in("id", vec![json!("a"), json!("b")]),
                Where::property_equals("name", json!(null)),
            ]),
        ]);

        let chain = ChainBuilder::<MySqlDialect>::from_where(&filter, "carts", &fields(), &[]).unwrap();

        assert_eq!(
            chain.build_query_string().unwrap(),
            "`carts`.`cart_name` = ? AND (`carts`.`cart_id` IN (?, ?) OR `carts`.`cart_name` IS NULL)"
        );
        assert_eq!(
            chain.build_query_values().unwrap(),
            vec![json!("weekly"), json!("a"), json!("b")]
        );
    }

    #[test]
    fn test_between_with_temporal_column() {
        let filter = Where::property_between("createdAt", "2023-01-01T00:00:00Z", "2023-02-01T00:00:00Z");

        let chain = ChainBuilder::<PgDialect>::from_where(&filter, "carts", &fields(), &[]).unwrap();

        assert_eq!(
            chain.build_query_string().unwrap(),
            "\"carts\".\"created_at\" BETWEEN $#::timestamptz AND $#::timestamptz"
        );
        assert_eq!(
            chain.build_query_values().unwrap(),
            vec![json!("2023-01-01T00:00:00.000Z"), json!("2023-02-01T00:00:00.000Z")]
        );
    }

    #[test]
    fn test_after_and_before() {
        let filter = Where::and(vec![
            Where::property_after("id", 1),
            Where::property_before("id", 10),
        ]);

        let chain = ChainBuilder::<MySqlDialect>::from_where(&filter, "carts", &fields(), &[]).unwrap();

        assert_eq!(
            chain.build_query_string().unwrap(),
            "`carts`.`cart_id` > ? AND `carts`.`cart_id` < ?"
        );
    }

    #[test]
    fn test_empty_groups() {
        let and = ChainBuilder::<MySqlDialect>::from_where(&Where::and(vec![]), "carts", &fields(), &[]).unwrap();
        let or = ChainBuilder::<MySqlDialect>::from_where(&Where::or(vec![]), "carts", &fields(), &[]).unwrap();
        let empty_in = ChainBuilder::<MySqlDialect>::from_where(
            &Where::property_in("id", vec![]),
            "carts",
            &fields(),
            &[],
        )
        .unwrap();

        assert_eq!(and.build_query_string().unwrap(), "TRUE");
        assert_eq!(or.build_query_string().unwrap(), "FALSE");
        assert_eq!(empty_in.build_query_string().unwrap(), "FALSE");
        assert!(empty_in.build_query_values().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_property() {
        let filter = Where::property_equals("weight", 3);

        let err = ChainBuilder::<MySqlDialect>::from_where(&filter, "carts", &fields(), &[])
            .err()
            .unwrap();

        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Metadata error: Could not find field for property \"weight\" in table \"carts\""
        );
    }
}
