//! Formula builders: nested SQL expressions that are projected as columns
//! or spliced into statements.

use super::dialect::{ColumnCast, SqlDialect};
use super::{value_factory, QueryBuilder, QueryValueFactory};
use crate::error::{PersisterError, Result};
use crate::metadata::{resolve_temporal_type, EntityField, TemporalProperty, TemporalType};
use crate::sort::timestamp_instant;
use chrono::SecondsFormat;
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;

/// Raw SQL formula without parameters, e.g. `COUNT(*)`
#[derive(Debug, Clone)]
pub struct FormulaBuilder {
    formula: String,
}

impl FormulaBuilder {
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
        }
    }
}

impl QueryBuilder for FormulaBuilder {
    fn build_fragment(&self) -> Result<String> {
        Ok(self.formula.clone())
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        Ok(Vec::new())
    }
}

/// Generates formulas like `f(formula)`
pub struct FunctionBuilder {
    name: String,
    builder: Option<Box<dyn QueryBuilder>>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builder: None,
        }
    }

    pub fn create(name: impl Into<String>, builder: Box<dyn QueryBuilder>) -> Self {
        let mut function = Self::new(name);
        function.set_formula_from_query_builder(builder);
        function
    }

    pub fn set_formula_from_query_builder(&mut self, builder: Box<dyn QueryBuilder>) {
        self.builder = Some(builder);
    }

    fn inner(&self, what: &str) -> Result<&dyn QueryBuilder> {
        self.builder.as_deref().ok_or_else(|| {
            PersisterError::Builder(format!(
                "Could not build {}() query {}: Query builder not initialized",
                self.name, what
            ))
        })
    }
}

impl QueryBuilder for FunctionBuilder {
    fn build_fragment(&self) -> Result<String> {
        Ok(format!(
            "{}({})",
            self.name,
            self.inner("string")?.build_fragment()?
        ))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.inner("factories")?.get_query_value_factories()
    }
}

/// Generates formulas like `formula->0`
pub struct JsonIndexBuilder {
    builder: Box<dyn QueryBuilder>,
    index: usize,
}

impl JsonIndexBuilder {
    pub fn new(builder: Box<dyn QueryBuilder>, index: usize) -> Self {
        Self { builder, index }
    }
}

impl QueryBuilder for JsonIndexBuilder {
    fn build_fragment(&self) -> Result<String> {
        Ok(format!("{}->{}", self.builder.build_fragment()?, self.index))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.builder.get_query_value_factories()
    }
}

/// Columns of an entity to project, one per distinct column name, with the
/// cast implied by the field's temporal type
pub(crate) fn entity_columns<'a>(
    fields: &'a [EntityField],
    temporal_properties: &[TemporalProperty],
) -> Vec<(&'a EntityField, ColumnCast)> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .filter(|field| seen.insert(field.column_name.as_str()))
        .map(|field| {
            let cast = ColumnCast::from_temporal(resolve_temporal_type(field, temporal_properties));
            (field, cast)
        })
        .collect()
}

/// Generates `JSON_OBJECT('column', table.column, ...)` for every column of
/// an entity; keys are column names
#[derive(Debug)]
pub struct JsonObjectBuilder<D> {
    entries: Vec<(String, String)>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> JsonObjectBuilder<D> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            _dialect: PhantomData,
        }
    }

    pub fn create(
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) -> Self {
        let mut builder = Self::new();
        builder.set_entity_fields_from_table(table_name, fields, temporal_properties);
        builder
    }

    pub fn set_entity_fields_from_table(
        &mut self,
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) {
        for (field, cast) in entity_columns(fields, temporal_properties) {
            let column = D::quote_table_and_column(table_name, &field.column_name);
            self.entries
                .push((field.column_name.clone(), D::cast_column(&column, cast)));
        }
    }
}

impl<D: SqlDialect> Default for JsonObjectBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDialect> QueryBuilder for JsonObjectBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        let entries = self
            .entries
            .iter()
            .map(|(key, expression)| format!("{}, {}", D::quote_literal(key), expression))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("{}({})", D::json_object_function(), entries))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        Ok(Vec::new())
    }
}

/// One rendered parameter site; null values are written as `NULL`
#[derive(Debug, Clone)]
pub(crate) struct Parameter {
    sql: String,
    value: Option<Value>,
}

impl Parameter {
    pub(crate) fn new<D: SqlDialect>(value: Value, temporal_type: Option<TemporalType>) -> Self {
        if value.is_null() {
            return Self {
                sql: "NULL".to_string(),
                value: None,
            };
        }
        match temporal_type {
            Some(temporal_type) => Self {
                sql: D::temporal_value_placeholder(temporal_type),
                value: Some(normalize_temporal_value(value, temporal_type)),
            },
            None => Self {
                sql: D::value_placeholder().to_string(),
                value: Some(value),
            },
        }
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn factory(&self) -> Option<QueryValueFactory> {
        self.value.clone().map(value_factory)
    }
}

/// Normalizes timestamps to `YYYY-MM-DDTHH:MM:SS.sssZ` in UTC. Numbers are
/// taken as Unix milliseconds; anything unparseable is passed through.
pub(crate) fn normalize_temporal_value(value: Value, temporal_type: TemporalType) -> Value {
    if temporal_type != TemporalType::Timestamp {
        return value;
    }
    match timestamp_instant(&value) {
        Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => value,
    }
}

/// Generates `?, ?, ?` for a list of three parameters
#[derive(Debug)]
pub struct ParameterListBuilder<D> {
    values: Option<Vec<Value>>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> ParameterListBuilder<D> {
    pub fn new() -> Self {
        Self {
            values: None,
            _dialect: PhantomData,
        }
    }

    pub fn create(values: Vec<Value>) -> Self {
        let mut builder = Self::new();
        builder.set_params(values);
        builder
    }

    pub fn set_params(&mut self, values: Vec<Value>) {
        self.values = Some(values);
    }

    fn values(&self) -> Result<&[Value]> {
        self.values
            .as_deref()
            .ok_or_else(|| PersisterError::Builder("Parameter list was not initialized".to_string()))
    }
}

impl<D: SqlDialect> Default for ParameterListBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDialect> QueryBuilder for ParameterListBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        Ok(self
            .values()?
            .iter()
            .map(|_| D::value_placeholder())
            .collect::<Vec<_>>()
            .join(", "))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        Ok(self.values()?.iter().cloned().map(value_factory).collect())
    }
}

/// One parenthesized row of values, e.g. `(?, ?, NULL)`
#[derive(Debug)]
pub struct ValueListBuilder<D> {
    parameters: Vec<Parameter>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> ValueListBuilder<D> {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
            _dialect: PhantomData,
        }
    }

    pub fn set_param(&mut self, value: Value) {
        self.parameters.push(Parameter::new::<D>(value, None));
    }

    /// Adds a value for a temporal column, normalizing timestamp strings
    pub fn set_param_as_temporal(&mut self, value: Value, temporal_type: TemporalType) {
        self.parameters
            .push(Parameter::new::<D>(value, Some(temporal_type)));
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl<D: SqlDialect> Default for ValueListBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDialect> QueryBuilder for ValueListBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        if self.parameters.is_empty() {
            return Err(PersisterError::Builder("Value list is empty".to_string()));
        }
        Ok(format!(
            "({})",
            self.parameters
                .iter()
                .map(Parameter::sql)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        Ok(self.parameters.iter().filter_map(Parameter::factory).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{MySqlDialect, PgDialect};
    use serde_json::json;

    #[test]
    fn test_function_builder_requires_inner() {
        let function = FunctionBuilder::new("json_agg");

        let err = function.build_query_string().unwrap_err();
        assert!(matches!(err, PersisterError::Builder(_)));
        assert!(err.to_string().contains("json_agg()"));
    }

    #[test]
    fn test_json_object_with_temporal_cast() {
        let fields = vec![
            EntityField::new("id", "cart_id"),
            EntityField::new("createdAt", "created_at"),
        ];
        let temporal = vec![TemporalProperty::new("createdAt", TemporalType::Date)];

        let builder = JsonObjectBuilder::<MySqlDialect>::create("carts", &fields, &temporal);

        assert_eq!(
            builder.build_query_string().unwrap(),
            "JSON_OBJECT('cart_id', `carts`.`cart_id`, 'created_at', DATE_FORMAT(`carts`.`created_at`, '%Y-%m-%d'))"
        );
    }

    #[test]
    fn test_pg_many_to_one_formula() {
        let fields = vec![EntityField::new("id", "cart_id")];
        let object = JsonObjectBuilder::<PgDialect>::create("carts", &fields, &[]);

        let formula = PgDialect::many_to_one_formula(Box::new(object));

        assert_eq!(
            formula.build_query_string().unwrap(),
            "json_agg(json_build_object('cart_id', \"carts\".\"cart_id\"))->0"
        );
    }

    #[test]
    fn test_parameter_list() {
        let builder = ParameterListBuilder::<PgDialect>::create(vec![json!(1), json!(2), json!(3)]);

        assert_eq!(builder.build_query_string().unwrap(), "$#, $#, $#");
        assert_eq!(builder.build_query_values().unwrap(), vec![json!(1), json!(2), json!(3)]);
        assert!(ParameterListBuilder::<PgDialect>::new().build_query_string().is_err());
    }

    #[test]
    fn test_value_list_with_null_and_timestamp() {
        let mut builder = ValueListBuilder::<MySqlDialect>::new();
        builder.set_param(json!("c1"));
        builder.set_param(json!(null));
        builder.set_param_as_temporal(json!("2023-05-01T12:00:00+02:00"), TemporalType::Timestamp);

        assert_eq!(
            builder.build_query_string().unwrap(),
            "(?, NULL, STR_TO_DATE(?, '%Y-%m-%dT%H:%i:%s.%fZ'))"
        );
        assert_eq!(
            builder.build_query_values().unwrap(),
            vec![json!("c1"), json!("2023-05-01T10:00:00.000Z")]
        );
    }

    #[test]
    fn test_normalize_temporal_value() {
        assert_eq!(
            normalize_temporal_value(json!(0), TemporalType::Timestamp),
            json!("1970-01-01T00:00:00.000Z")
        );
        assert_eq!(
            normalize_temporal_value(json!("not a date"), TemporalType::Timestamp),
            json!("not a date")
        );
        assert_eq!(
            normalize_temporal_value(json!("2023-05-01"), TemporalType::Date),
            json!("2023-05-01")
        );
    }
}
