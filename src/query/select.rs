use super::dialect::{ColumnCast, SqlDialect};
use super::formula::FormulaBuilder;
use super::{collect_factories, QueryBuilder, QueryValueFactory};
use crate::error::{PersisterError, Result};
use crate::metadata::EntityField;
use crate::sort::{Sort, SortDirection};
use std::marker::PhantomData;

enum Projection {
    AllColumns {
        table: String,
    },
    Column {
        table: String,
        column: String,
        cast: ColumnCast,
    },
    Formula {
        builder: Box<dyn QueryBuilder>,
        alias: String,
    },
}

struct Join {
    from_table: String,
    from_column: String,
    source_table: String,
    source_column: String,
}

struct OrderBy {
    table: String,
    column: String,
    direction: SortDirection,
}

/// SELECT query builder
///
/// Table names are given without the table prefix; the prefix is applied
/// to every table reference when the query is rendered.
pub struct SelectQueryBuilder<D> {
    table_prefix: String,
    from_table: Option<String>,
    projections: Vec<Projection>,
    joins: Vec<Join>,
    group_by: Option<String>,
    where_builder: Option<Box<dyn QueryBuilder>>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    _dialect: PhantomData<D>,
}

impl<D: SqlDialect> SelectQueryBuilder<D> {
    pub fn new() -> Self {
        Self {
            table_prefix: String::new(),
            from_table: None,
            projections: Vec::new(),
            joins: Vec::new(),
            group_by: None,
            where_builder: None,
            order_by: Vec::new(),
            limit: None,
            _dialect: PhantomData,
        }
    }

    pub fn set_table_prefix(&mut self, prefix: impl Into<String>) {
        self.table_prefix = prefix.into();
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    /// Table name with the prefix applied
    pub fn complete_table_name(&self, table_name: &str) -> String {
        format!("{}{}", self.table_prefix, table_name)
    }

    pub fn set_from_table(&mut self, table_name: impl Into<String>) {
        self.from_table = Some(table_name.into());
    }

    pub fn short_from_table(&self) -> Result<&str> {
        self.from_table.as_deref().ok_or_else(|| {
            PersisterError::Builder("Could not build query: from table not set".to_string())
        })
    }

    pub fn complete_from_table(&self) -> Result<String> {
        Ok(self.complete_table_name(self.short_from_table()?))
    }

    pub fn include_all_columns_from_table(&mut self, table_name: impl Into<String>) {
        self.projections.push(Projection::AllColumns {
            table: table_name.into(),
        });
    }

    /// Projects `table.column`; a cast column keeps the column name as alias
    pub fn include_column_with_cast(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        cast: ColumnCast,
    ) {
        self.projections.push(Projection::Column {
            table: table_name.into(),
            column: column_name.into(),
            cast,
        });
    }

    pub fn include_column(&mut self, table_name: impl Into<String>, column_name: impl Into<String>) {
        self.include_column_with_cast(table_name, column_name, ColumnCast::None);
    }

    pub fn include_column_as_text(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) {
        self.include_column_with_cast(table_name, column_name, ColumnCast::Text);
    }

    pub fn include_column_as_date(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) {
        self.include_column_with_cast(table_name, column_name, ColumnCast::Date);
    }

    pub fn include_column_as_time(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) {
        self.include_column_with_cast(table_name, column_name, ColumnCast::Time);
    }

    pub fn include_column_as_timestamp(
        &mut self,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) {
        self.include_column_with_cast(table_name, column_name, ColumnCast::Timestamp);
    }

    /// Projects a formula under `alias`
    pub fn include_column_from_query_builder(
        &mut self,
        builder: Box<dyn QueryBuilder>,
        alias: impl Into<String>,
    ) {
        self.projections.push(Projection::Formula {
            builder,
            alias: alias.into(),
        });
    }

    pub fn include_formula_by_string(&mut self, formula: impl Into<String>, alias: impl Into<String>) {
        self.include_column_from_query_builder(Box::new(FormulaBuilder::new(formula)), alias);
    }

    /// Adds `LEFT JOIN from_table ON from_table.from_column = source_table.source_column`
    pub fn left_join_table(
        &mut self,
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        source_table: impl Into<String>,
        source_column: impl Into<String>,
    ) {
        self.joins.push(Join {
            from_table: from_table.into(),
            from_column: from_column.into(),
            source_table: source_table.into(),
            source_column: source_column.into(),
        });
    }

    /// Groups by a column of the from table
    pub fn set_group_by_column(&mut self, column_name: impl Into<String>) {
        self.group_by = Some(column_name.into());
    }

    pub fn group_by_column(&self) -> Result<&str> {
        self.group_by.as_deref().ok_or_else(|| {
            PersisterError::Builder("Could not resolve group by column: not set".to_string())
        })
    }

    pub fn set_where_from_query_builder(&mut self, builder: Box<dyn QueryBuilder>) {
        self.where_builder = Some(builder);
    }

    /// Translates a sort into ORDER BY keys on the columns of `table_name`
    pub fn set_order_by_table_fields(
        &mut self,
        sort: &Sort,
        table_name: &str,
        fields: &[EntityField],
    ) -> Result<()> {
        let mut order_by = Vec::with_capacity(sort.orders().len());
        for order in sort.orders() {
            let field = fields
                .iter()
                .find(|field| field.property_name == order.property_name)
                .ok_or_else(|| {
                    PersisterError::Metadata(format!(
                        "Could not find field for sort property \"{}\" in table \"{}\"",
                        order.property_name, table_name
                    ))
                })?;
            order_by.push(OrderBy {
                table: table_name.to_string(),
                column: field.column_name.clone(),
                direction: order.direction,
            });
        }
        self.order_by = order_by;
        Ok(())
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = Some(limit);
    }

    fn quote_column(&self, table_name: &str, column_name: &str) -> String {
        D::quote_table_and_column(&self.complete_table_name(table_name), column_name)
    }

    fn build_projection(&self, projection: &Projection) -> Result<String> {
        Ok(match projection {
            Projection::AllColumns { table } => {
                format!("{}.*", D::quote_identifier(&self.complete_table_name(table)))
            }
            Projection::Column {
                table,
                column,
                cast: ColumnCast::None,
            } => self.quote_column(table, column),
            Projection::Column {
                table,
                column,
                cast,
            } => format!(
                "{} AS {}",
                D::cast_column(&self.quote_column(table, column), *cast),
                D::quote_identifier(column)
            ),
            Projection::Formula { builder, alias } => format!(
                "{} AS {}",
                builder.build_fragment()?,
                D::quote_identifier(alias)
            ),
        })
    }
}

impl<D: SqlDialect> Default for SelectQueryBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: SqlDialect> QueryBuilder for SelectQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        let from_table = self.short_from_table()?;

        let mut sql = String::from("SELECT ");
        if self.projections.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(
                &self
                    .projections
                    .iter()
                    .map(|projection| self.build_projection(projection))
                    .collect::<Result<Vec<_>>>()?
                    .join(", "),
            );
        }
        sql.push_str(&format!(
            " FROM {}",
            D::quote_identifier(&self.complete_table_name(from_table))
        ));

        for join in &self.joins {
            sql.push_str(&format!(
                " LEFT JOIN {} ON {} = {}",
                D::quote_identifier(&self.complete_table_name(&join.from_table)),
                self.quote_column(&join.from_table, &join.from_column),
                self.quote_column(&join.source_table, &join.source_column)
            ));
        }

        if let Some(where_builder) = &self.where_builder {
            sql.push_str(" WHERE ");
            sql.push_str(&where_builder.build_fragment()?);
        }

        if let Some(group_by) = &self.group_by {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.quote_column(from_table, group_by));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &self
                    .order_by
                    .iter()
                    .map(|order| match order.direction {
                        SortDirection::Asc => self.quote_column(&order.table, &order.column),
                        SortDirection::Desc => {
                            format!("{} DESC", self.quote_column(&order.table, &order.column))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(sql)
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        let formulas = self.projections.iter().filter_map(|projection| match projection {
            Projection::Formula { builder, .. } => Some(builder.as_ref()),
            _ => None,
        });
        collect_factories(formulas.chain(self.where_builder.as_deref()))
    }

    fn build_query_string(&self) -> Result<String> {
        Ok(D::finalize_query(&self.build_fragment()?))
    }
}
