//! Parameterized SQL builders
//!
//! Every builder renders a fragment of SQL with the raw placeholder of its
//! dialect plus the values for those placeholders, in the same left-to-right
//! order. Builders compose: a formula or a chain can be embedded in another
//! builder, which concatenates fragments and value factories in rendering
//! order. Statement builders (`SELECT`, `INSERT`, `UPDATE`, `DELETE`) finalize
//! the placeholders of the whole tree in [`QueryBuilder::build_query_string`].

pub mod chain;
pub mod dialect;
pub mod dml;
pub mod entity;
pub mod formula;
pub mod insert;
pub mod select;

use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// Late-bound parameter value
pub type QueryValueFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Query string with its positional parameter values
pub type QueryBuildResult = (String, Vec<Value>);

pub trait QueryBuilder: Send + Sync {
    /// Renders this builder as a fragment embeddable in another builder
    fn build_fragment(&self) -> Result<String>;

    /// Value factories in placeholder order
    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>>;

    fn build_query_string(&self) -> Result<String> {
        self.build_fragment()
    }

    fn build_query_values(&self) -> Result<Vec<Value>> {
        Ok(self
            .get_query_value_factories()?
            .iter()
            .map(|factory| factory())
            .collect())
    }

    fn build(&self) -> Result<QueryBuildResult> {
        Ok((self.build_query_string()?, self.build_query_values()?))
    }
}

pub fn value_factory(value: Value) -> QueryValueFactory {
    Arc::new(move || value.clone())
}

pub(crate) fn collect_factories<'a, B>(
    builders: impl IntoIterator<Item = &'a B>,
) -> Result<Vec<QueryValueFactory>>
where
    B: QueryBuilder + ?Sized + 'a,
{
    let mut factories = Vec::new();
    for builder in builders {
        factories.extend(builder.get_query_value_factories()?);
    }
    Ok(factories)
}

pub use chain::ChainBuilder;
pub use dialect::{ColumnCast, MySqlDialect, PgDialect, SqlDialect};
pub use dml::{DeleteQueryBuilder, UpdateQueryBuilder};
pub use entity::{EntityInsertQueryBuilder, EntitySelectQueryBuilder, EntityUpdateQueryBuilder};
pub use formula::{
    FormulaBuilder, FunctionBuilder, JsonIndexBuilder, JsonObjectBuilder, ParameterListBuilder,
    ValueListBuilder,
};
pub use insert::InsertQueryBuilder;
pub use select::SelectQueryBuilder;
