//! SQL dialects
//!
//! The builders are written once against [`SqlDialect`]; a dialect only
//! supplies the tokens that differ between databases: identifier quoting,
//! the value placeholder, column casts and the JSON aggregation functions.

use super::formula::{FunctionBuilder, JsonIndexBuilder};
use super::QueryBuilder;
use crate::metadata::TemporalType;
use std::fmt;

/// Conversion applied to a projected column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnCast {
    None,
    Text,
    Date,
    Time,
    Timestamp,
}

impl ColumnCast {
    pub fn from_temporal(temporal_type: Option<TemporalType>) -> Self {
        match temporal_type {
            Some(TemporalType::Date) => ColumnCast::Date,
            Some(TemporalType::Time) => ColumnCast::Time,
            Some(TemporalType::Timestamp) => ColumnCast::Timestamp,
            None => ColumnCast::None,
        }
    }
}

pub trait SqlDialect: fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;

    fn quote_identifier(name: &str) -> String;

    fn quote_table_and_column(table_name: &str, column_name: &str) -> String {
        format!(
            "{}.{}",
            Self::quote_identifier(table_name),
            Self::quote_identifier(column_name)
        )
    }

    fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Placeholder used while the statement is being assembled
    fn value_placeholder() -> &'static str;

    /// Placeholder for a value written to or compared with a temporal column
    fn temporal_value_placeholder(temporal_type: TemporalType) -> String;

    fn cast_column(expression: &str, cast: ColumnCast) -> String;

    fn json_object_function() -> &'static str;

    fn json_array_agg_function() -> &'static str;

    /// Wraps a single-row JSON object formula for use in a grouped query
    fn many_to_one_formula(object: Box<dyn QueryBuilder>) -> Box<dyn QueryBuilder>;

    /// Whether `INSERT ... RETURNING` is available
    fn supports_returning() -> bool;

    /// Final rewrite of a complete statement before it is handed to the driver
    fn finalize_query(query: &str) -> String {
        query.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    const NAME: &'static str = "MySQL";

    fn quote_identifier(name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn value_placeholder() -> &'static str {
        "?"
    }

    fn temporal_value_placeholder(temporal_type: TemporalType) -> String {
        match temporal_type {
            TemporalType::Timestamp => "STR_TO_DATE(?, '%Y-%m-%dT%H:%i:%s.%fZ')".to_string(),
            TemporalType::Date | TemporalType::Time => "?".to_string(),
        }
    }

    fn cast_column(expression: &str, cast: ColumnCast) -> String {
        match cast {
            ColumnCast::None => expression.to_string(),
            ColumnCast::Text => format!("CAST({} AS CHAR)", expression),
            ColumnCast::Date => format!("DATE_FORMAT({}, '%Y-%m-%d')", expression),
            ColumnCast::Time => format!("TIME_FORMAT({}, '%H:%i:%s')", expression),
            ColumnCast::Timestamp => format!(
                "FROM_UNIXTIME(UNIX_TIMESTAMP({}), '%Y-%m-%dT%H:%i:%s.000Z')",
                expression
            ),
        }
    }

    fn json_object_function() -> &'static str {
        "JSON_OBJECT"
    }

    fn json_array_agg_function() -> &'static str {
        "JSON_ARRAYAGG"
    }

    fn many_to_one_formula(object: Box<dyn QueryBuilder>) -> Box<dyn QueryBuilder> {
        object
    }

    fn supports_returning() -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PgDialect;

impl PgDialect {
    /// Sentinel rewritten to `$1`, `$2`, ... by [`parametize_query`]
    pub const PLACEHOLDER: &'static str = "$#";
}

impl SqlDialect for PgDialect {
    const NAME: &'static str = "PostgreSQL";

    fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn value_placeholder() -> &'static str {
        PgDialect::PLACEHOLDER
    }

    fn temporal_value_placeholder(temporal_type: TemporalType) -> String {
        match temporal_type {
            TemporalType::Timestamp => format!("{}::timestamptz", PgDialect::PLACEHOLDER),
            TemporalType::Date => format!("{}::date", PgDialect::PLACEHOLDER),
            TemporalType::Time => format!("{}::time", PgDialect::PLACEHOLDER),
        }
    }

    fn cast_column(expression: &str, cast: ColumnCast) -> String {
        match cast {
            ColumnCast::None => expression.to_string(),
            ColumnCast::Text => format!("{}::text", expression),
            ColumnCast::Date => format!("to_char({}, 'YYYY-MM-DD')", expression),
            ColumnCast::Time => format!("to_char({}, 'HH24:MI:SS')", expression),
            ColumnCast::Timestamp => format!(
                "to_char({}, 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')",
                expression
            ),
        }
    }

    fn json_object_function() -> &'static str {
        "json_build_object"
    }

    fn json_array_agg_function() -> &'static str {
        "json_agg"
    }

    /// PostgreSQL has no aggregate returning a single JSON object, so the
    /// first element of a one-row `json_agg` is used
    fn many_to_one_formula(object: Box<dyn QueryBuilder>) -> Box<dyn QueryBuilder> {
        Box::new(JsonIndexBuilder::new(
            Box::new(FunctionBuilder::create(
                Self::json_array_agg_function(),
                object,
            )),
            0,
        ))
    }

    fn supports_returning() -> bool {
        true
    }

    fn finalize_query(query: &str) -> String {
        parametize_query(query)
    }
}

/// Converts every `$#` placeholder to `$N`, numbering from 1 left to right.
///
/// Quoted literals and identifiers are copied untouched, so a `$#` inside
/// them is not a parameter.
pub fn parametize_query(query: &str) -> String {
    let mut output = String::with_capacity(query.len() + 8);
    let mut index = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                output.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    output.push(c);
                }
                '$' if chars.peek() == Some(&'#') => {
                    chars.next();
                    index += 1;
                    output.push('$');
                    output.push_str(&index.to_string());
                }
                _ => output.push(c),
            },
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametize_query() {
        assert_eq!(
            parametize_query("SELECT * FROM t WHERE a = $# AND b IN ($#, $#)"),
            "SELECT * FROM t WHERE a = $1 AND b IN ($2, $3)"
        );
    }

    #[test]
    fn test_parametize_query_skips_quoted() {
        assert_eq!(
            parametize_query("SELECT '$#', \"$#\", 'it''s $#' FROM t WHERE a = $#"),
            "SELECT '$#', \"$#\", 'it''s $#' FROM t WHERE a = $1"
        );
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(MySqlDialect::quote_identifier("carts"), "`carts`");
        assert_eq!(MySqlDialect::quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(PgDialect::quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            PgDialect::quote_table_and_column("carts", "cart_id"),
            "\"carts\".\"cart_id\""
        );
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(PgDialect::quote_literal("o'neil"), "'o''neil'");
        assert_eq!(MySqlDialect::quote_literal("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn test_cast_column() {
        assert_eq!(
            MySqlDialect::cast_column("`t`.`c`", ColumnCast::Text),
            "CAST(`t`.`c` AS CHAR)"
        );
        assert_eq!(
            PgDialect::cast_column("\"t\".\"c\"", ColumnCast::Timestamp),
            "to_char(\"t\".\"c\", 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
        );
        assert_eq!(PgDialect::cast_column("x", ColumnCast::None), "x");
    }
}
