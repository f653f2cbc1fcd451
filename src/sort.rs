use crate::entity::Entity;
use crate::error::{PersisterError, Result};
use crate::metadata::{EntityMetadata, TemporalType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub property_name: String,
    pub direction: SortDirection,
}

/// Ordered list of sort keys; the first entry is the primary key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<SortOrder>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(property_name: impl Into<String>, direction: SortDirection) -> Self {
        Self::new().then(property_name, direction)
    }

    pub fn asc(property_name: impl Into<String>) -> Self {
        Self::by(property_name, SortDirection::Asc)
    }

    pub fn desc(property_name: impl Into<String>) -> Self {
        Self::by(property_name, SortDirection::Desc)
    }

    /// Adds a tie-break key
    pub fn then(mut self, property_name: impl Into<String>, direction: SortDirection) -> Self {
        self.orders.push(SortOrder {
            property_name: property_name.into(),
            direction,
        });
        self
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Checks that every sort key is a property of the entity
    pub fn validate(&self, metadata: &EntityMetadata) -> Result<()> {
        match self
            .orders
            .iter()
            .find(|order| metadata.field(&order.property_name).is_none())
        {
            Some(order) => Err(PersisterError::Metadata(format!(
                "Could not find field for sort property \"{}\" in table \"{}\"",
                order.property_name,
                metadata.table_name()
            ))),
            None => Ok(()),
        }
    }

    /// Compares two entities of `metadata`; timestamp properties are
    /// ordered chronologically
    pub fn compare(&self, metadata: &EntityMetadata, a: &Entity, b: &Entity) -> Ordering {
        for order in &self.orders {
            let ordering = compare_values_as(
                a.get(&order.property_name),
                b.get(&order.property_name),
                metadata.temporal_type(&order.property_name),
            );
            let ordering = match order.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// Instant of a timestamp given as RFC3339 text or Unix milliseconds
pub(crate) fn timestamp_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Orders comparable values: numbers numerically, strings lexically,
/// booleans false first. Mixed or structured values are not comparable.
pub(crate) fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// [`partial_compare`], with two timestamps of a timestamp property
/// compared as instants
pub(crate) fn partial_compare_as(
    a: &Value,
    b: &Value,
    temporal_type: Option<TemporalType>,
) -> Option<Ordering> {
    if temporal_type == Some(TemporalType::Timestamp) {
        if let (Some(x), Some(y)) = (timestamp_instant(a), timestamp_instant(b)) {
            return Some(x.cmp(&y));
        }
    }
    partial_compare(a, b)
}

/// Total order for sorting; missing and null values sort first
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    partial_compare(a, b).unwrap_or_else(|| type_rank(a).cmp(&type_rank(b)))
}

/// Total order for a property of the given temporal type.
///
/// For timestamps, values that parse as instants sort after nulls and
/// before everything else; the rest keep [`compare_values`] order.
pub(crate) fn compare_values_as(
    a: Option<&Value>,
    b: Option<&Value>,
    temporal_type: Option<TemporalType>,
) -> Ordering {
    if temporal_type != Some(TemporalType::Timestamp) {
        return compare_values(a, b);
    }
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (timestamp_instant(a), timestamp_instant(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) if b.is_null() => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) if a.is_null() => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => compare_values(Some(a), Some(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
