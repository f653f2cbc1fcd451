use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Logical operators for combining conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOp::And => write!(f, "AND"),
            LogicalOp::Or => write!(f, "OR"),
        }
    }
}

/// Backend independent filter tree.
///
/// Leaves reference entity properties, never columns; every backend
/// resolves the property through the entity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Where {
    Equals { property: String, value: Value },
    In { property: String, values: Vec<Value> },
    /// Inclusive range
    Between { property: String, start: Value, end: Value },
    After { property: String, value: Value },
    Before { property: String, value: Value },
    And(Vec<Where>),
    Or(Vec<Where>),
}

impl Where {
    pub fn property_equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::Equals {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn property_in(property: impl Into<String>, values: Vec<Value>) -> Self {
        Where::In {
            property: property.into(),
            values,
        }
    }

    pub fn property_between(
        property: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        Where::Between {
            property: property.into(),
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn property_after(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::After {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn property_before(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Where::Before {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn and(conditions: Vec<Where>) -> Self {
        Where::And(conditions)
    }

    pub fn or(conditions: Vec<Where>) -> Self {
        Where::Or(conditions)
    }

    /// Combines with another condition using AND, extending an existing AND group
    pub fn and_where(self, condition: Where) -> Self {
        match self {
            Where::And(mut conditions) => {
                conditions.push(condition);
                Where::And(conditions)
            }
            existing => Where::And(vec![existing, condition]),
        }
    }

    /// Combines with another condition using OR, extending an existing OR group
    pub fn or_where(self, condition: Where) -> Self {
        match self {
            Where::Or(mut conditions) => {
                conditions.push(condition);
                Where::Or(conditions)
            }
            existing => Where::Or(vec![existing, condition]),
        }
    }

    /// Property referenced by a leaf node
    pub fn property(&self) -> Option<&str> {
        match self {
            Where::Equals { property, .. }
            | Where::In { property, .. }
            | Where::Between { property, .. }
            | Where::After { property, .. }
            | Where::Before { property, .. } => Some(property),
            Where::And(_) | Where::Or(_) => None,
        }
    }
}
