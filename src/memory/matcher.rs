use crate::entity::{values_equal, Entity};
use crate::error::{PersisterError, Result};
use crate::metadata::{EntityMetadata, TemporalType};
use crate::predicate::Where;
use crate::sort::{partial_compare, timestamp_instant};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

/// A [`Where`] tree resolved against the metadata, ready to test entities
#[derive(Debug, Clone)]
pub enum Matcher {
    Leaf(Condition),
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
}

/// One property test; operands of timestamp properties carry their
/// parsed instant
#[derive(Debug, Clone)]
pub struct Condition {
    property: String,
    test: Test,
}

#[derive(Debug, Clone)]
enum Test {
    Equals(Operand),
    In(Vec<Operand>),
    Between(Operand, Operand),
    After(Operand),
    Before(Operand),
}

#[derive(Debug, Clone)]
struct Operand {
    value: Value,
    instant: Option<DateTime<Utc>>,
}

impl Operand {
    fn new(value: &Value, temporal_type: Option<TemporalType>) -> Self {
        let instant = match temporal_type {
            Some(TemporalType::Timestamp) => timestamp_instant(value),
            _ => None,
        };
        Self {
            value: value.clone(),
            instant,
        }
    }

    fn compare(&self, actual: &Value) -> Option<Ordering> {
        match (self.instant, timestamp_instant(actual)) {
            (Some(expected), Some(actual)) => Some(actual.cmp(&expected)),
            _ => partial_compare(actual, &self.value),
        }
    }

    /// Timestamps in different offsets are equal when they denote the same instant
    fn same_as(&self, actual: &Value) -> bool {
        values_equal(actual, &self.value) || self.compare(actual) == Some(Ordering::Equal)
    }
}

impl Matcher {
    /// Compiles a filter; every leaf must name a property of the entity
    pub fn compile(filter: &Where, metadata: &EntityMetadata) -> Result<Self> {
        let compile_all = |conditions: &[Where]| {
            conditions
                .iter()
                .map(|condition| Self::compile(condition, metadata))
                .collect::<Result<Vec<_>>>()
        };

        match filter {
            Where::And(conditions) => Ok(Matcher::All(compile_all(conditions)?)),
            Where::Or(conditions) => Ok(Matcher::Any(compile_all(conditions)?)),
            Where::Equals { property, value } => {
                let temporal_type = Self::resolve(property, metadata)?;
                Ok(Self::leaf(property, Test::Equals(Operand::new(value, temporal_type))))
            }
            Where::In { property, values } => {
                let temporal_type = Self::resolve(property, metadata)?;
                let values = values
                    .iter()
                    .map(|value| Operand::new(value, temporal_type))
                    .collect();
                Ok(Self::leaf(property, Test::In(values)))
            }
            Where::Between {
                property,
                start,
                end,
            } => {
                let temporal_type = Self::resolve(property, metadata)?;
                Ok(Self::leaf(
                    property,
                    Test::Between(
                        Operand::new(start, temporal_type),
                        Operand::new(end, temporal_type),
                    ),
                ))
            }
            Where::After { property, value } => {
                let temporal_type = Self::resolve(property, metadata)?;
                Ok(Self::leaf(property, Test::After(Operand::new(value, temporal_type))))
            }
            Where::Before { property, value } => {
                let temporal_type = Self::resolve(property, metadata)?;
                Ok(Self::leaf(property, Test::Before(Operand::new(value, temporal_type))))
            }
        }
    }

    /// Temporal type of a filtered property, which must be a field
    fn resolve(property: &str, metadata: &EntityMetadata) -> Result<Option<TemporalType>> {
        if metadata.field(property).is_none() {
            return Err(PersisterError::Metadata(format!(
                "Could not find field for property \"{}\" in table \"{}\"",
                property,
                metadata.table_name()
            )));
        }
        Ok(metadata.temporal_type(property))
    }

    fn leaf(property: &str, test: Test) -> Self {
        Matcher::Leaf(Condition {
            property: property.to_string(),
            test,
        })
    }

    /// An empty `All` matches everything, an empty `Any` nothing
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Matcher::Leaf(condition) => condition.matches(entity),
            Matcher::All(matchers) => matchers.iter().all(|matcher| matcher.matches(entity)),
            Matcher::Any(matchers) => matchers.iter().any(|matcher| matcher.matches(entity)),
        }
    }
}

impl Condition {
    fn matches(&self, entity: &Entity) -> bool {
        let actual = match entity.get(&self.property) {
            None | Some(Value::Null) => {
                return matches!(&self.test, Test::Equals(expected) if expected.value.is_null())
            }
            Some(actual) => actual,
        };
        match &self.test {
            Test::Equals(expected) => expected.same_as(actual),
            Test::In(values) => values.iter().any(|expected| expected.same_as(actual)),
            Test::Between(start, end) => {
                matches!(start.compare(actual), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(end.compare(actual), Some(Ordering::Less | Ordering::Equal))
            }
            Test::After(value) => value.compare(actual) == Some(Ordering::Greater),
            Test::Before(value) => value.compare(actual) == Some(Ordering::Less),
        }
    }
}
