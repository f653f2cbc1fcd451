use crate::error::{PersisterError, Result};
use crate::metadata::{EntityMetadata, EntityRelationManyToOne};
use crate::metadata_manager::PersisterMetadataManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A persisted record: property names mapped to JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    properties: Map<String, Value>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converts any serializable model into an entity
    pub fn from_model<T: Serialize>(model: &T) -> Result<Self> {
        match serde_json::to_value(model)? {
            Value::Object(properties) => Ok(Self { properties }),
            other => Err(PersisterError::Integrity(format!(
                "Entity must serialize to an object, got: {}",
                other
            ))),
        }
    }

    pub fn to_model<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.properties.clone()))?)
    }

    pub fn with(mut self, property_name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(property_name.into(), value.into());
        self
    }

    pub fn get(&self, property_name: &str) -> Option<&Value> {
        self.properties.get(property_name)
    }

    pub fn set(&mut self, property_name: impl Into<String>, value: Value) {
        self.properties.insert(property_name.into(), value);
    }

    pub fn has(&self, property_name: &str) -> bool {
        self.properties.contains_key(property_name)
    }

    pub fn remove(&mut self, property_name: &str) -> Option<Value> {
        self.properties.remove(property_name)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn into_properties(self) -> Map<String, Value> {
        self.properties
    }

    /// The id value, unless it is missing or empty
    pub fn id(&self, metadata: &EntityMetadata) -> Option<&Value> {
        self.get(metadata.id_property_name())
            .filter(|value| !is_empty_id(value))
    }

    /// Resolves the foreign key value of a many-to-one relation.
    ///
    /// The key is read from the plain field sharing the relation's column
    /// when there is one, otherwise from the relation property itself,
    /// which may hold either the key or an embedded target entity.
    pub fn foreign_key(
        &self,
        metadata: &EntityMetadata,
        relation: &EntityRelationManyToOne,
        target: &EntityMetadata,
    ) -> Result<Option<Value>> {
        let joined = metadata.joined_field(&relation.property_name).ok_or_else(|| {
            PersisterError::Metadata(format!(
                "Could not find join column for property \"{}\" in table \"{}\"",
                relation.property_name,
                metadata.table_name()
            ))
        })?;

        let value = match metadata.plain_field_for_column(&joined.column_name) {
            Some(field) => self.get(&field.property_name).cloned(),
            None => match self.get(&relation.property_name) {
                Some(Value::Object(object)) => object.get(target.id_property_name()).cloned(),
                other => other.cloned(),
            },
        };

        Ok(value.filter(|value| !is_empty_id(value)))
    }

    /// Returns a copy with populated relation properties stripped.
    ///
    /// A many-to-one property that is the only holder of its foreign key is
    /// reduced to the key instead of being removed.
    pub fn without_relations(
        &self,
        metadata: &EntityMetadata,
        manager: &PersisterMetadataManager,
    ) -> Entity {
        let mut entity = self.clone();

        for relation in metadata.one_to_many_relations() {
            entity.remove(&relation.property_name);
        }

        for relation in metadata.many_to_one_relations() {
            let holds_key = metadata
                .joined_field(&relation.property_name)
                .map(|field| metadata.plain_field_for_column(&field.column_name).is_none())
                .unwrap_or(false);
            let value = entity.remove(&relation.property_name);
            if !holds_key {
                continue;
            }
            let key = match value {
                Some(Value::Object(object)) => manager
                    .get_metadata_by_table(&relation.mapped_table)
                    .and_then(|target| object.get(target.id_property_name()).cloned()),
                other => other,
            };
            if let Some(key) = key {
                entity.set(relation.property_name.clone(), key);
            }
        }

        entity
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(properties: Map<String, Value>) -> Self {
        Self { properties }
    }
}

impl TryFrom<Value> for Entity {
    type Error = PersisterError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(properties) => Ok(Self { properties }),
            other => Err(PersisterError::Integrity(format!(
                "Entity must be a JSON object, got: {}",
                other
            ))),
        }
    }
}

/// Null, `""`, `0` and `false` do not count as ids
pub fn is_empty_id(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Equality that treats `1` and `1.0` as the same number
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
