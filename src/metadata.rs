//! Entity metadata model
//!
//! An [`EntityMetadata`] describes one table: its columns, the id property,
//! relations to other tables, temporal properties and lifecycle callbacks.
//! Metadata is assembled once at startup with [`EntityMetadataBuilder`] and
//! is read-only afterwards; persisters share it behind an `Arc`.

use crate::entity::Entity;
use crate::error::{PersisterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Distinguishes plain columns from many-to-one foreign key holders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntityFieldType {
    #[default]
    Column,
    JoinedEntity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalType {
    Date,
    Time,
    Timestamp,
}

impl TemporalType {
    /// Detects the temporal type from a SQL column definition such as
    /// `TIMESTAMP` or `DATETIME(3)`.
    pub fn from_column_definition(definition: &str) -> Option<Self> {
        let head = definition
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match head.as_str() {
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => Some(TemporalType::Timestamp),
            "DATE" => Some(TemporalType::Date),
            "TIME" | "TIMETZ" => Some(TemporalType::Time),
            _ => None,
        }
    }
}

/// Column mapping of a single entity property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityField {
    pub property_name: String,
    pub column_name: String,
    pub column_definition: Option<String>,
    pub nullable: Option<bool>,
    pub insertable: Option<bool>,
    pub updatable: Option<bool>,
    pub field_type: EntityFieldType,
}

impl EntityField {
    pub fn new(property_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            column_name: column_name.into(),
            column_definition: None,
            nullable: None,
            insertable: None,
            updatable: None,
            field_type: EntityFieldType::Column,
        }
    }

    /// Field holding the foreign key of a many-to-one relation
    pub fn joined(property_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            field_type: EntityFieldType::JoinedEntity,
            ..Self::new(property_name, column_name)
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.column_definition = Some(definition.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn with_insertable(mut self, insertable: bool) -> Self {
        self.insertable = Some(insertable);
        self
    }

    pub fn with_updatable(mut self, updatable: bool) -> Self {
        self.updatable = Some(updatable);
        self
    }

    pub fn is_joined_entity(&self) -> bool {
        self.field_type == EntityFieldType::JoinedEntity
    }

    pub fn is_insertable(&self) -> bool {
        self.insertable.unwrap_or(true)
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalProperty {
    pub property_name: String,
    pub temporal_type: TemporalType,
}

impl TemporalProperty {
    pub fn new(property_name: impl Into<String>, temporal_type: TemporalType) -> Self {
        Self {
            property_name: property_name.into(),
            temporal_type,
        }
    }
}

/// A collection property filled from rows of `mapped_table` whose
/// `mapped_by` property equals the id of this entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelationOneToMany {
    pub property_name: String,
    pub mapped_by: String,
    pub mapped_table: String,
}

impl EntityRelationOneToMany {
    pub fn new(
        property_name: impl Into<String>,
        mapped_by: impl Into<String>,
        mapped_table: impl Into<String>,
    ) -> Self {
        Self {
            property_name: property_name.into(),
            mapped_by: mapped_by.into(),
            mapped_table: mapped_table.into(),
        }
    }
}

/// A single entity property filled from the row of `mapped_table` that the
/// foreign key of this entity points to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelationManyToOne {
    pub property_name: String,
    pub mapped_table: String,
}

impl EntityRelationManyToOne {
    pub fn new(property_name: impl Into<String>, mapped_table: impl Into<String>) -> Self {
        Self {
            property_name: property_name.into(),
            mapped_table: mapped_table.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCallbackType {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
    PostLoad,
}

pub type EntityCallbackFn = Arc<dyn Fn(&mut Entity) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct EntityCallback {
    pub callback_type: EntityCallbackType,
    pub callback: EntityCallbackFn,
}

impl fmt::Debug for EntityCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCallback")
            .field("callback_type", &self.callback_type)
            .finish_non_exhaustive()
    }
}

/// Immutable description of an entity table
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    table_name: String,
    id_property_name: String,
    fields: Vec<EntityField>,
    one_to_many_relations: Vec<EntityRelationOneToMany>,
    many_to_one_relations: Vec<EntityRelationManyToOne>,
    temporal_properties: Vec<TemporalProperty>,
    callbacks: Vec<EntityCallback>,
    property_index: HashMap<String, usize>,
    id_index: usize,
}

impl EntityMetadata {
    pub fn builder(
        table_name: impl Into<String>,
        id_property_name: impl Into<String>,
    ) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(table_name, id_property_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_property_name(&self) -> &str {
        &self.id_property_name
    }

    pub fn id_field(&self) -> &EntityField {
        &self.fields[self.id_index]
    }

    pub fn id_column_name(&self) -> &str {
        &self.id_field().column_name
    }

    pub fn fields(&self) -> &[EntityField] {
        &self.fields
    }

    pub fn one_to_many_relations(&self) -> &[EntityRelationOneToMany] {
        &self.one_to_many_relations
    }

    pub fn many_to_one_relations(&self) -> &[EntityRelationManyToOne] {
        &self.many_to_one_relations
    }

    pub fn temporal_properties(&self) -> &[TemporalProperty] {
        &self.temporal_properties
    }

    pub fn callbacks(&self) -> &[EntityCallback] {
        &self.callbacks
    }

    pub fn has_relations(&self) -> bool {
        !self.one_to_many_relations.is_empty() || !self.many_to_one_relations.is_empty()
    }

    /// Looks up a field by property name
    pub fn field(&self, property_name: &str) -> Option<&EntityField> {
        self.property_index
            .get(property_name)
            .map(|index| &self.fields[*index])
    }

    /// Looks up the foreign key holder of a many-to-one relation
    pub fn joined_field(&self, property_name: &str) -> Option<&EntityField> {
        self.field(property_name).filter(|field| field.is_joined_entity())
    }

    /// First plain (non-joined) field stored in `column_name`
    pub fn plain_field_for_column(&self, column_name: &str) -> Option<&EntityField> {
        self.fields
            .iter()
            .find(|field| field.column_name == column_name && !field.is_joined_entity())
    }

    pub fn property_name_for_column(&self, column_name: &str) -> Option<&str> {
        self.plain_field_for_column(column_name)
            .or_else(|| self.fields.iter().find(|field| field.column_name == column_name))
            .map(|field| field.property_name.as_str())
    }

    pub fn temporal_type(&self, property_name: &str) -> Option<TemporalType> {
        self.field(property_name)
            .and_then(|field| resolve_temporal_type(field, &self.temporal_properties))
    }

    /// Runs every callback of the given type in registration order
    pub fn run_callbacks(&self, callback_type: EntityCallbackType, entity: &mut Entity) -> Result<()> {
        for callback in self
            .callbacks
            .iter()
            .filter(|callback| callback.callback_type == callback_type)
        {
            (callback.callback)(entity)?;
        }
        Ok(())
    }
}

/// Temporal type of a field, either declared as a temporal property or
/// implied by its column definition
pub fn resolve_temporal_type(
    field: &EntityField,
    temporal_properties: &[TemporalProperty],
) -> Option<TemporalType> {
    temporal_properties
        .iter()
        .find(|temporal| temporal.property_name == field.property_name)
        .map(|temporal| temporal.temporal_type)
        .or_else(|| {
            field
                .column_definition
                .as_deref()
                .and_then(TemporalType::from_column_definition)
        })
}

/// Builder for [`EntityMetadata`]
pub struct EntityMetadataBuilder {
    table_name: String,
    id_property_name: String,
    fields: Vec<EntityField>,
    one_to_many_relations: Vec<EntityRelationOneToMany>,
    many_to_one_relations: Vec<EntityRelationManyToOne>,
    temporal_properties: Vec<TemporalProperty>,
    callbacks: Vec<EntityCallback>,
}

impl EntityMetadataBuilder {
    pub fn new(table_name: impl Into<String>, id_property_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            id_property_name: id_property_name.into(),
            fields: Vec::new(),
            one_to_many_relations: Vec::new(),
            many_to_one_relations: Vec::new(),
            temporal_properties: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn field(mut self, field: EntityField) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a plain column field
    pub fn column(self, property_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        self.field(EntityField::new(property_name, column_name))
    }

    pub fn one_to_many(
        mut self,
        property_name: impl Into<String>,
        mapped_by: impl Into<String>,
        mapped_table: impl Into<String>,
    ) -> Self {
        self.one_to_many_relations.push(EntityRelationOneToMany::new(
            property_name,
            mapped_by,
            mapped_table,
        ));
        self
    }

    /// Adds a many-to-one relation together with its foreign key holder field
    pub fn many_to_one(
        mut self,
        property_name: impl Into<String>,
        column_name: impl Into<String>,
        mapped_table: impl Into<String>,
    ) -> Self {
        let property_name = property_name.into();
        self.fields
            .push(EntityField::joined(property_name.clone(), column_name));
        self.many_to_one_relations
            .push(EntityRelationManyToOne::new(property_name, mapped_table));
        self
    }

    pub fn temporal(mut self, property_name: impl Into<String>, temporal_type: TemporalType) -> Self {
        self.temporal_properties
            .push(TemporalProperty::new(property_name, temporal_type));
        self
    }

    pub fn callback<F>(mut self, callback_type: EntityCallbackType, callback: F) -> Self
    where
        F: Fn(&mut Entity) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(EntityCallback {
            callback_type,
            callback: Arc::new(callback),
        });
        self
    }

    pub fn build(self) -> Result<EntityMetadata> {
        if self.table_name.is_empty() {
            return Err(PersisterError::Metadata(
                "Entity metadata must have a table name".to_string(),
            ));
        }

        let mut property_index = HashMap::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            if property_index
                .insert(field.property_name.clone(), index)
                .is_some()
            {
                return Err(PersisterError::Metadata(format!(
                    "Property \"{}\" is mapped twice in table \"{}\"",
                    field.property_name, self.table_name
                )));
            }
        }

        let id_index = *property_index.get(&self.id_property_name).ok_or_else(|| {
            PersisterError::Metadata(format!(
                "Id property \"{}\" has no field in table \"{}\"",
                self.id_property_name, self.table_name
            ))
        })?;
        if self.fields[id_index].is_joined_entity() {
            return Err(PersisterError::Metadata(format!(
                "Id property \"{}\" in table \"{}\" cannot be a joined entity",
                self.id_property_name, self.table_name
            )));
        }

        if let Some(temporal) = self
            .temporal_properties
            .iter()
            .find(|temporal| !property_index.contains_key(&temporal.property_name))
        {
            return Err(PersisterError::Metadata(format!(
                "Temporal property \"{}\" has no field in table \"{}\"",
                temporal.property_name, self.table_name
            )));
        }

        Ok(EntityMetadata {
            table_name: self.table_name,
            id_property_name: self.id_property_name,
            fields: self.fields,
            one_to_many_relations: self.one_to_many_relations,
            many_to_one_relations: self.many_to_one_relations,
            temporal_properties: self.temporal_properties,
            callbacks: self.callbacks,
            property_index,
            id_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_items() -> EntityMetadata {
        EntityMetadata::builder("cart_items", "id")
            .column("id", "cart_item_id")
            .column("cartId", "cart_id")
            .column("name", "cart_item_name")
            .field(EntityField::new("createdAt", "created_at").with_definition("TIMESTAMP"))
            .many_to_one("cart", "cart_id", "carts")
            .build()
            .unwrap()
    }

    #[test]
    fn test_field_lookup() {
        let metadata = cart_items();

        assert_eq!(metadata.id_column_name(), "cart_item_id");
        assert_eq!(metadata.field("name").unwrap().column_name, "cart_item_name");
        assert!(metadata.field("missing").is_none());
        assert!(metadata.joined_field("cart").is_some());
        assert!(metadata.joined_field("cartId").is_none());
        assert_eq!(metadata.property_name_for_column("cart_id"), Some("cartId"));
        assert!(metadata.has_relations());
    }

    #[test]
    fn test_temporal_type_from_definition() {
        let metadata = cart_items();

        assert_eq!(metadata.temporal_type("createdAt"), Some(TemporalType::Timestamp));
        assert_eq!(metadata.temporal_type("name"), None);
        assert_eq!(
            TemporalType::from_column_definition("datetime(3)"),
            Some(TemporalType::Timestamp)
        );
        assert_eq!(TemporalType::from_column_definition("DATE"), Some(TemporalType::Date));
        assert_eq!(TemporalType::from_column_definition("VARCHAR(32)"), None);
    }

    #[test]
    fn test_missing_id_field() {
        let err = EntityMetadata::builder("carts", "id")
            .column("name", "cart_name")
            .build()
            .unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("\"id\""));
    }

    #[test]
    fn test_duplicate_property() {
        let err = EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .column("id", "other_id")
            .build()
            .unwrap_err();

        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_temporal_property() {
        let err = EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .temporal("updated", TemporalType::Timestamp)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("updated"));
    }

    #[test]
    fn test_callbacks_run_in_order() {
        let metadata = EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .column("name", "cart_name")
            .callback(EntityCallbackType::PrePersist, |entity| {
                entity.set("name", "first".into());
                Ok(())
            })
            .callback(EntityCallbackType::PrePersist, |entity| {
                let name = entity.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                entity.set("name", format!("{}-second", name).into());
                Ok(())
            })
            .build()
            .unwrap();

        let mut entity = Entity::new();
        metadata
            .run_callbacks(EntityCallbackType::PrePersist, &mut entity)
            .unwrap();
        metadata
            .run_callbacks(EntityCallbackType::PostLoad, &mut entity)
            .unwrap();

        assert_eq!(entity.get("name").unwrap(), "first-second");
    }
}
