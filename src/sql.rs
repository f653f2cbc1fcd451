//! Persister for SQL databases
//!
//! [`SqlPersister`] implements the persister contract once for every SQL
//! backend. Reads are a single statement per call: relations are joined
//! and projected as JSON (one-to-many as an aggregated array, many-to-one
//! as an object) and decoded back into entities here.

use crate::backend::{DatabaseBackend, QueryRow};
use crate::entity::{values_equal, Entity};
use crate::error::{PersisterError, Result};
use crate::metadata::{EntityCallbackType, EntityMetadata};
use crate::metadata_manager::PersisterMetadataManager;
use crate::persister::Persister;
use crate::predicate::Where;
use crate::query::{
    ChainBuilder, DeleteQueryBuilder, EntityInsertQueryBuilder, EntitySelectQueryBuilder,
    EntityUpdateQueryBuilder, QueryBuilder, SelectQueryBuilder, SqlDialect,
};
use crate::sort::Sort;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// SQL persister configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlPersisterConfig {
    /// Prepended to every table name
    pub table_prefix: String,
}

impl SqlPersisterConfig {
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }
}

pub struct SqlPersister<B: DatabaseBackend> {
    backend: B,
    config: SqlPersisterConfig,
    metadata_manager: PersisterMetadataManager,
}

impl<B: DatabaseBackend> SqlPersister<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SqlPersisterConfig::default())
    }

    pub fn with_config(backend: B, config: SqlPersisterConfig) -> Self {
        Self {
            backend,
            config,
            metadata_manager: PersisterMetadataManager::new(),
        }
    }

    /// Connects the backend and wraps it
    pub async fn connect(url: &str, config: SqlPersisterConfig) -> Result<Self> {
        Ok(Self::with_config(B::connect(url).await?, config))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SqlPersisterConfig {
        &self.config
    }

    fn complete_table_name(&self, metadata: &EntityMetadata) -> String {
        format!("{}{}", self.config.table_prefix, metadata.table_name())
    }

    fn where_chain(
        &self,
        metadata: &EntityMetadata,
        filter: &Where,
    ) -> Result<ChainBuilder<B::Dialect>> {
        ChainBuilder::from_where(
            filter,
            &self.complete_table_name(metadata),
            metadata.fields(),
            metadata.temporal_properties(),
        )
    }

    fn id_filter(metadata: &EntityMetadata, id: Value) -> Where {
        Where::property_equals(metadata.id_property_name(), id)
    }

    fn select_builder(
        &self,
        metadata: &EntityMetadata,
        filter: Option<&Where>,
        sort: Option<&Sort>,
    ) -> Result<EntitySelectQueryBuilder<B::Dialect>> {
        let table_name = metadata.table_name();
        let mut builder = EntitySelectQueryBuilder::new();
        builder.set_table_prefix(self.config.table_prefix.clone());
        builder.set_from_table(table_name);
        builder.include_entity_fields(table_name, metadata.fields(), metadata.temporal_properties());

        if metadata.has_relations() {
            builder.set_group_by_column(metadata.id_column_name());
            builder.set_one_to_many_relations(metadata.one_to_many_relations(), &self.metadata_manager)?;
            builder.set_many_to_one_relations(
                metadata.many_to_one_relations(),
                &self.metadata_manager,
                metadata.fields(),
            )?;
        }

        if let Some(filter) = filter {
            let chain =
                builder.build_and(filter, table_name, metadata.fields(), metadata.temporal_properties())?;
            builder.set_where_from_query_builder(Box::new(chain));
        }

        if let Some(sort) = sort {
            builder.set_order_by_table_fields(sort, table_name, metadata.fields())?;
        }

        Ok(builder)
    }

    /// Runs a select and decodes the rows, without `PostLoad` callbacks
    async fn fetch(
        &self,
        metadata: &EntityMetadata,
        filter: Option<&Where>,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Entity>> {
        let mut builder = self.select_builder(metadata, filter, sort)?;
        if let Some(limit) = limit {
            builder.set_limit(limit);
        }
        let (sql, values) = builder.build()?;
        tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);

        let rows = self.backend.query(&sql, &values).await?;
        rows.into_iter()
            .map(|row| self.row_to_entity(row, metadata))
            .collect()
    }

    async fn fetch_by_id(&self, metadata: &EntityMetadata, id: Value) -> Result<Entity> {
        self.fetch(metadata, Some(&Self::id_filter(metadata, id.clone())), None, Some(1))
            .await?
            .pop()
            .ok_or_else(|| {
                PersisterError::Integrity(format!(
                    "Could not find stored entity with id {} in table \"{}\"",
                    id,
                    metadata.table_name()
                ))
            })
    }

    fn row_to_entity(&self, row: QueryRow, metadata: &EntityMetadata) -> Result<Entity> {
        let mut entity = columns_to_entity(&row.columns, metadata);

        for relation in metadata.one_to_many_relations() {
            let target = self
                .metadata_manager
                .require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            let mut children: Vec<Entity> = Vec::new();
            if let Value::Array(list) = decode_json(row.get(&relation.property_name))? {
                for item in list {
                    let Value::Object(object) = item else {
                        continue;
                    };
                    let child = columns_to_entity(&object, &target);
                    let Some(id) = child.id(&target) else {
                        continue;
                    };
                    let duplicate = children.iter().any(|existing| {
                        existing
                            .id(&target)
                            .map_or(false, |existing| values_equal(existing, id))
                    });
                    if !duplicate {
                        children.push(child);
                    }
                }
            }
            entity.set(
                relation.property_name.clone(),
                Value::Array(
                    children
                        .into_iter()
                        .map(|child| Value::Object(child.into_properties()))
                        .collect(),
                ),
            );
        }

        for relation in metadata.many_to_one_relations() {
            let target = self
                .metadata_manager
                .require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            let related = match decode_json(row.get(&relation.property_name))? {
                Value::Object(object) => Some(columns_to_entity(&object, &target)),
                _ => None,
            }
            .filter(|related| related.id(&target).is_some())
            .ok_or_else(|| {
                PersisterError::Integrity(format!(
                    "Could not find \"{}\" to populate property \"{}\" in table \"{}\"",
                    target.table_name(),
                    relation.property_name,
                    metadata.table_name()
                ))
            })?;
            entity.set(
                relation.property_name.clone(),
                Value::Object(related.into_properties()),
            );
        }

        Ok(entity)
    }

    /// Inserts prepared rows and returns the id of the first one.
    ///
    /// Consecutive rows that agree on having an explicit id share one
    /// statement: rows with ids write the id column, rows without leave it
    /// to the database.
    async fn insert_rows(&self, metadata: &EntityMetadata, entities: &[Entity]) -> Result<Value> {
        let mut first_id = None;
        for run in entities.chunk_by(|a, b| a.id(metadata).is_some() == b.id(metadata).is_some()) {
            let id = self.insert_run(metadata, run).await?;
            first_id.get_or_insert(id);
        }
        first_id.ok_or_else(|| {
            PersisterError::Integrity(format!(
                "Could not add items to \"{}\": no entities given",
                metadata.table_name()
            ))
        })
    }

    async fn insert_run(&self, metadata: &EntityMetadata, entities: &[Entity]) -> Result<Value> {
        let explicit_id = entities
            .first()
            .and_then(|entity| entity.id(metadata))
            .cloned();
        let ignored: Vec<&str> = match explicit_id {
            Some(_) => Vec::new(),
            None => vec![metadata.id_property_name()],
        };

        let mut builder = EntityInsertQueryBuilder::<B::Dialect>::new(self.complete_table_name(metadata));
        builder.append_entity_list(
            entities,
            metadata.fields(),
            metadata.temporal_properties(),
            &ignored,
        )?;
        builder.set_returning_column(metadata.id_column_name());
        let (sql, values) = builder.build()?;
        tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);

        let generated = self
            .backend
            .insert(&sql, &values, metadata.id_column_name())
            .await?;
        explicit_id.or(generated).ok_or_else(|| {
            PersisterError::Integrity(format!(
                "Could not resolve id of inserted entity in table \"{}\"",
                metadata.table_name()
            ))
        })
    }

    fn require_id(entity: &Entity, metadata: &EntityMetadata) -> Result<Value> {
        entity.id(metadata).cloned().ok_or_else(|| {
            PersisterError::Integrity(format!(
                "The entity did not have a valid id at property \"{}\" in table \"{}\"",
                metadata.id_property_name(),
                metadata.table_name()
            ))
        })
    }
}

/// Maps columns to the properties of every field reading them
fn columns_to_entity(columns: &impl ColumnSource, metadata: &EntityMetadata) -> Entity {
    let mut entity = Entity::new();
    for field in metadata.fields() {
        if let Some(value) = columns.column(&field.column_name) {
            entity.set(field.property_name.clone(), value.clone());
        }
    }
    entity
}

trait ColumnSource {
    fn column(&self, name: &str) -> Option<&Value>;
}

impl ColumnSource for std::collections::HashMap<String, Value> {
    fn column(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl ColumnSource for Map<String, Value> {
    fn column(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Relation columns arrive as JSON values or as JSON text, depending on
/// the driver
fn decode_json(value: Option<&Value>) -> Result<Value> {
    match value {
        Some(Value::String(text)) => Ok(serde_json::from_str(text)?),
        Some(value) => Ok(value.clone()),
        None => Ok(Value::Null),
    }
}

#[async_trait]
impl<B: DatabaseBackend> Persister for SqlPersister<B> {
    fn setup_entity_metadata(&mut self, metadata: Arc<EntityMetadata>) {
        self.metadata_manager.setup_entity_metadata(metadata);
    }

    async fn count(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<u64> {
        let mut builder = SelectQueryBuilder::<B::Dialect>::new();
        builder.set_table_prefix(self.config.table_prefix.clone());
        builder.set_from_table(metadata.table_name());
        builder.include_formula_by_string("COUNT(*)", "count");
        if let Some(filter) = filter {
            builder.set_where_from_query_builder(Box::new(self.where_chain(metadata, filter)?));
        }
        let (sql, values) = builder.build()?;
        tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);

        let rows = self.backend.query(&sql, &values).await?;
        let count = rows
            .first()
            .and_then(|row| row.get_i64("count"))
            .ok_or_else(|| {
                PersisterError::Database(format!(
                    "Count query on \"{}\" returned no count",
                    metadata.table_name()
                ))
            })?;
        tracing::debug!("count: {} rows in \"{}\"", count, metadata.table_name());
        Ok(count.max(0) as u64)
    }

    async fn exists_by(&self, metadata: &EntityMetadata, filter: &Where) -> Result<bool> {
        Ok(self.count(metadata, Some(filter)).await? > 0)
    }

    async fn delete_all(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<()> {
        let mut builder = DeleteQueryBuilder::<B::Dialect>::new(self.complete_table_name(metadata));
        if let Some(filter) = filter {
            builder.set_where_from_query_builder(Box::new(self.where_chain(metadata, filter)?));
        }
        let (sql, values) = builder.build()?;
        tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);

        let affected = self.backend.execute(&sql, &values).await?;
        tracing::debug!("deleteAll: removed {} rows from \"{}\"", affected, metadata.table_name());
        Ok(())
    }

    async fn find_all(
        &self,
        metadata: &EntityMetadata,
        filter: Option<&Where>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Entity>> {
        let mut list = self.fetch(metadata, filter, sort, None).await?;
        for entity in &mut list {
            metadata.run_callbacks(EntityCallbackType::PostLoad, entity)?;
        }
        tracing::debug!("findAll: {} rows from \"{}\"", list.len(), metadata.table_name());
        Ok(list)
    }

    async fn find_by(
        &self,
        metadata: &EntityMetadata,
        filter: &Where,
        sort: Option<&Sort>,
    ) -> Result<Option<Entity>> {
        let mut entity = self.fetch(metadata, Some(filter), sort, Some(1)).await?.pop();
        if let Some(entity) = entity.as_mut() {
            metadata.run_callbacks(EntityCallbackType::PostLoad, entity)?;
        }
        Ok(entity)
    }

    async fn insert(&self, metadata: &EntityMetadata, entities: &[Entity]) -> Result<Entity> {
        if entities.is_empty() {
            return Err(PersisterError::Integrity(format!(
                "Could not add items to \"{}\": no entities given",
                metadata.table_name()
            )));
        }

        let mut prepared = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut entity = entity.clone();
            metadata.run_callbacks(EntityCallbackType::PrePersist, &mut entity)?;
            prepared.push(entity.without_relations(metadata, &self.metadata_manager));
        }

        let id = self.insert_rows(metadata, &prepared).await?;
        tracing::debug!("insert: {} rows into \"{}\"", prepared.len(), metadata.table_name());

        let mut entity = self.fetch_by_id(metadata, id).await?;
        metadata.run_callbacks(EntityCallbackType::PostPersist, &mut entity)?;
        Ok(entity)
    }

    async fn update(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<Entity> {
        let mut entity = entity.clone();
        metadata.run_callbacks(EntityCallbackType::PreUpdate, &mut entity)?;
        let id = Self::require_id(&entity, metadata)?;
        let entity = entity.without_relations(metadata, &self.metadata_manager);

        let exists = self
            .count(metadata, Some(&Self::id_filter(metadata, id.clone())))
            .await?
            > 0;
        if exists {
            let builder = EntityUpdateQueryBuilder::<B::Dialect>::create(
                &self.complete_table_name(metadata),
                &entity,
                metadata,
            )?;
            let (sql, values) = builder.build()?;
            tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);
            self.backend.execute(&sql, &values).await?;
        } else {
            self.insert_rows(metadata, std::slice::from_ref(&entity)).await?;
        }
        tracing::debug!("update: {} in \"{}\"", id, metadata.table_name());

        let mut entity = self.fetch_by_id(metadata, id).await?;
        metadata.run_callbacks(EntityCallbackType::PostUpdate, &mut entity)?;
        Ok(entity)
    }

    async fn delete(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<()> {
        let mut entity = entity.clone();
        metadata.run_callbacks(EntityCallbackType::PreRemove, &mut entity)?;
        let id = Self::require_id(&entity, metadata)?;

        let mut builder = DeleteQueryBuilder::<B::Dialect>::new(self.complete_table_name(metadata));
        builder.set_where_from_query_builder(Box::new(
            self.where_chain(metadata, &Self::id_filter(metadata, id.clone()))?,
        ));
        let (sql, values) = builder.build()?;
        tracing::trace!("{}: {} {:?}", B::Dialect::NAME, sql, values);
        self.backend.execute(&sql, &values).await?;
        tracing::debug!("delete: {} from \"{}\"", id, metadata.table_name());

        metadata.run_callbacks(EntityCallbackType::PostRemove, &mut entity)?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json() {
        assert_eq!(decode_json(Some(&json!("[1, 2]"))).unwrap(), json!([1, 2]));
        assert_eq!(decode_json(Some(&json!({"a": 1}))).unwrap(), json!({"a": 1}));
        assert_eq!(decode_json(None).unwrap(), Value::Null);
        assert!(decode_json(Some(&json!("not json"))).is_err());
    }

    #[test]
    fn test_columns_to_entity() {
        let metadata = EntityMetadata::builder("cart_items", "id")
            .column("id", "cart_item_id")
            .column("cartId", "cart_id")
            .build()
            .unwrap();
        let mut columns = Map::new();
        columns.insert("cart_item_id".to_string(), json!(1));
        columns.insert("cart_id".to_string(), json!("c1"));
        columns.insert("unmapped".to_string(), json!(true));

        let entity = columns_to_entity(&columns, &metadata);

        assert_eq!(entity, Entity::try_from(json!({"id": 1, "cartId": "c1"})).unwrap());
    }

    #[test]
    fn test_config_with_prefix() {
        let config = SqlPersisterConfig::default().with_table_prefix("app_");
        assert_eq!(config.table_prefix, "app_");

        let config: SqlPersisterConfig = serde_json::from_value(json!({})).unwrap();
        assert!(config.table_prefix.is_empty());
    }
}
