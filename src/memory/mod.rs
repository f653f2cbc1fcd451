//! In-memory persister
//!
//! Stores simplified entities (relation properties stripped) per table and
//! populates relations from the other tables on the way out. Useful for
//! development and tests; nothing is persisted across instances.

pub mod matcher;

use crate::entity::{values_equal, Entity};
use crate::error::{PersisterError, Result};
use crate::metadata::{EntityCallbackType, EntityMetadata};
use crate::metadata_manager::PersisterMetadataManager;
use crate::persister::Persister;
use crate::predicate::Where;
use crate::sort::Sort;
use async_trait::async_trait;
use matcher::Matcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Type of generated ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryIdType {
    #[default]
    String,
    Number,
}

/// Memory persister configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPersisterConfig {
    pub id_type: MemoryIdType,
}

impl MemoryPersisterConfig {
    pub fn with_id_type(mut self, id_type: MemoryIdType) -> Self {
        self.id_type = id_type;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MemoryItem {
    pub id: Value,
    pub value: Entity,
}

impl MemoryItem {
    pub fn new(id: Value, value: Entity) -> Self {
        Self { id, value }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub items: Vec<MemoryItem>,
}

impl MemoryTable {
    fn position(&self, id: &Value) -> Option<usize> {
        self.items.iter().position(|item| values_equal(&item.id, id))
    }

    fn find(&self, id: &Value) -> Option<&MemoryItem> {
        self.position(id).map(|index| &self.items[index])
    }

    fn contains(&self, id: &Value) -> bool {
        self.position(id).is_some()
    }
}

type Tables = HashMap<String, MemoryTable>;

/// Persister keeping every table in process memory
pub struct MemoryPersister {
    config: MemoryPersisterConfig,
    data: RwLock<Tables>,
    id_sequencer: AtomicU64,
    metadata_manager: PersisterMetadataManager,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::with_config(MemoryPersisterConfig::default())
    }

    pub fn with_config(config: MemoryPersisterConfig) -> Self {
        Self {
            config,
            data: RwLock::new(HashMap::new()),
            id_sequencer: AtomicU64::new(0),
            metadata_manager: PersisterMetadataManager::new(),
        }
    }

    pub fn config(&self) -> &MemoryPersisterConfig {
        &self.config
    }

    pub fn metadata_manager(&self) -> &PersisterMetadataManager {
        &self.metadata_manager
    }

    fn next_id(&self) -> Value {
        let id = self.id_sequencer.fetch_add(1, Ordering::SeqCst) + 1;
        match self.config.id_type {
            MemoryIdType::String => Value::String(id.to_string()),
            MemoryIdType::Number => Value::from(id),
        }
    }

    fn compile(filter: Option<&Where>, metadata: &EntityMetadata) -> Result<Option<Matcher>> {
        filter
            .map(|filter| Matcher::compile(filter, metadata))
            .transpose()
    }

    fn matches(matcher: Option<&Matcher>, item: &MemoryItem) -> bool {
        matcher.map_or(true, |matcher| matcher.matches(&item.value))
    }

    fn simplify(&self, entity: &Entity, metadata: &EntityMetadata) -> Entity {
        entity.without_relations(metadata, &self.metadata_manager)
    }

    /// Matching entities, simplified and stably sorted, without relations
    fn select(
        &self,
        data: &Tables,
        metadata: &EntityMetadata,
        matcher: Option<&Matcher>,
        sort: Option<&Sort>,
    ) -> Vec<Entity> {
        let mut list: Vec<Entity> = data
            .get(metadata.table_name())
            .map(|table| {
                table
                    .items
                    .iter()
                    .filter(|item| Self::matches(matcher, item))
                    .map(|item| self.simplify(&item.value, metadata))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(sort) = sort {
            list.sort_by(|a, b| sort.compare(metadata, a, b));
        }
        list
    }

    /// Fills one-to-many relations first, then many-to-one relations
    fn populate_relations(
        &self,
        data: &Tables,
        mut entity: Entity,
        metadata: &EntityMetadata,
    ) -> Result<Entity> {
        self.populate_one_to_many(data, &mut entity, metadata)?;
        self.populate_many_to_one(data, &mut entity, metadata)?;
        Ok(entity)
    }

    fn populate_one_to_many(
        &self,
        data: &Tables,
        entity: &mut Entity,
        metadata: &EntityMetadata,
    ) -> Result<()> {
        let id = entity.id(metadata).cloned();

        for relation in metadata.one_to_many_relations() {
            let target = self
                .metadata_manager
                .require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            if target.field(&relation.mapped_by).is_none() {
                return Err(PersisterError::Metadata(format!(
                    "Could not find field \"{}\" in table \"{}\" to populate property \"{}\" in table \"{}\"",
                    relation.mapped_by,
                    target.table_name(),
                    relation.property_name,
                    metadata.table_name()
                )));
            }

            let children: Vec<Value> = match (&id, data.get(target.table_name())) {
                (Some(id), Some(table)) => table
                    .items
                    .iter()
                    .filter(|item| {
                        item.value
                            .get(&relation.mapped_by)
                            .map_or(false, |key| values_equal(key, id))
                    })
                    .map(|item| Value::Object(self.simplify(&item.value, &target).into_properties()))
                    .collect(),
                _ => Vec::new(),
            };
            tracing::trace!(
                "Populated {} \"{}\" for table \"{}\"",
                children.len(),
                relation.property_name,
                metadata.table_name()
            );
            entity.set(relation.property_name.clone(), Value::Array(children));
        }
        Ok(())
    }

    fn populate_many_to_one(
        &self,
        data: &Tables,
        entity: &mut Entity,
        metadata: &EntityMetadata,
    ) -> Result<()> {
        for relation in metadata.many_to_one_relations() {
            let target = self
                .metadata_manager
                .require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            let key = entity.foreign_key(metadata, relation, &target)?.ok_or_else(|| {
                PersisterError::Integrity(format!(
                    "Could not find foreign key to populate property \"{}\" in table \"{}\"",
                    relation.property_name,
                    metadata.table_name()
                ))
            })?;
            let item = data
                .get(target.table_name())
                .and_then(|table| table.find(&key))
                .ok_or_else(|| {
                    PersisterError::Integrity(format!(
                        "Could not find \"{}\" with id {} to populate property \"{}\" in table \"{}\"",
                        target.table_name(),
                        key,
                        relation.property_name,
                        metadata.table_name()
                    ))
                })?;
            entity.set(
                relation.property_name.clone(),
                Value::Object(self.simplify(&item.value, &target).into_properties()),
            );
        }
        Ok(())
    }

    /// Populates relations and runs `PostLoad` on every entity
    fn load_list(
        &self,
        data: &Tables,
        list: Vec<Entity>,
        metadata: &EntityMetadata,
    ) -> Result<Vec<Entity>> {
        list.into_iter()
            .map(|entity| {
                let mut entity = self.populate_relations(data, entity, metadata)?;
                metadata.run_callbacks(EntityCallbackType::PostLoad, &mut entity)?;
                Ok(entity)
            })
            .collect()
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

impl Default for MemoryPersister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    fn setup_entity_metadata(&mut self, metadata: Arc<EntityMetadata>) {
        self.metadata_manager.setup_entity_metadata(metadata);
    }

    async fn count(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<u64> {
        let matcher = Self::compile(filter, metadata)?;
        let data = self.data.read().await;
        let count = data.get(metadata.table_name()).map_or(0, |table| {
            table
                .items
                .iter()
                .filter(|item| Self::matches(matcher.as_ref(), item))
                .count()
        });
        tracing::debug!("count: {} rows in \"{}\"", count, metadata.table_name());
        Ok(count as u64)
    }

    async fn exists_by(&self, metadata: &EntityMetadata, filter: &Where) -> Result<bool> {
        let matcher = Matcher::compile(filter, metadata)?;
        let data = self.data.read().await;
        Ok(data.get(metadata.table_name()).map_or(false, |table| {
            table.items.iter().any(|item| matcher.matches(&item.value))
        }))
    }

    async fn delete_all(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<()> {
        let matcher = Self::compile(filter, metadata)?;
        let mut data = self.data.write().await;
        match matcher {
            None => {
                if data.remove(metadata.table_name()).is_some() {
                    tracing::debug!("deleteAll: dropped table \"{}\"", metadata.table_name());
                }
            }
            Some(matcher) => {
                if let Some(table) = data.get_mut(metadata.table_name()) {
                    let before = table.items.len();
                    table.items.retain(|item| !matcher.matches(&item.value));
                    tracing::debug!(
                        "deleteAll: removed {} rows from \"{}\"",
                        before - table.items.len(),
                        metadata.table_name()
                    );
                }
            }
        }
        Ok(())
    }

    async fn find_all(
        &self,
        metadata: &EntityMetadata,
        filter: Option<&Where>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Entity>> {
        let matcher = Self::compile(filter, metadata)?;
        if let Some(sort) = sort {
            sort.validate(metadata)?;
        }
        let data = self.data.read().await;
        let list = self.select(&data, metadata, matcher.as_ref(), sort);
        let list = self.load_list(&data, list, metadata)?;
        tracing::debug!("findAll: {} rows from \"{}\"", list.len(), metadata.table_name());
        Ok(list)
    }

    async fn find_by(
        &self,
        metadata: &EntityMetadata,
        filter: &Where,
        sort: Option<&Sort>,
    ) -> Result<Option<Entity>> {
        let matcher = Matcher::compile(filter, metadata)?;
        if let Some(sort) = sort {
            sort.validate(metadata)?;
        }
        let data = self.data.read().await;
        let first = self
            .select(&data, metadata, Some(&matcher), sort)
            .into_iter()
            .take(1)
            .collect();
        Ok(self.load_list(&data, first, metadata)?.pop())
    }

    async fn insert(&self, metadata: &EntityMetadata, entities: &[Entity]) -> Result<Entity> {
        if entities.is_empty() {
            return Err(PersisterError::Integrity(format!(
                "Could not add items to \"{}\": no entities given",
                metadata.table_name()
            )));
        }

        let mut data = self.data.write().await;
        let table_name = metadata.table_name();
        let mut ids: Vec<Value> = data
            .get(table_name)
            .map(|table| table.items.iter().map(|item| item.id.clone()).collect())
            .unwrap_or_default();
        let taken = |ids: &[Value], id: &Value| ids.iter().any(|existing| values_equal(existing, id));

        let mut items = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut entity = entity.clone();
            metadata.run_callbacks(EntityCallbackType::PrePersist, &mut entity)?;

            let id = match entity.id(metadata) {
                Some(id) => id.clone(),
                None => {
                    let mut id = self.next_id();
                    while taken(&ids, &id) {
                        id = self.next_id();
                    }
                    entity.set(metadata.id_property_name(), id.clone());
                    id
                }
            };
            if taken(&ids, &id) {
                return Err(PersisterError::Integrity(format!(
                    "Entity already stored with id {} in table \"{}\"",
                    id, table_name
                )));
            }
            ids.push(id.clone());
            items.push(MemoryItem::new(id, self.simplify(&entity, metadata)));
        }

        let first = items[0].value.clone();
        let count = items.len();
        data.entry(table_name.to_string())
            .or_default()
            .items
            .extend(items);
        tracing::debug!("insert: {} rows into \"{}\"", count, table_name);

        let mut entity = self.populate_relations(&data, first, metadata)?;
        metadata.run_callbacks(EntityCallbackType::PostPersist, &mut entity)?;
        Ok(entity)
    }

    async fn update(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<Entity> {
        let mut entity = entity.clone();
        metadata.run_callbacks(EntityCallbackType::PreUpdate, &mut entity)?;
        let id = Self::require_id(&entity, metadata)?;
        let stored = self.simplify(&entity, metadata);

        let mut data = self.data.write().await;
        let table = data.entry(metadata.table_name().to_string()).or_default();
        match table.position(&id) {
            Some(index) => table.items[index].value = stored.clone(),
            None => table.items.push(MemoryItem::new(id.clone(), stored.clone())),
        }
        tracing::debug!("update: {} in \"{}\"", id, metadata.table_name());

        let mut entity = self.populate_relations(&data, stored, metadata)?;
        metadata.run_callbacks(EntityCallbackType::PostUpdate, &mut entity)?;
        Ok(entity)
    }

    async fn delete(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<()> {
        let mut entity = entity.clone();
        metadata.run_callbacks(EntityCallbackType::PreRemove, &mut entity)?;
        let id = Self::require_id(&entity, metadata)?;

        let mut data = self.data.write().await;
        if let Some(table) = data.get_mut(metadata.table_name()) {
            table.items.retain(|item| !values_equal(&item.id, &id));
        }
        drop(data);
        tracing::debug!("delete: {} from \"{}\"", id, metadata.table_name());

        metadata.run_callbacks(EntityCallbackType::PostRemove, &mut entity)?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut data = self.data.write().await;
        tracing::debug!("destroy: dropping {} tables", data.len());
        data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products() -> Arc<EntityMetadata> {
        Arc::new(
            EntityMetadata::builder("products", "id")
                .column("id", "product_id")
                .column("name", "product_name")
                .column("price", "price")
                .build()
                .unwrap(),
        )
    }

    fn persister(config: MemoryPersisterConfig) -> MemoryPersister {
        let mut persister = MemoryPersister::with_config(config);
        persister.setup_entity_metadata(products());
        persister
    }

    #[tokio::test]
    async fn test_generated_ids() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());

        let first = persister
            .insert_one(&metadata, &Entity::new().with("name", "hat"))
            .await
            .unwrap();
        let second = persister
            .insert_one(&metadata, &Entity::new().with("name", "shoe"))
            .await
            .unwrap();

        assert_eq!(first.get("id"), Some(&json!("1")));
        assert_eq!(second.get("id"), Some(&json!("2")));
    }

    #[tokio::test]
    async fn test_numeric_ids_skip_taken() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default().with_id_type(MemoryIdType::Number));

        persister
            .insert_one(&metadata, &Entity::new().with("id", 1).with("name", "hat"))
            .await
            .unwrap();
        let generated = persister
            .insert_one(&metadata, &Entity::new().with("name", "shoe"))
            .await
            .unwrap();

        assert_eq!(generated.get("id"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_instances_have_own_counters() {
        let metadata = products();
        let a = persister(MemoryPersisterConfig::default());
        let b = persister(MemoryPersisterConfig::default());

        a.insert_one(&metadata, &Entity::new()).await.unwrap();
        let from_b = b.insert_one(&metadata, &Entity::new()).await.unwrap();

        assert_eq!(from_b.get("id"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_caller_entity_is_not_mutated() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());
        let entity = Entity::new().with("name", "hat");

        persister.insert_one(&metadata, &entity).await.unwrap();

        assert!(!entity.has("id"));
    }

    #[tokio::test]
    async fn test_update_requires_id() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());

        let err = persister
            .update(&metadata, &Entity::new().with("name", "hat"))
            .await
            .unwrap_err();

        assert!(err.is_integrity());
    }

    #[tokio::test]
    async fn test_update_replaces_or_inserts() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());

        persister
            .update(&metadata, &Entity::new().with("id", "p1").with("name", "hat"))
            .await
            .unwrap();
        persister
            .update(&metadata, &Entity::new().with("id", "p1").with("name", "cap"))
            .await
            .unwrap();

        let all = persister.find_all(&metadata, None, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("name"), Some(&json!("cap")));
    }

    #[tokio::test]
    async fn test_reads_on_missing_table() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());
        let filter = Where::property_equals("name", "hat");

        assert_eq!(persister.count(&metadata, None).await.unwrap(), 0);
        assert!(!persister.exists_by(&metadata, &filter).await.unwrap());
        assert!(persister.find_by(&metadata, &filter, None).await.unwrap().is_none());
        assert!(persister.find_all(&metadata, None, None).await.unwrap().is_empty());
        persister.delete_all(&metadata, Some(&filter)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_filter_fails_on_missing_table() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());

        let err = persister
            .count(&metadata, Some(&Where::property_equals("weight", 1)))
            .await
            .unwrap_err();

        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_delete_and_destroy() {
        let metadata = products();
        let persister = persister(MemoryPersisterConfig::default());
        let hat = persister
            .insert_one(&metadata, &Entity::new().with("name", "hat"))
            .await
            .unwrap();
        persister
            .insert_one(&metadata, &Entity::new().with("name", "shoe"))
            .await
            .unwrap();

        persister.delete(&metadata, &hat).await.unwrap();
        assert_eq!(persister.count(&metadata, None).await.unwrap(), 1);

        persister.destroy().await.unwrap();
        assert_eq!(persister.count(&metadata, None).await.unwrap(), 0);
    }

    #[test]
    fn test_config_deserialize() {
        let config: MemoryPersisterConfig = serde_json::from_value(json!({"id_type": "number"})).unwrap();
        assert_eq!(config.id_type, MemoryIdType::Number);

        let config: MemoryPersisterConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, MemoryPersisterConfig::default());
    }
}
