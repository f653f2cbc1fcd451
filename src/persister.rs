use crate::entity::Entity;
use crate::error::Result;
use crate::metadata::EntityMetadata;
use crate::predicate::Where;
use crate::sort::Sort;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage contract shared by every backend.
///
/// Metadata for every table taking part in a relation must be registered
/// with [`Persister::setup_entity_metadata`] before entities are read or
/// written. Entities passed in are never mutated; every operation works on
/// a copy and returns fresh entities.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Registers metadata so relations pointing to its table can be resolved
    fn setup_entity_metadata(&mut self, metadata: Arc<EntityMetadata>);

    /// Number of rows matching `filter`, or all rows without one
    async fn count(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<u64>;

    async fn exists_by(&self, metadata: &EntityMetadata, filter: &Where) -> Result<bool>;

    /// Removes rows matching `filter`, or every row without one
    async fn delete_all(&self, metadata: &EntityMetadata, filter: Option<&Where>) -> Result<()>;

    /// Rows matching `filter` with relations populated, ordered by `sort`
    async fn find_all(
        &self,
        metadata: &EntityMetadata,
        filter: Option<&Where>,
        sort: Option<&Sort>,
    ) -> Result<Vec<Entity>>;

    /// First row matching `filter` in `sort` order
    async fn find_by(
        &self,
        metadata: &EntityMetadata,
        filter: &Where,
        sort: Option<&Sort>,
    ) -> Result<Option<Entity>>;

    /// Stores every entity and returns the first one as stored, with
    /// relations populated
    async fn insert(&self, metadata: &EntityMetadata, entities: &[Entity]) -> Result<Entity>;

    async fn insert_one(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<Entity> {
        self.insert(metadata, std::slice::from_ref(entity)).await
    }

    /// Replaces the row with the entity's id and returns it populated
    async fn update(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<Entity>;

    /// Removes the row with the entity's id
    async fn delete(&self, metadata: &EntityMetadata, entity: &Entity) -> Result<()>;

    /// Releases resources held by the persister
    async fn destroy(&self) -> Result<()>;
}
