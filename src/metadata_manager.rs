use crate::error::{PersisterError, Result};
use crate::metadata::EntityMetadata;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of entity metadata by table name, used to resolve relation targets
#[derive(Debug, Clone, Default)]
pub struct PersisterMetadataManager {
    tables: HashMap<String, Arc<EntityMetadata>>,
}

impl PersisterMetadataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers metadata for its table, replacing an earlier registration
    pub fn setup_entity_metadata(&mut self, metadata: Arc<EntityMetadata>) {
        let table_name = metadata.table_name().to_string();
        tracing::debug!(
            "Registering metadata for table \"{}\" ({} fields)",
            table_name,
            metadata.fields().len()
        );
        if self.tables.insert(table_name.clone(), metadata).is_some() {
            tracing::warn!("Metadata for table \"{}\" was registered twice", table_name);
        }
    }

    pub fn get_metadata_by_table(&self, table_name: &str) -> Option<Arc<EntityMetadata>> {
        self.tables.get(table_name).cloned()
    }

    /// Resolves the target of a relation or fails with a metadata error
    /// naming the property that needs it
    pub fn require_metadata_by_table(
        &self,
        table_name: &str,
        property_name: &str,
    ) -> Result<Arc<EntityMetadata>> {
        if table_name.is_empty() {
            return Err(PersisterError::Metadata(format!(
                "The relation \"{}\" did not have table defined",
                property_name
            )));
        }
        self.get_metadata_by_table(table_name).ok_or_else(|| {
            PersisterError::Metadata(format!(
                "Could not find metadata for table \"{}\" to populate property \"{}\"",
                table_name, property_name
            ))
        })
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}
