//! Builders that assemble statements from entity metadata

use super::chain::ChainBuilder;
use super::dialect::SqlDialect;
use super::dml::UpdateQueryBuilder;
use super::formula::{entity_columns, FunctionBuilder, JsonObjectBuilder, ValueListBuilder};
use super::insert::InsertQueryBuilder;
use super::select::SelectQueryBuilder;
use super::{QueryBuilder, QueryValueFactory};
use crate::entity::Entity;
use crate::error::{PersisterError, Result};
use crate::metadata::{
    resolve_temporal_type, EntityField, EntityMetadata, EntityRelationManyToOne,
    EntityRelationOneToMany, TemporalProperty, TemporalType,
};
use crate::metadata_manager::PersisterMetadataManager;
use crate::predicate::Where;
use serde_json::Value;
use std::ops::{Deref, DerefMut};

/// SELECT builder that projects entity fields and relation formulas
pub struct EntitySelectQueryBuilder<D> {
    select: SelectQueryBuilder<D>,
}

impl<D: SqlDialect> EntitySelectQueryBuilder<D> {
    pub fn new() -> Self {
        Self {
            select: SelectQueryBuilder::new(),
        }
    }

    /// Projects every distinct column of the entity, cast by temporal type
    pub fn include_entity_fields(
        &mut self,
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) {
        for (field, cast) in entity_columns(fields, temporal_properties) {
            self.select
                .include_column_with_cast(table_name, field.column_name.clone(), cast);
        }
    }

    /// Aggregates the joined rows of `target_table` into a JSON array
    /// projected as `property_name`
    #[allow(clippy::too_many_arguments)]
    pub fn set_one_to_many(
        &mut self,
        property_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
        target_table: &str,
        target_column: &str,
        source_table: &str,
        source_column: &str,
    ) {
        self.select
            .left_join_table(target_table, target_column, source_table, source_column);
        let object = JsonObjectBuilder::<D>::create(
            &self.select.complete_table_name(target_table),
            fields,
            temporal_properties,
        );
        let formula = FunctionBuilder::create(D::json_array_agg_function(), Box::new(object));
        self.select
            .include_column_from_query_builder(Box::new(formula), property_name);
    }

    /// Embeds the single joined row of `target_table` as a JSON object
    /// projected as `property_name`
    #[allow(clippy::too_many_arguments)]
    pub fn set_many_to_one(
        &mut self,
        property_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
        target_table: &str,
        target_column: &str,
        source_table: &str,
        source_column: &str,
    ) {
        self.select
            .left_join_table(target_table, target_column, source_table, source_column);
        let object = JsonObjectBuilder::<D>::create(
            &self.select.complete_table_name(target_table),
            fields,
            temporal_properties,
        );
        self.select
            .include_column_from_query_builder(D::many_to_one_formula(Box::new(object)), property_name);
    }

    /// Joins the children of every one-to-many relation on the group by
    /// column of the from table
    pub fn set_one_to_many_relations(
        &mut self,
        relations: &[EntityRelationOneToMany],
        manager: &PersisterMetadataManager,
    ) -> Result<()> {
        let source_table = self.select.short_from_table()?.to_string();
        let source_column = self.select.group_by_column()?.to_string();

        for relation in relations {
            let target =
                manager.require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            let join_field = target.field(&relation.mapped_by).ok_or_else(|| {
                PersisterError::Metadata(format!(
                    "Could not find field \"{}\" in table \"{}\" to join property \"{}\"",
                    relation.mapped_by,
                    target.table_name(),
                    relation.property_name
                ))
            })?;
            self.set_one_to_many(
                &relation.property_name,
                target.fields(),
                target.temporal_properties(),
                target.table_name(),
                &join_field.column_name,
                &source_table,
                &source_column,
            );
        }
        Ok(())
    }

    /// Joins the target row of every many-to-one relation on its id column
    pub fn set_many_to_one_relations(
        &mut self,
        relations: &[EntityRelationManyToOne],
        manager: &PersisterMetadataManager,
        fields: &[EntityField],
    ) -> Result<()> {
        let source_table = self.select.short_from_table()?.to_string();

        for relation in relations {
            let target =
                manager.require_metadata_by_table(&relation.mapped_table, &relation.property_name)?;
            let joined = fields
                .iter()
                .find(|field| field.property_name == relation.property_name && field.is_joined_entity())
                .ok_or_else(|| {
                    PersisterError::Metadata(format!(
                        "Could not find join column for property \"{}\" in table \"{}\"",
                        relation.property_name, source_table
                    ))
                })?;
            self.set_many_to_one(
                &relation.property_name,
                target.fields(),
                target.temporal_properties(),
                target.table_name(),
                target.id_column_name(),
                &source_table,
                &joined.column_name,
            );
        }
        Ok(())
    }

    /// Compiles a filter against the columns of `table_name`
    pub fn build_and(
        &self,
        filter: &Where,
        table_name: &str,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
    ) -> Result<ChainBuilder<D>> {
        ChainBuilder::from_where(
            filter,
            &self.select.complete_table_name(table_name),
            fields,
            temporal_properties,
        )
    }
}

impl<D: SqlDialect> Default for EntitySelectQueryBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Deref for EntitySelectQueryBuilder<D> {
    type Target = SelectQueryBuilder<D>;

    fn deref(&self) -> &Self::Target {
        &self.select
    }
}

impl<D> DerefMut for EntitySelectQueryBuilder<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.select
    }
}

impl<D: SqlDialect> QueryBuilder for EntitySelectQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        self.select.build_fragment()
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.select.get_query_value_factories()
    }

    fn build_query_string(&self) -> Result<String> {
        self.select.build_query_string()
    }
}

struct InsertColumn {
    property_name: String,
    temporal_type: Option<TemporalType>,
}

/// Columns written for an entity: insertable or updatable fields, one per
/// column, where a plain field wins over the joined field sharing its column
fn writable_columns<'a>(
    fields: &'a [EntityField],
    temporal_properties: &[TemporalProperty],
    writable: impl Fn(&EntityField) -> bool,
) -> Vec<(&'a EntityField, Option<TemporalType>)> {
    let mut columns: Vec<(&EntityField, Option<TemporalType>)> = Vec::new();
    for field in fields.iter().filter(|field| writable(*field)) {
        let shadowed = field.is_joined_entity()
            && fields
                .iter()
                .any(|other| !other.is_joined_entity() && other.column_name == field.column_name);
        if shadowed || columns.iter().any(|(seen, _)| seen.column_name == field.column_name) {
            continue;
        }
        columns.push((field, resolve_temporal_type(field, temporal_properties)));
    }
    columns
}

/// INSERT builder fed with entities
///
/// The column list is fixed by the first appended entity; properties
/// missing from later entities are written as `NULL`.
pub struct EntityInsertQueryBuilder<D> {
    insert: InsertQueryBuilder<D>,
    columns: Vec<InsertColumn>,
}

impl<D: SqlDialect> EntityInsertQueryBuilder<D> {
    pub fn new(table_name: impl Into<String>) -> Self {
        let mut insert = InsertQueryBuilder::new();
        insert.set_into_table(table_name);
        Self {
            insert,
            columns: Vec::new(),
        }
    }

    /// Appends one row; `ignored_properties` are left out of the column
    /// list when it is fixed by the first row
    pub fn append_entity(
        &mut self,
        entity: &Entity,
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
        ignored_properties: &[&str],
    ) -> Result<()> {
        if self.insert.row_count() == 0 {
            for (field, temporal_type) in
                writable_columns(fields, temporal_properties, EntityField::is_insertable)
            {
                if ignored_properties.contains(&field.property_name.as_str()) {
                    continue;
                }
                self.insert.add_column(field.column_name.clone());
                self.columns.push(InsertColumn {
                    property_name: field.property_name.clone(),
                    temporal_type,
                });
            }
            if self.columns.is_empty() {
                return Err(PersisterError::Builder(
                    "Entity has no insertable fields".to_string(),
                ));
            }
        }

        let mut row = ValueListBuilder::new();
        for column in &self.columns {
            let value = entity
                .get(&column.property_name)
                .cloned()
                .unwrap_or(Value::Null);
            match column.temporal_type {
                Some(temporal_type) => row.set_param_as_temporal(value, temporal_type),
                None => row.set_param(value),
            }
        }
        self.insert.add_value_list(row);
        Ok(())
    }

    pub fn append_entity_list(
        &mut self,
        entities: &[Entity],
        fields: &[EntityField],
        temporal_properties: &[TemporalProperty],
        ignored_properties: &[&str],
    ) -> Result<()> {
        for entity in entities {
            self.append_entity(entity, fields, temporal_properties, ignored_properties)?;
        }
        Ok(())
    }

    pub fn set_returning_column(&mut self, column_name: impl Into<String>) {
        self.insert.set_returning_column(column_name);
    }
}

impl<D: SqlDialect> QueryBuilder for EntityInsertQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        self.insert.build_fragment()
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.insert.get_query_value_factories()
    }

    fn build_query_string(&self) -> Result<String> {
        self.insert.build_query_string()
    }
}

/// UPDATE of every updatable column of one entity, matched by id
pub struct EntityUpdateQueryBuilder<D> {
    update: UpdateQueryBuilder<D>,
}

impl<D: SqlDialect> EntityUpdateQueryBuilder<D> {
    pub fn create(table_name: &str, entity: &Entity, metadata: &EntityMetadata) -> Result<Self> {
        let id = entity.id(metadata).cloned().ok_or_else(|| {
            PersisterError::Integrity(format!(
                "Cannot update entity in table \"{}\" without \"{}\"",
                metadata.table_name(),
                metadata.id_property_name()
            ))
        })?;

        let mut update = UpdateQueryBuilder::new(table_name);
        for (field, temporal_type) in writable_columns(
            metadata.fields(),
            metadata.temporal_properties(),
            EntityField::is_updatable,
        ) {
            if field.column_name == metadata.id_column_name() {
                continue;
            }
            let value = entity
                .get(&field.property_name)
                .cloned()
                .unwrap_or(Value::Null);
            match temporal_type {
                Some(temporal_type) => update.set_temporal(field.column_name.clone(), value, temporal_type),
                None => update.set(field.column_name.clone(), value),
            }
        }

        let mut chain = ChainBuilder::<D>::and();
        chain.set_column_equals(
            table_name,
            metadata.id_column_name(),
            id,
            metadata.temporal_type(metadata.id_property_name()),
        );
        update.set_where_from_query_builder(Box::new(chain));

        Ok(Self { update })
    }
}

impl<D: SqlDialect> QueryBuilder for EntityUpdateQueryBuilder<D> {
    fn build_fragment(&self) -> Result<String> {
        self.update.build_fragment()
    }

    fn get_query_value_factories(&self) -> Result<Vec<QueryValueFactory>> {
        self.update.get_query_value_factories()
    }

    fn build_query_string(&self) -> Result<String> {
        self.update.build_query_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::dialect::{MySqlDialect, PgDialect};
    use serde_json::json;
    use std::sync::Arc;

    fn carts() -> EntityMetadata {
        EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .column("name", "cart_name")
            .one_to_many("cartItems", "cartId", "cart_items")
            .build()
            .unwrap()
    }

    fn cart_items() -> EntityMetadata {
        EntityMetadata::builder("cart_items", "id")
            .column("id", "cart_item_id")
            .column("cartId", "cart_id")
            .field(EntityField::new("createdAt", "created_at").with_definition("TIMESTAMP"))
            .many_to_one("cart", "cart_id", "carts")
            .build()
            .unwrap()
    }

    fn manager() -> PersisterMetadataManager {
        let mut manager = PersisterMetadataManager::new();
        manager.setup_entity_metadata(Arc::new(carts()));
        manager.setup_entity_metadata(Arc::new(cart_items()));
        manager
    }

    #[test]
    fn test_select_with_one_to_many() {
        let metadata = carts();
        let mut builder = EntitySelectQueryBuilder::<MySqlDialect>::new();
        builder.set_from_table("carts");
        builder.set_group_by_column(metadata.id_column_name());
        builder.include_entity_fields("carts", metadata.fields(), metadata.temporal_properties());
        builder
            .set_one_to_many_relations(metadata.one_to_many_relations(), &manager())
            .unwrap();
        let chain = builder
            .build_and(&Where::property_equals("id", "c1"), "carts", metadata.fields(), &[])
            .unwrap();
        builder.set_where_from_query_builder(Box::new(chain));

        assert_eq!(
            builder.build_query_string().unwrap(),
            "SELECT `carts`.`cart_id`, `carts`.`cart_name`, \
             JSON_ARRAYAGG(JSON_OBJECT('cart_item_id', `cart_items`.`cart_item_id`, 'cart_id', `cart_items`.`cart_id`, \
             'created_at', FROM_UNIXTIME(UNIX_TIMESTAMP(`cart_items`.`created_at`), '%Y-%m-%dT%H:%i:%s.000Z'))) AS `cartItems` \
             FROM `carts` \
             LEFT JOIN `cart_items` ON `cart_items`.`cart_id` = `carts`.`cart_id` \
             WHERE `carts`.`cart_id` = ? \
             GROUP BY `carts`.`cart_id`"
        );
        assert_eq!(builder.build_query_values().unwrap(), vec![json!("c1")]);
    }

    #[test]
    fn test_select_with_many_to_one() {
        let metadata = cart_items();
        let mut builder = EntitySelectQueryBuilder::<PgDialect>::new();
        builder.set_from_table("cart_items");
        builder.set_group_by_column(metadata.id_column_name());
        builder.include_entity_fields("cart_items", metadata.fields(), metadata.temporal_properties());
        builder
            .set_many_to_one_relations(metadata.many_to_one_relations(), &manager(), metadata.fields())
            .unwrap();

        assert_eq!(
            builder.build_query_string().unwrap(),
            "SELECT \"cart_items\".\"cart_item_id\", \"cart_items\".\"cart_id\", \
             to_char(\"cart_items\".\"created_at\", 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"') AS \"created_at\", \
             json_agg(json_build_object('cart_id', \"carts\".\"cart_id\", 'cart_name', \"carts\".\"cart_name\"))->0 AS \"cart\" \
             FROM \"cart_items\" \
             LEFT JOIN \"carts\" ON \"carts\".\"cart_id\" = \"cart_items\".\"cart_id\" \
             GROUP BY \"cart_items\".\"cart_item_id\""
        );
    }

    #[test]
    fn test_relations_need_target_metadata() {
        let metadata = carts();
        let mut builder = EntitySelectQueryBuilder::<MySqlDialect>::new();
        builder.set_from_table("carts");
        builder.set_group_by_column("cart_id");

        let err = builder
            .set_one_to_many_relations(metadata.one_to_many_relations(), &PersisterMetadataManager::new())
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_one_to_many_requires_group_by() {
        let metadata = carts();
        let mut builder = EntitySelectQueryBuilder::<MySqlDialect>::new();
        builder.set_from_table("carts");

        let err = builder
            .set_one_to_many_relations(metadata.one_to_many_relations(), &manager())
            .unwrap_err();
        assert!(matches!(err, PersisterError::Builder(_)));
    }

    #[test]
    fn test_insert_entities() {
        let metadata = cart_items();
        let first = Entity::new()
            .with("cartId", "c1")
            .with("createdAt", "2023-01-01T10:00:00+01:00");
        let second = Entity::new().with("cartId", "c2");
        let mut builder = EntityInsertQueryBuilder::<PgDialect>::new("cart_items");
        builder
            .append_entity_list(
                &[first, second],
                metadata.fields(),
                metadata.temporal_properties(),
                &["id"],
            )
            .unwrap();
        builder.set_returning_column("cart_item_id");

        let (sql, values) = builder.build().unwrap();

        assert_eq!(
            sql,
            "INSERT INTO \"cart_items\" (\"cart_id\", \"created_at\") \
             VALUES ($1, $2::timestamptz), ($3, NULL) RETURNING \"cart_item_id\""
        );
        assert_eq!(
            values,
            vec![json!("c1"), json!("2023-01-01T09:00:00.000Z"), json!("c2")]
        );
    }

    #[test]
    fn test_insert_skips_non_insertable() {
        let metadata = EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .field(EntityField::new("total", "total").with_insertable(false))
            .build()
            .unwrap();
        let mut builder = EntityInsertQueryBuilder::<MySqlDialect>::new("carts");
        builder
            .append_entity(&Entity::new().with("id", 1).with("total", 5), metadata.fields(), &[], &[])
            .unwrap();

        assert_eq!(
            builder.build_query_string().unwrap(),
            "INSERT INTO `carts` (`cart_id`) VALUES (?)"
        );
    }

    #[test]
    fn test_update_entity() {
        let metadata = EntityMetadata::builder("carts", "id")
            .column("id", "cart_id")
            .column("name", "cart_name")
            .field(EntityField::new("createdBy", "created_by").with_updatable(false))
            .build()
            .unwrap();
        let entity = Entity::new().with("id", 3).with("name", "weekly");

        let builder = EntityUpdateQueryBuilder::<MySqlDialect>::create("carts", &entity, &metadata).unwrap();
        let (sql, values) = builder.build().unwrap();

        assert_eq!(
            sql,
            "UPDATE `carts` SET `cart_name` = ? WHERE `carts`.`cart_id` = ?"
        );
        assert_eq!(values, vec![json!("weekly"), json!(3)]);

        let missing_id = Entity::new().with("name", "weekly");
        let err = EntityUpdateQueryBuilder::<MySqlDialect>::create("carts", &missing_id, &metadata)
            .err()
            .unwrap();
        assert!(err.is_integrity());
    }
}
