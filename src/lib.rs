//! entity-persister - metadata-driven entity persistence
//!
//! entity-persister stores entities described by [`EntityMetadata`] in an
//! in-memory store or in a SQL database, behind one [`Persister`] contract.
//!
//! # Architecture
//!
//! - **Metadata**: tables, columns, id, relations and temporal properties,
//!   assembled once with [`EntityMetadataBuilder`]
//! - **Filters**: a backend independent [`Where`] tree and a [`Sort`] list
//! - **Query builders**: parameterized SQL for MySQL and PostgreSQL, with
//!   relations joined and projected as JSON
//! - **Persisters**: [`MemoryPersister`] and the generic [`SqlPersister`]
//!
//! # Example
//!
//! ```rust,no_run
//! use entity_persister::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let carts = Arc::new(
//!         EntityMetadata::builder("carts", "id")
//!             .column("id", "cart_id")
//!             .column("name", "cart_name")
//!             .one_to_many("cartItems", "cartId", "cart_items")
//!             .build()?,
//!     );
//!     let items = Arc::new(
//!         EntityMetadata::builder("cart_items", "id")
//!             .column("id", "cart_item_id")
//!             .column("cartId", "cart_id")
//!             .column("name", "cart_item_name")
//!             .build()?,
//!     );
//!
//!     let mut persister = MemoryPersister::new();
//!     persister.setup_entity_metadata(carts.clone());
//!     persister.setup_entity_metadata(items.clone());
//!
//!     let cart = persister
//!         .insert_one(&carts, &Entity::new().with("name", "Groceries"))
//!         .await?;
//!     let cart_id = cart.get("id").cloned().unwrap_or_default();
//!     persister
//!         .insert_one(&items, &Entity::new().with("cartId", cart_id.clone()).with("name", "Milk"))
//!         .await?;
//!
//!     let cart = persister
//!         .find_by(&carts, &Where::property_equals("id", cart_id), None)
//!         .await?;
//!     println!("{:?}", cart);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backend Support
//!
//! SQL backends are enabled via Cargo features:
//!
//! ```toml
//! [dependencies]
//! entity-persister = { version = "0.1", features = ["mysql", "postgres"] }
//! ```

pub mod backend;
pub mod entity;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod metadata_manager;
pub mod persister;
pub mod predicate;
pub mod query;
pub mod sort;
pub mod sql;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use backend::{DatabaseBackend, QueryResult, QueryRow};
pub use entity::Entity;
pub use error::{PersisterError, Result};
pub use memory::{MemoryIdType, MemoryPersister, MemoryPersisterConfig};
pub use metadata::{
    EntityCallbackType, EntityField, EntityFieldType, EntityMetadata, EntityMetadataBuilder,
    EntityRelationManyToOne, EntityRelationOneToMany, TemporalProperty, TemporalType,
};
pub use metadata_manager::PersisterMetadataManager;
pub use persister::Persister;
pub use predicate::{LogicalOp, Where};
pub use query::{MySqlDialect, PgDialect, QueryBuilder, SqlDialect};
pub use sort::{Sort, SortDirection, SortOrder};
pub use sql::{SqlPersister, SqlPersisterConfig};

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

/// Prelude for common imports
pub mod prelude {
    pub use crate::entity::Entity;
    pub use crate::error::{PersisterError, Result};
    pub use crate::memory::{MemoryIdType, MemoryPersister, MemoryPersisterConfig};
    pub use crate::metadata::{EntityCallbackType, EntityField, EntityMetadata, TemporalType};
    pub use crate::persister::Persister;
    pub use crate::predicate::Where;
    pub use crate::sort::{Sort, SortDirection};
    pub use crate::sql::{SqlPersister, SqlPersisterConfig};

    #[cfg(feature = "mysql")]
    pub use crate::mysql::MySqlBackend;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PostgresBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _config = MemoryPersisterConfig::default();
        let _sql_config = SqlPersisterConfig::default();
        let _sort = Sort::asc("id");
        let _log_op = LogicalOp::And;
        assert_eq!(<PgDialect as SqlDialect>::NAME, "PostgreSQL");
    }
}
