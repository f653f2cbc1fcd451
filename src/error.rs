use thiserror::Error;

pub type Result<T> = std::result::Result<T, PersisterError>;

#[derive(Debug, Error)]
pub enum PersisterError {
    /// Missing or unresolvable metadata, relation, column or join target
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Duplicate ids, missing ids and dangling relations
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A builder was rendered before it was fully set up
    #[error("Builder error: {0}")]
    Builder(String),

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(any(feature = "mysql", feature = "postgres"))]
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl PersisterError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, PersisterError::Metadata(_))
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, PersisterError::Integrity(_))
    }
}
