//! Database-specific error types and conversions.

use tvm_core::error::TvmError;

/// Marker embedded in `THROW` messages raised inside grant transactions.
pub(crate) const ENTITY_NOT_FOUND_MARKER: &str = "entity_not_found:";

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Record already exists: {entity}")]
    Conflict { entity: String },
}

impl DbError {
    /// Classify a statement error reported by `check()`.
    pub(crate) fn from_statement(entity: &str, err: surrealdb::Error) -> Self {
        let msg = err.to_string();
        if is_conflict_message(&msg) {
            DbError::Conflict {
                entity: entity.into(),
            }
        } else {
            DbError::Query(msg)
        }
    }
}

/// Unique-index and duplicate-record violations both surface as text.
pub(crate) fn is_conflict_message(msg: &str) -> bool {
    msg.contains("already exists") || msg.contains("already contains")
}

impl From<DbError> for TvmError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => TvmError::EntityNotFound {
                entity: format!("{entity} {id}"),
            },
            DbError::Conflict { entity } => TvmError::AlreadyExists { entity },
            other => TvmError::StoreFailure(other.to_string()),
        }
    }
}
