//! Database error types.

use strata_ecs::{ComponentId, EcsError, Entity};
use thiserror::Error;

/// Database error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// Transactional update or delete of an entity that is not live.
    #[error("entity not found: {0}")]
    EntityNotFound(Entity),

    #[error("component {0:?} is not a registered resource")]
    UnknownResource(ComponentId),

    #[error("unknown transaction `{0}`")]
    UnknownTransaction(String),

    #[error("transaction `{0}` is already registered")]
    DuplicateTransaction(String),

    /// A transaction failed and undoing its recorded work failed too.
    #[error("rollback after `{source}` failed: {rollback}")]
    RollbackFailed {
        source: Box<DbError>,
        rollback: Box<DbError>,
    },

    /// Raised by a transaction function to abandon its own work.
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
