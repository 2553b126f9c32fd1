//! Store error types.

use strata_buffer::BufferError;
use thiserror::Error;

use crate::{
    archetype::ArchetypeId,
    component::ComponentId,
    entity::{Entity, EntityKind},
};

/// Store error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EcsError {
    /// Column construction or write failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Entity handed to the location table of the other kind.
    #[error("entity {entity} is not {expected:?}")]
    WrongEntityKind { entity: Entity, expected: EntityKind },

    /// Slot is beyond the allocated range or already free.
    #[error("entity {0} is not allocated")]
    DeadEntity(Entity),

    /// Entity has no location (the not-found case of operations that
    /// cannot return `None`).
    #[error("entity not found: {0}")]
    EntityNotFound(Entity),

    #[error("row {row} out of bounds for {len} rows")]
    RowOutOfBounds { row: usize, len: usize },

    /// Row index does not fit the location table's signed slots.
    #[error("row {0} exceeds location table range")]
    RowOverflow(usize),

    #[error("unknown archetype {0:?}")]
    UnknownArchetype(ArchetypeId),

    #[error("component {component:?} is not part of archetype {archetype:?}")]
    NotInArchetype {
        component: ComponentId,
        archetype: ArchetypeId,
    },

    #[error("archetype must contain the id component")]
    MissingIdComponent,

    #[error("unknown component {0:?}")]
    UnknownComponent(ComponentId),

    #[error("component `{0}` is already registered with a different schema")]
    ComponentConflict(String),

    #[error("component `{0}` is reserved and cannot be written")]
    ReservedComponent(&'static str),

    #[error("resource `{0}` is already registered")]
    DuplicateResource(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for store operations.
pub type EcsResult<T> = Result<T, EcsError>;
