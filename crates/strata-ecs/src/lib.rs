#![allow(clippy::missing_panics_doc)]

//! Strata ECS - columnar entity-component storage.
//!
//! # Key Concepts
//!
//! - **Entity**: persistent (`>= 0`) or transient (`< 0`) handle to one row
//! - **Component**: named column described by a [`Schema`](strata_buffer::Schema)
//! - **Archetype**: a table of rows sharing one component set
//! - **Location table**: entity -> `(archetype, row)`, with a free list
//! - **Resource**: a singleton component held by a dedicated entity
//!
//! Rows with the `transient` marker component live in archetypes that
//! allocate from the transient location table, so speculative entities
//! never collide with persistent ones.

mod archetype;
mod component;
mod config;
mod entity;
mod error;
mod location;
mod store;

pub use archetype::{Archetype, ArchetypeData, ArchetypeId, ArchetypeStorage, ComponentSet, Row};
pub use component::{ComponentId, ComponentInfo, ComponentRegistry};
pub use config::StoreConfig;
pub use entity::{Entity, EntityIndex, EntityKind};
pub use error::{EcsError, EcsResult};
pub use location::{EntityLocation, EntityLocationData, EntityLocationTable};
pub use store::{Patch, Store, StoreData};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{ComponentId, Entity, Patch, Row, Store, StoreConfig};
}
