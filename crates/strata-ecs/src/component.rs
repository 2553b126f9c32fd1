//! Component registration.
//!
//! Components are named columns with a [`Schema`]. Each store owns a
//! [`ComponentRegistry`] assigning dense ids in registration order. Two ids
//! are reserved and present in every registry:
//!
//! - [`ComponentId::ID`]: the entity handle of each row, column 0 of every
//!   archetype;
//! - [`ComponentId::TRANSIENT`]: a const `true` marker whose archetypes
//!   allocate entities from the transient location table.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_buffer::{BufferKind, Schema, TypedBuffer};
use tracing::debug;

use crate::error::{EcsError, EcsResult};

/// Unique identifier for a component within one registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    /// The entity handle column.
    pub const ID: Self = Self(0);

    /// The transient marker column.
    pub const TRANSIENT: Self = Self(1);

    /// Create a component ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Whether this is one of the engine-managed components.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 <= Self::TRANSIENT.0
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Metadata about a registered component.
#[derive(Clone)]
pub struct ComponentInfo {
    /// Unique identifier
    pub id: ComponentId,
    /// Component name
    pub name: Arc<str>,
    /// Shape description
    pub schema: Arc<Schema>,
    kind: BufferKind,
}

impl ComponentInfo {
    fn new(id: ComponentId, name: &str, schema: Schema) -> EcsResult<Self> {
        let kind = BufferKind::for_schema(&schema)?;
        Ok(Self {
            id,
            name: Arc::from(name),
            schema: Arc::new(schema),
            kind,
        })
    }

    /// Create an empty column for this component.
    #[must_use]
    pub fn create_column(&self, capacity: usize) -> TypedBuffer {
        self.kind.create(&self.schema, capacity)
    }

    /// Variant its columns use: `number`, `array`, `struct` or `const`.
    #[must_use]
    pub const fn buffer_variant(&self) -> &'static str {
        self.kind.name()
    }

    /// Value a slot takes when an insert does not supply one.
    #[must_use]
    pub fn default_value(&self) -> Value {
        self.schema.default_value()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("variant", &self.buffer_variant())
            .finish_non_exhaustive()
    }
}

/// Registry of component names, schemas and column kinds.
#[derive(Clone, Debug)]
pub struct ComponentRegistry {
    components: Vec<ComponentInfo>,
    by_name: FxHashMap<Arc<str>, ComponentId>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    /// Name of [`ComponentId::ID`].
    pub const ID_NAME: &'static str = "id";

    /// Name of [`ComponentId::TRANSIENT`].
    pub const TRANSIENT_NAME: &'static str = "transient";

    /// Create a registry holding only the reserved components.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            components: Vec::new(),
            by_name: FxHashMap::default(),
        };
        let reserved = [
            (Self::ID_NAME, Schema::i32()),
            (
                Self::TRANSIENT_NAME,
                Schema::constant(Value::Bool(true)).mark_transient(),
            ),
        ];
        for (name, schema) in reserved {
            let id = ComponentId(registry.components.len() as u32);
            if let Ok(info) = ComponentInfo::new(id, name, schema) {
                registry.by_name.insert(Arc::clone(&info.name), id);
                registry.components.push(info);
            }
        }
        debug_assert_eq!(registry.components.len(), 2);
        registry
    }

    /// Register a component, or return the existing id when `name` is
    /// already registered with an identical schema.
    pub fn register(&mut self, name: &str, schema: Schema) -> EcsResult<ComponentId> {
        if let Some(&id) = self.by_name.get(name) {
            let existing = &self.components[id.0 as usize];
            if *existing.schema == schema {
                return Ok(id);
            }
            return Err(EcsError::ComponentConflict(name.to_owned()));
        }

        let id = ComponentId(self.components.len() as u32);
        let info = ComponentInfo::new(id, name, schema)?;
        debug!(component = name, ?id, variant = info.buffer_variant(), "registered component");
        self.by_name.insert(Arc::clone(&info.name), id);
        self.components.push(info);
        Ok(id)
    }

    /// Get component ID by name.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Get component info by ID.
    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id.0 as usize)
    }

    /// Get component info by ID or fail.
    pub fn info(&self, id: ComponentId) -> EcsResult<&ComponentInfo> {
        self.get(id).ok_or(EcsError::UnknownComponent(id))
    }

    #[must_use]
    pub fn name(&self, id: ComponentId) -> Option<&str> {
        self.get(id).map(|info| &*info.name)
    }

    /// Number of registered components, reserved ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.components.iter()
    }
}
