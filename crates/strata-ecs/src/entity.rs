//! Entity handles.
//!
//! An entity indexes one of two allocation tables. Persistent entities come
//! from the authoritative table; transient entities are speculative and come
//! from a separate table so locally created ids never collide with ids an
//! authoritative source assigns. On the wire both share one signed 32-bit
//! space: persistent `i` is `i`, transient `i` is `-1 - i`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw slot index inside a location table.
pub type EntityIndex = u32;

/// Which allocation table an entity belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Persistent,
    Transient,
}

/// A handle to a row somewhere in the store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Entity {
    Persistent(EntityIndex),
    Transient(EntityIndex),
}

impl Entity {
    #[must_use]
    pub const fn new(kind: EntityKind, index: EntityIndex) -> Self {
        match kind {
            EntityKind::Persistent => Self::Persistent(index),
            EntityKind::Transient => Self::Transient(index),
        }
    }

    #[must_use]
    pub const fn kind(self) -> EntityKind {
        match self {
            Self::Persistent(_) => EntityKind::Persistent,
            Self::Transient(_) => EntityKind::Transient,
        }
    }

    /// Slot index within the entity's own table.
    #[must_use]
    pub const fn index(self) -> EntityIndex {
        match self {
            Self::Persistent(index) | Self::Transient(index) => index,
        }
    }

    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Signed wire form.
    #[must_use]
    pub const fn to_raw(self) -> i32 {
        match self {
            Self::Persistent(index) => index as i32,
            Self::Transient(index) => -1 - index as i32,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        if raw >= 0 {
            Self::Persistent(raw as u32)
        } else {
            Self::Transient((-1 - raw) as u32)
        }
    }

    /// The value stored in the `id` column.
    #[must_use]
    pub fn to_value(self) -> Value {
        Value::from(self.to_raw())
    }

    /// Parse an `id` column value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let raw = i32::try_from(value.as_i64()?).ok()?;
        Some(Self::from_raw(raw))
    }
}

impl From<i32> for Entity {
    fn from(raw: i32) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Entity> for i32 {
    fn from(entity: Entity) -> Self {
        entity.to_raw()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistent(index) => write!(f, "Entity({index})"),
            Self::Transient(index) => write!(f, "Entity(t{index})"),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}
