//! Entity location tables.
//!
//! Maps each live entity to its `(archetype, row)`. Slots are stored as flat
//! `i32` pairs. A freed slot has archetype `-1` and stores the index of the
//! next free slot in its row half, forming a singly linked free list that is
//! drained before the table grows. Capacity doubles on exhaustion.

use serde::{Deserialize, Serialize};

use crate::{
    archetype::ArchetypeId,
    entity::{Entity, EntityIndex, EntityKind},
    error::{EcsError, EcsResult},
};

const FREE: i32 = -1;
const END_OF_LIST: i32 = -1;

/// Where an entity's row lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

impl EntityLocation {
    #[must_use]
    pub const fn new(archetype: ArchetypeId, row: usize) -> Self {
        Self { archetype, row }
    }
}

/// Plain snapshot of a location table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityLocationData {
    /// `(archetype, row | next_free)` pairs, `capacity * 2` long.
    pub entities: Vec<i32>,
    pub free_list_head: i32,
    pub next_index: u32,
    pub capacity: u32,
}

/// Allocator and index for one kind of entity.
#[derive(Clone, Debug)]
pub struct EntityLocationTable {
    kind: EntityKind,
    slots: Vec<i32>,
    free_list_head: i32,
    next_index: u32,
    live: u32,
}

impl EntityLocationTable {
    /// Create a table issuing entities of `kind`.
    #[must_use]
    pub fn new(kind: EntityKind, capacity: usize) -> Self {
        Self {
            kind,
            slots: vec![0; capacity * 2],
            free_list_head: END_OF_LIST,
            next_index: 0,
            live: 0,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Allocated slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len() / 2
    }

    /// Number of live entities.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocate an entity at `location`, reusing a freed slot when possible.
    pub fn create(&mut self, location: EntityLocation) -> EcsResult<Entity> {
        let (archetype, row) = encode(location)?;

        let index = if self.free_list_head == END_OF_LIST {
            let index = self.next_index;
            if index as usize >= self.capacity() {
                self.grow();
            }
            self.next_index += 1;
            index
        } else {
            let index = self.free_list_head as u32;
            self.free_list_head = self.slots[index as usize * 2 + 1];
            index
        };

        let slot = index as usize * 2;
        self.slots[slot] = archetype;
        self.slots[slot + 1] = row;
        self.live += 1;
        Ok(Entity::new(self.kind, index))
    }

    /// Free `entity`'s slot. Its lookups return `None` afterwards.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<()> {
        let index = self.live_index(entity)?;
        let slot = index as usize * 2;
        self.slots[slot] = FREE;
        self.slots[slot + 1] = self.free_list_head;
        self.free_list_head = index as i32;
        self.live -= 1;
        Ok(())
    }

    /// Current location of `entity`, or `None` if it is not live.
    ///
    /// Entities of the other kind are rejected.
    pub fn locate(&self, entity: Entity) -> EcsResult<Option<EntityLocation>> {
        let index = self.checked_index(entity)?;
        Ok(self.locate_index(index))
    }

    pub(crate) fn locate_index(&self, index: EntityIndex) -> Option<EntityLocation> {
        if index >= self.next_index {
            return None;
        }
        let slot = index as usize * 2;
        let archetype = self.slots[slot];
        if archetype < 0 {
            return None;
        }
        Some(EntityLocation {
            archetype: ArchetypeId::from_raw(archetype as u32),
            row: self.slots[slot + 1] as usize,
        })
    }

    /// Point a live entity at a new location after its row moved.
    pub fn update(&mut self, entity: Entity, location: EntityLocation) -> EcsResult<()> {
        let index = self.live_index(entity)?;
        let (archetype, row) = encode(location)?;
        let slot = index as usize * 2;
        self.slots[slot] = archetype;
        self.slots[slot + 1] = row;
        Ok(())
    }

    /// Live entities and their locations, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        (0..self.next_index).filter_map(|index| {
            self.locate_index(index)
                .map(|location| (Entity::new(self.kind, index), location))
        })
    }

    #[must_use]
    pub fn to_data(&self) -> EntityLocationData {
        EntityLocationData {
            entities: self.slots.clone(),
            free_list_head: self.free_list_head,
            next_index: self.next_index,
            capacity: self.capacity() as u32,
        }
    }

    /// Rebuild a table of `kind` from a snapshot.
    pub fn from_data(kind: EntityKind, data: EntityLocationData) -> EcsResult<Self> {
        if data.entities.len() != data.capacity as usize * 2 {
            return Err(EcsError::InvalidSnapshot(format!(
                "{} location slots for capacity {}",
                data.entities.len(),
                data.capacity
            )));
        }
        if data.next_index > data.capacity || data.free_list_head >= data.next_index as i32 {
            return Err(EcsError::InvalidSnapshot(
                "location table indices exceed capacity".to_owned(),
            ));
        }
        let live = data.entities[..data.next_index as usize * 2]
            .chunks_exact(2)
            .filter(|pair| pair[0] >= 0)
            .count() as u32;
        Ok(Self {
            kind,
            slots: data.entities,
            free_list_head: data.free_list_head,
            next_index: data.next_index,
            live,
        })
    }

    fn grow(&mut self) {
        let capacity = match self.capacity() {
            0 => strata_buffer::DEFAULT_CAPACITY,
            n => n * 2,
        };
        self.slots.resize(capacity * 2, 0);
    }

    fn checked_index(&self, entity: Entity) -> EcsResult<EntityIndex> {
        if entity.kind() == self.kind {
            Ok(entity.index())
        } else {
            Err(EcsError::WrongEntityKind {
                entity,
                expected: self.kind,
            })
        }
    }

    fn live_index(&self, entity: Entity) -> EcsResult<EntityIndex> {
        let index = self.checked_index(entity)?;
        match self.locate_index(index) {
            Some(_) => Ok(index),
            None => Err(EcsError::DeadEntity(entity)),
        }
    }
}

fn encode(location: EntityLocation) -> EcsResult<(i32, i32)> {
    let row = i32::try_from(location.row).map_err(|_| EcsError::RowOverflow(location.row))?;
    Ok((location.archetype.as_raw() as i32, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(archetype: u32, row: usize) -> EntityLocation {
        EntityLocation::new(ArchetypeId::from_raw(archetype), row)
    }

    #[test]
    fn test_create_locate_delete() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 16);
        let a = table.create(at(0, 0)).unwrap();
        let b = table.create(at(0, 1)).unwrap();

        assert_eq!(a, Entity::Persistent(0));
        assert_eq!(b, Entity::Persistent(1));
        assert_eq!(table.locate(b).unwrap(), Some(at(0, 1)));

        table.delete(a).unwrap();
        assert_eq!(table.locate(a).unwrap(), None);
        assert_eq!(table.len(), 1);
        assert_eq!(table.locate(Entity::Persistent(40)).unwrap(), None);
    }

    #[test]
    fn test_free_list_reuses_most_recent_first() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 4);
        let entities: Vec<_> = (0..4).map(|row| table.create(at(1, row)).unwrap()).collect();

        table.delete(entities[1]).unwrap();
        table.delete(entities[3]).unwrap();

        assert_eq!(table.create(at(2, 0)).unwrap(), entities[3]);
        assert_eq!(table.create(at(2, 1)).unwrap(), entities[1]);
        assert_eq!(table.create(at(2, 2)).unwrap(), Entity::Persistent(4));
    }

    #[test]
    fn test_capacity_doubles() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 2);
        for row in 0..3 {
            table.create(at(0, row)).unwrap();
        }
        assert_eq!(table.capacity(), 4);

        let mut empty = EntityLocationTable::new(EntityKind::Transient, 0);
        empty.create(at(0, 0)).unwrap();
        assert_eq!(empty.capacity(), strata_buffer::DEFAULT_CAPACITY);
    }

    #[test]
    fn test_rejects_wrong_kind_and_dead_slots() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 4);
        let entity = table.create(at(0, 0)).unwrap();

        assert!(matches!(
            table.locate(Entity::Transient(0)),
            Err(EcsError::WrongEntityKind { .. })
        ));
        assert_eq!(
            table.update(Entity::Persistent(3), at(0, 0)),
            Err(EcsError::DeadEntity(Entity::Persistent(3)))
        );

        table.delete(entity).unwrap();
        assert_eq!(table.delete(entity), Err(EcsError::DeadEntity(entity)));
    }

    #[test]
    fn test_transient_table_issues_transient_entities() {
        let mut table = EntityLocationTable::new(EntityKind::Transient, 4);
        let entity = table.create(at(3, 0)).unwrap();
        assert_eq!(entity, Entity::Transient(0));
        assert_eq!(entity.to_raw(), -1);
        assert_eq!(table.locate(entity).unwrap(), Some(at(3, 0)));
    }

    #[test]
    fn test_update_moves_entity() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 4);
        let entity = table.create(at(0, 5)).unwrap();
        table.update(entity, at(2, 1)).unwrap();
        assert_eq!(table.locate(entity).unwrap(), Some(at(2, 1)));
    }

    #[test]
    fn test_data_round_trip() {
        let mut table = EntityLocationTable::new(EntityKind::Persistent, 2);
        let entities: Vec<_> = (0..5).map(|row| table.create(at(0, row)).unwrap()).collect();
        table.delete(entities[2]).unwrap();

        let data = table.to_data();
        assert_eq!(data.capacity, 8);
        assert_eq!(data.next_index, 5);
        assert_eq!(data.free_list_head, 2);

        let mut restored = EntityLocationTable::from_data(EntityKind::Persistent, data).unwrap();
        for &entity in &entities {
            assert_eq!(restored.locate(entity).unwrap(), table.locate(entity).unwrap());
        }
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.create(at(1, 0)).unwrap(), entities[2]);
    }

    #[test]
    fn test_from_data_validates_shape() {
        let data = EntityLocationData {
            entities: vec![0; 6],
            free_list_head: -1,
            next_index: 0,
            capacity: 4,
        };
        assert!(matches!(
            EntityLocationTable::from_data(EntityKind::Persistent, data),
            Err(EcsError::InvalidSnapshot(_))
        ));
    }
}
