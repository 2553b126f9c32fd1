//! Archetype storage - tables of entities with identical component sets.
//!
//! An archetype owns one [`TypedBuffer`] per component, the `id` column
//! first. Every column shares one row capacity and grows with the others,
//! doubling on exhaustion. Rows are removed by moving the last row into the
//! hole.

use std::{collections::BTreeMap, fmt};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use strata_buffer::{DEFAULT_CAPACITY, TypedBuffer};
use tracing::{debug, trace, warn};

use crate::{
    component::{ComponentId, ComponentRegistry},
    entity::Entity,
    error::{EcsError, EcsResult},
    location::{EntityLocation, EntityLocationTable},
};

/// Component values of one row, keyed by component.
pub type Row = BTreeMap<ComponentId, Value>;

/// Sorted component set identifying an archetype.
pub type ComponentSet = SmallVec<[ComponentId; 8]>;

/// Unique identifier for an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Create an archetype ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

/// Plain snapshot of an archetype's columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchetypeData {
    pub components: Vec<ComponentId>,
    pub columns: Vec<TypedBuffer>,
    pub row_count: usize,
    pub row_capacity: usize,
}

/// An archetype - a table storing entities with the same component set.
#[derive(Clone)]
pub struct Archetype {
    /// Unique identifier for this archetype.
    id: ArchetypeId,
    /// Sorted list of component IDs in this archetype.
    components: ComponentSet,
    /// Component columns, indexed in same order as `components`.
    columns: Vec<TypedBuffer>,
    /// Map from ComponentId to column index for fast lookup.
    component_indices: FxHashMap<ComponentId, usize>,
    row_count: usize,
    row_capacity: usize,
}

impl Archetype {
    /// Create an archetype with the given component types.
    ///
    /// Components are sorted and deduplicated. The set must contain
    /// [`ComponentId::ID`].
    pub fn new(
        id: ArchetypeId,
        component_ids: &[ComponentId],
        registry: &ComponentRegistry,
        capacity: usize,
    ) -> EcsResult<Self> {
        let components = normalize(component_ids);
        if components.first() != Some(&ComponentId::ID) {
            return Err(EcsError::MissingIdComponent);
        }

        let mut component_indices = FxHashMap::default();
        let mut columns = Vec::with_capacity(components.len());
        for (idx, &comp_id) in components.iter().enumerate() {
            columns.push(registry.info(comp_id)?.create_column(capacity));
            component_indices.insert(comp_id, idx);
        }

        Ok(Self {
            id,
            components,
            columns,
            component_indices,
            row_count: 0,
            row_capacity: capacity,
        })
    }

    /// Get the archetype ID.
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Get the sorted component IDs.
    #[must_use]
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// Check if this archetype contains a component.
    #[must_use]
    pub fn has(&self, component: ComponentId) -> bool {
        self.component_indices.contains_key(&component)
    }

    /// Whether rows here are speculative and allocate transient entities.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.has(ComponentId::TRANSIENT)
    }

    /// Number of live rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Slots allocated in every column.
    #[must_use]
    pub const fn row_capacity(&self) -> usize {
        self.row_capacity
    }

    #[must_use]
    pub fn column(&self, component: ComponentId) -> Option<&TypedBuffer> {
        self.component_indices
            .get(&component)
            .map(|&idx| &self.columns[idx])
    }

    /// Columns paired with their component.
    pub fn columns(&self) -> impl Iterator<Item = (ComponentId, &TypedBuffer)> {
        self.components.iter().copied().zip(&self.columns)
    }

    /// Entity stored at `row`.
    #[must_use]
    pub fn entity(&self, row: usize) -> Option<Entity> {
        if row >= self.row_count {
            return None;
        }
        Entity::from_value(&self.columns[0].get(row))
    }

    /// Entities in row order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        (0..self.row_count).filter_map(|row| self.entity(row))
    }

    /// Value of one component at `row`.
    #[must_use]
    pub fn get(&self, row: usize, component: ComponentId) -> Option<Value> {
        if row >= self.row_count {
            return None;
        }
        self.column(component).map(|column| column.get(row))
    }

    /// All component values at `row`, the `id` column included.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<Row> {
        if row >= self.row_count {
            return None;
        }
        Some(
            self.columns()
                .map(|(component, column)| (component, column.get(row)))
                .collect(),
        )
    }

    /// Append a row and allocate its entity from `locations`.
    ///
    /// Components missing from `values` take their schema default; values
    /// for components outside this archetype are ignored.
    pub fn insert(
        &mut self,
        values: &Row,
        locations: &mut EntityLocationTable,
    ) -> EcsResult<Entity> {
        let row = self.add_row(values)?;
        let entity = match locations.create(EntityLocation::new(self.id, row)) {
            Ok(entity) => entity,
            Err(err) => {
                self.row_count -= 1;
                return Err(err);
            }
        };
        self.columns[0].set(row, &entity.to_value())?;
        trace!(archetype = ?self.id, row, %entity, "inserted row");
        Ok(entity)
    }

    /// Append a row without allocating an entity. Returns the row index.
    pub(crate) fn add_row(&mut self, values: &Row) -> EcsResult<usize> {
        if self.row_count == self.row_capacity {
            self.grow();
        }
        let row = self.row_count;
        for (idx, column) in self.columns.iter_mut().enumerate() {
            let component = self.components[idx];
            if let Some(value) = values.get(&component) {
                column.set(row, value)?;
            } else {
                let default = column.schema().default_value();
                column.set(row, &default)?;
            }
        }
        self.row_count += 1;
        Ok(row)
    }

    /// Overwrite the supplied components at `row`.
    ///
    /// All or nothing: if any value is rejected, the columns already written
    /// get their previous values back.
    pub fn update_row(&mut self, row: usize, values: &Row) -> EcsResult<()> {
        self.check_row(row)?;
        let mut written: Vec<(usize, Value)> = Vec::with_capacity(values.len());
        for (component, value) in values {
            let Some(&idx) = self.component_indices.get(component) else {
                continue;
            };
            // a struct write can fail halfway through its own fields
            written.push((idx, self.columns[idx].get(row)));
            if let Err(err) = self.columns[idx].set(row, value) {
                for (idx, previous) in written.into_iter().rev() {
                    if let Err(restore) = self.columns[idx].set(row, &previous) {
                        warn!(archetype = ?self.id, row, %restore, "failed to restore column");
                    }
                }
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Remove `row` by moving the last row into it.
    ///
    /// Returns the entity that moved into `row`, if any, so its location
    /// can be updated. The removed entity's own location is untouched.
    pub fn delete_row(&mut self, row: usize) -> EcsResult<Option<Entity>> {
        self.check_row(row)?;
        let last = self.row_count - 1;
        if row != last {
            for column in &mut self.columns {
                column.copy_within(row, last, last + 1);
            }
        }
        self.row_count -= 1;
        Ok(if row == last { None } else { self.entity(row) })
    }

    /// Shrink every column to the current row count.
    pub fn compact(&mut self) {
        if self.row_capacity > self.row_count {
            debug!(
                archetype = ?self.id,
                from = self.row_capacity,
                to = self.row_count,
                "compacting archetype"
            );
            self.resize(self.row_count);
        }
    }

    #[must_use]
    pub fn to_data(&self) -> ArchetypeData {
        ArchetypeData {
            components: self.components.to_vec(),
            columns: self.columns.clone(),
            row_count: self.row_count,
            row_capacity: self.row_capacity,
        }
    }

    /// Replace this archetype's contents with a snapshot of the same shape.
    pub fn from_data(&mut self, data: ArchetypeData) -> EcsResult<()> {
        if data.components.as_slice() != self.components.as_slice() {
            return Err(EcsError::InvalidSnapshot(format!(
                "component set {:?} does not match {:?}",
                data.components, self.components
            )));
        }
        if data.row_count > data.row_capacity
            || data.columns.len() != self.columns.len()
            || data
                .columns
                .iter()
                .any(|column| column.capacity() != data.row_capacity)
        {
            return Err(EcsError::InvalidSnapshot(
                "column capacities do not match row capacity".to_owned(),
            ));
        }
        self.columns = data.columns;
        self.row_count = data.row_count;
        self.row_capacity = data.row_capacity;
        Ok(())
    }

    fn grow(&mut self) {
        let capacity = match self.row_capacity {
            0 => DEFAULT_CAPACITY,
            n => n * 2,
        };
        trace!(archetype = ?self.id, capacity, "growing archetype");
        self.resize(capacity);
    }

    fn resize(&mut self, capacity: usize) {
        for column in &mut self.columns {
            column.set_capacity(capacity);
        }
        self.row_capacity = capacity;
    }

    fn check_row(&self, row: usize) -> EcsResult<()> {
        if row < self.row_count {
            Ok(())
        } else {
            Err(EcsError::RowOutOfBounds {
                row,
                len: self.row_count,
            })
        }
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("components", &self.components)
            .field("rows", &self.row_count)
            .field("capacity", &self.row_capacity)
            .finish()
    }
}

/// Sort and deduplicate a component list.
#[must_use]
pub fn normalize(components: &[ComponentId]) -> ComponentSet {
    let mut set: ComponentSet = components.iter().copied().collect();
    set.sort_unstable();
    set.dedup();
    set
}

/// Storage for all archetypes, indexed by component set.
#[derive(Clone, Debug, Default)]
pub struct ArchetypeStorage {
    archetypes: Vec<Archetype>,
    archetype_map: FxHashMap<ComponentSet, ArchetypeId>,
}

impl ArchetypeStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Archetype with exactly `components`, if one exists.
    #[must_use]
    pub fn find(&self, components: &[ComponentId]) -> Option<ArchetypeId> {
        self.archetype_map.get(&normalize(components)).copied()
    }

    /// Get or create an archetype for the given component set.
    pub fn get_or_create(
        &mut self,
        components: &[ComponentId],
        registry: &ComponentRegistry,
        capacity: usize,
    ) -> EcsResult<ArchetypeId> {
        let key = normalize(components);
        if let Some(&id) = self.archetype_map.get(&key) {
            return Ok(id);
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        let archetype = Archetype::new(id, &key, registry, capacity)?;
        debug!(?id, components = ?key, transient = archetype.is_transient(), "created archetype");
        self.archetypes.push(archetype);
        self.archetype_map.insert(key, id);
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.0 as usize)
    }

    /// Archetypes containing all of `include` and none of `exclude`.
    pub fn query<'a>(
        &'a self,
        include: &'a [ComponentId],
        exclude: &'a [ComponentId],
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.archetypes.iter().filter(move |archetype| {
            include.iter().all(|&c| archetype.has(c)) && !exclude.iter().any(|&c| archetype.has(c))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.archetypes.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_buffer::Schema;

    use super::*;
    use crate::entity::EntityKind;

    struct Fixture {
        registry: ComponentRegistry,
        locations: EntityLocationTable,
        value: ComponentId,
    }

    fn fixture() -> Fixture {
        let mut registry = ComponentRegistry::new();
        let value = registry.register("value", Schema::i32()).unwrap();
        Fixture {
            registry,
            locations: EntityLocationTable::new(EntityKind::Persistent, 16),
            value,
        }
    }

    fn row(component: ComponentId, value: i32) -> Row {
        Row::from([(component, json!(value))])
    }

    #[test]
    fn test_requires_id_component() {
        let f = fixture();
        let result = Archetype::new(ArchetypeId(0), &[f.value], &f.registry, 4);
        assert!(matches!(result, Err(EcsError::MissingIdComponent)));
    }

    #[test]
    fn test_insert_writes_id_column() {
        let mut f = fixture();
        let mut archetype =
            Archetype::new(ArchetypeId(0), &[ComponentId::ID, f.value], &f.registry, 4).unwrap();

        let entity = archetype.insert(&row(f.value, 10), &mut f.locations).unwrap();
        assert_eq!(archetype.entity(0), Some(entity));
        assert_eq!(archetype.get(0, f.value), Some(json!(10)));
        assert_eq!(
            f.locations.locate(entity).unwrap(),
            Some(EntityLocation::new(ArchetypeId(0), 0))
        );
    }

    #[test]
    fn test_delete_middle_row_moves_last() {
        let mut f = fixture();
        let mut archetype =
            Archetype::new(ArchetypeId(0), &[ComponentId::ID, f.value], &f.registry, 4).unwrap();
        let e1 = archetype.insert(&row(f.value, 10), &mut f.locations).unwrap();
        let e2 = archetype.insert(&row(f.value, 20), &mut f.locations).unwrap();
        let e3 = archetype.insert(&row(f.value, 30), &mut f.locations).unwrap();

        let moved = archetype.delete_row(1).unwrap();
        assert_eq!(moved, Some(e3));
        assert_eq!(archetype.len(), 2);
        assert_eq!(archetype.get(1, f.value), Some(json!(30)));
        assert_eq!(archetype.entities().collect::<Vec<_>>(), [e1, e3]);

        // the caller owns location bookkeeping
        assert_eq!(
            f.locations.locate(e2).unwrap(),
            Some(EntityLocation::new(ArchetypeId(0), 1))
        );
        assert_eq!(archetype.delete_row(1).unwrap(), None);
        assert!(matches!(
            archetype.delete_row(5),
            Err(EcsError::RowOutOfBounds { row: 5, len: 1 })
        ));
    }

    #[test]
    fn test_rejected_update_leaves_row_untouched() {
        let mut f = fixture();
        let mass = f.registry.register("mass", Schema::f32()).unwrap();
        let mut archetype = Archetype::new(
            ArchetypeId(0),
            &[ComponentId::ID, f.value, mass],
            &f.registry,
            4,
        )
        .unwrap();
        let values = Row::from([(f.value, json!(1)), (mass, json!(2.0))]);
        archetype.insert(&values, &mut f.locations).unwrap();

        // `value` sorts first and is written before `mass` fails
        let result = archetype.update_row(0, &Row::from([(f.value, json!(5)), (mass, json!("x"))]));
        assert!(matches!(result, Err(EcsError::Buffer(_))));
        assert_eq!(archetype.get(0, f.value), Some(json!(1)));
        assert_eq!(archetype.get(0, mass), Some(json!(2.0)));
    }

    #[test]
    fn test_growth_doubles_capacity() {
        let mut f = fixture();
        let mut archetype =
            Archetype::new(ArchetypeId(0), &[ComponentId::ID, f.value], &f.registry, 16).unwrap();
        for i in 0..17 {
            archetype.insert(&row(f.value, i), &mut f.locations).unwrap();
        }
        assert_eq!(archetype.row_capacity(), 32);
        assert!(archetype.columns().all(|(_, column)| column.capacity() == 32));
        assert_eq!(archetype.get(16, f.value), Some(json!(16)));
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut f = fixture();
        let mut archetype =
            Archetype::new(ArchetypeId(0), &[ComponentId::ID, f.value], &f.registry, 16).unwrap();
        for i in 0..3 {
            archetype.insert(&row(f.value, i), &mut f.locations).unwrap();
        }
        archetype.compact();
        assert_eq!(archetype.row_capacity(), 3);
        archetype.compact();
        assert_eq!(archetype.row_capacity(), 3);

        // compacted archetypes still grow by doubling
        archetype.insert(&row(f.value, 3), &mut f.locations).unwrap();
        assert_eq!(archetype.row_capacity(), 6);

        let mut empty =
            Archetype::new(ArchetypeId(1), &[ComponentId::ID, f.value], &f.registry, 16).unwrap();
        empty.compact();
        assert_eq!(empty.row_capacity(), 0);
    }

    #[test]
    fn test_missing_values_take_defaults() {
        let mut f = fixture();
        let label = f
            .registry
            .register("label", Schema::string().with_default(json!("none")))
            .unwrap();
        let mut archetype = Archetype::new(
            ArchetypeId(0),
            &[ComponentId::ID, f.value, label],
            &f.registry,
            4,
        )
        .unwrap();
        archetype.insert(&Row::new(), &mut f.locations).unwrap();
        assert_eq!(archetype.get(0, label), Some(json!("none")));
        assert_eq!(archetype.get(0, f.value), Some(json!(0)));
    }

    #[test]
    fn test_data_round_trip() {
        let mut f = fixture();
        let mut archetype =
            Archetype::new(ArchetypeId(0), &[ComponentId::ID, f.value], &f.registry, 4).unwrap();
        for i in 0..3 {
            archetype.insert(&row(f.value, i * 10), &mut f.locations).unwrap();
        }
        let data = archetype.to_data();

        let mut fresh =
            Archetype::new(ArchetypeId(0), &[f.value, ComponentId::ID], &f.registry, 4).unwrap();
        fresh.from_data(data).unwrap();
        for r in 0..3 {
            assert_eq!(fresh.row(r), archetype.row(r));
        }
        assert_eq!(fresh.len(), 3);
    }

    #[test]
    fn test_storage_query() {
        let f = fixture();
        let mut registry = f.registry;
        let other = registry.register("other", Schema::f32()).unwrap();
        let mut storage = ArchetypeStorage::new();

        let a = storage.get_or_create(&[ComponentId::ID, f.value], &registry, 4).unwrap();
        let b = storage
            .get_or_create(&[other, ComponentId::ID, f.value], &registry, 4)
            .unwrap();
        assert_eq!(
            storage.get_or_create(&[f.value, ComponentId::ID], &registry, 4).unwrap(),
            a
        );

        let with_value: Vec<_> = storage.query(&[f.value], &[]).map(Archetype::id).collect();
        assert_eq!(with_value, [a, b]);
        let without_other: Vec<_> = storage.query(&[f.value], &[other]).map(Archetype::id).collect();
        assert_eq!(without_other, [a]);
    }
}
