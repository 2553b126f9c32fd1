//! The store - archetypes, entity locations and resources in one place.
//!
//! The store keeps two entity location tables side by side. Rows in
//! archetypes carrying the `transient` marker allocate from the transient
//! table; every other row allocates from the persistent table. Changing an
//! entity's component set moves its row to the archetype for the new set.

use std::{collections::BTreeMap, fmt};

use rustc_hash::FxHashMap;
use serde_json::Value;
use strata_buffer::Schema;
use tracing::trace;

use crate::{
    archetype::{Archetype, ArchetypeData, ArchetypeId, ArchetypeStorage, Row},
    component::{ComponentId, ComponentRegistry},
    config::StoreConfig,
    entity::{Entity, EntityKind},
    error::{EcsError, EcsResult},
    location::{EntityLocation, EntityLocationData, EntityLocationTable},
};

/// Changes to apply to one entity. `None` removes the component.
pub type Patch = BTreeMap<ComponentId, Option<Value>>;

/// Plain snapshot of a whole store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreData {
    pub persistent: EntityLocationData,
    pub transient: EntityLocationData,
    pub archetypes: Vec<ArchetypeData>,
    pub resources: Vec<(ComponentId, Entity)>,
}

/// Columnar entity-component store.
#[derive(Clone)]
pub struct Store {
    config: StoreConfig,
    components: ComponentRegistry,
    archetypes: ArchetypeStorage,
    persistent: EntityLocationTable,
    transient: EntityLocationTable,
    resources: FxHashMap<ComponentId, Entity>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            persistent: EntityLocationTable::new(EntityKind::Persistent, config.location_capacity),
            transient: EntityLocationTable::new(EntityKind::Transient, config.location_capacity),
            components: ComponentRegistry::new(),
            archetypes: ArchetypeStorage::new(),
            resources: FxHashMap::default(),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ==================== Components ====================

    /// Register a component by name.
    pub fn register_component(&mut self, name: &str, schema: Schema) -> EcsResult<ComponentId> {
        self.components.register(name, schema)
    }

    #[must_use]
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.components.id(name)
    }

    #[must_use]
    pub const fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    // ==================== Archetypes ====================

    /// Archetype with exactly `components`, created if missing.
    ///
    /// The set must include [`ComponentId::ID`].
    pub fn ensure_archetype(&mut self, components: &[ComponentId]) -> EcsResult<ArchetypeId> {
        self.archetypes
            .get_or_create(components, &self.components, self.config.initial_capacity)
    }

    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    #[must_use]
    pub const fn archetypes(&self) -> &ArchetypeStorage {
        &self.archetypes
    }

    /// Archetypes containing every component of `include` and none of
    /// `exclude`.
    pub fn query_archetypes<'a>(
        &'a self,
        include: &'a [ComponentId],
        exclude: &'a [ComponentId],
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.archetypes.query(include, exclude)
    }

    /// Entities of every archetype matched by [`Self::query_archetypes`].
    #[must_use]
    pub fn select(&self, include: &[ComponentId], exclude: &[ComponentId]) -> Vec<Entity> {
        self.query_archetypes(include, exclude)
            .flat_map(Archetype::entities)
            .collect()
    }

    // ==================== Entity Operations ====================

    /// Insert a row into `archetype`.
    ///
    /// Missing components take their schema default. Any `id` value in
    /// `values` is replaced by the newly allocated entity.
    pub fn insert(&mut self, archetype: ArchetypeId, values: &Row) -> EcsResult<Entity> {
        let target = self
            .archetypes
            .get_mut(archetype)
            .ok_or(EcsError::UnknownArchetype(archetype))?;
        if let Some(&component) = values.keys().find(|c| !target.has(**c)) {
            return Err(EcsError::NotInArchetype {
                component,
                archetype,
            });
        }
        let table = if target.is_transient() {
            &mut self.transient
        } else {
            &mut self.persistent
        };
        target.insert(values, table)
    }

    /// Insert a row into the archetype formed by `values`' components.
    pub fn spawn(&mut self, values: &Row) -> EcsResult<Entity> {
        let mut components: Vec<ComponentId> = values.keys().copied().collect();
        components.push(ComponentId::ID);
        let archetype = self.ensure_archetype(&components)?;
        self.insert(archetype, values)
    }

    /// Where `entity` lives, or `None` if it is not live.
    #[must_use]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        self.table(entity.kind()).locate_index(entity.index())
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.locate(entity).is_some()
    }

    /// All component values of `entity`, its `id` included.
    #[must_use]
    pub fn read(&self, entity: Entity) -> Option<Row> {
        let location = self.locate(entity)?;
        self.archetypes.get(location.archetype)?.row(location.row)
    }

    /// One component of `entity`; `None` if the entity or component is
    /// absent.
    #[must_use]
    pub fn get(&self, entity: Entity, component: ComponentId) -> Option<Value> {
        let location = self.locate(entity)?;
        self.archetypes
            .get(location.archetype)?
            .get(location.row, component)
    }

    /// Apply `patch` to `entity`.
    ///
    /// Adding or removing a component moves the entity to the archetype for
    /// its new component set. The reserved components cannot be patched.
    pub fn update(&mut self, entity: Entity, patch: &Patch) -> EcsResult<()> {
        for &component in patch.keys() {
            if component == ComponentId::ID {
                return Err(EcsError::ReservedComponent(ComponentRegistry::ID_NAME));
            }
            if component == ComponentId::TRANSIENT {
                return Err(EcsError::ReservedComponent(ComponentRegistry::TRANSIENT_NAME));
            }
            self.components.info(component)?;
        }

        let location = self.locate(entity).ok_or(EcsError::EntityNotFound(entity))?;
        let source = self
            .archetypes
            .get(location.archetype)
            .ok_or(EcsError::UnknownArchetype(location.archetype))?;

        let structural = patch
            .iter()
            .any(|(component, value)| value.is_some() != source.has(*component));

        if !structural {
            let values: Row = patch
                .iter()
                .filter_map(|(component, value)| value.clone().map(|value| (*component, value)))
                .collect();
            return self
                .archetypes
                .get_mut(location.archetype)
                .ok_or(EcsError::UnknownArchetype(location.archetype))?
                .update_row(location.row, &values);
        }

        let mut row = source
            .row(location.row)
            .ok_or(EcsError::EntityNotFound(entity))?;
        let mut components = source.components().to_vec();
        for (component, value) in patch {
            match value {
                Some(value) => {
                    row.insert(*component, value.clone());
                    if !components.contains(component) {
                        components.push(*component);
                    }
                }
                None => {
                    row.remove(component);
                    components.retain(|c| c != component);
                }
            }
        }

        let target = self.ensure_archetype(&components)?;
        self.migrate(entity, location, target, &row)
    }

    /// Remove `entity` and free its id. Returns `false` if it was not live.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<bool> {
        let Some(location) = self.locate(entity) else {
            return Ok(false);
        };
        let moved = self
            .archetypes
            .get_mut(location.archetype)
            .ok_or(EcsError::UnknownArchetype(location.archetype))?
            .delete_row(location.row)?;
        if let Some(moved) = moved {
            self.table_mut(moved.kind()).update(moved, location)?;
        }
        self.table_mut(entity.kind()).delete(entity)?;
        self.resources.retain(|_, resource| *resource != entity);
        trace!(%entity, ?location, "deleted entity");
        Ok(true)
    }

    /// Live entity count across both tables.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.persistent.len() + self.transient.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrink every archetype to its row count.
    pub fn compact(&mut self) {
        for archetype in self.archetypes.iter_mut() {
            archetype.compact();
        }
    }

    fn migrate(
        &mut self,
        entity: Entity,
        from: EntityLocation,
        to: ArchetypeId,
        row: &Row,
    ) -> EcsResult<()> {
        let new_row = self
            .archetypes
            .get_mut(to)
            .ok_or(EcsError::UnknownArchetype(to))?
            .add_row(row)?;
        let moved = self
            .archetypes
            .get_mut(from.archetype)
            .ok_or(EcsError::UnknownArchetype(from.archetype))?
            .delete_row(from.row)?;
        if let Some(moved) = moved {
            self.table_mut(moved.kind()).update(moved, from)?;
        }
        self.table_mut(entity.kind())
            .update(entity, EntityLocation::new(to, new_row))?;
        trace!(%entity, from = ?from.archetype, ?to, "migrated entity");
        Ok(())
    }

    // ==================== Resources ====================

    /// Register a singleton component held by one entity in archetype
    /// `[id, name]`.
    pub fn register_resource(
        &mut self,
        name: &str,
        schema: Schema,
        value: Value,
    ) -> EcsResult<ComponentId> {
        let component = self.register_component(name, schema)?;
        if self.resources.contains_key(&component) {
            return Err(EcsError::DuplicateResource(name.to_owned()));
        }
        let entity = self.spawn(&Row::from([(component, value)]))?;
        self.resources.insert(component, entity);
        Ok(component)
    }

    /// Entity holding resource `component`.
    #[must_use]
    pub fn resource_entity(&self, component: ComponentId) -> Option<Entity> {
        self.resources.get(&component).copied()
    }

    #[must_use]
    pub fn resource(&self, component: ComponentId) -> Option<Value> {
        self.get(self.resource_entity(component)?, component)
    }

    /// Registered resources and their entities.
    pub fn resources(&self) -> impl Iterator<Item = (ComponentId, Entity)> + '_ {
        self.resources.iter().map(|(&component, &entity)| (component, entity))
    }

    // ==================== Snapshots ====================

    #[must_use]
    pub fn to_data(&self) -> StoreData {
        let mut resources: Vec<_> = self.resources().collect();
        resources.sort_unstable();
        StoreData {
            persistent: self.persistent.to_data(),
            transient: self.transient.to_data(),
            archetypes: self.archetypes.iter().map(Archetype::to_data).collect(),
            resources,
        }
    }

    /// Replace all rows, locations and resources with a snapshot.
    ///
    /// Every component named by the snapshot must already be registered.
    /// On error the store is left unchanged.
    pub fn from_data(&mut self, data: StoreData) -> EcsResult<()> {
        let mut archetypes = ArchetypeStorage::new();
        for archetype_data in data.archetypes {
            let id = archetypes.get_or_create(&archetype_data.components, &self.components, 0)?;
            archetypes
                .get_mut(id)
                .ok_or(EcsError::UnknownArchetype(id))?
                .from_data(archetype_data)?;
        }
        let persistent = EntityLocationTable::from_data(EntityKind::Persistent, data.persistent)?;
        let transient = EntityLocationTable::from_data(EntityKind::Transient, data.transient)?;

        self.archetypes = archetypes;
        self.persistent = persistent;
        self.transient = transient;
        self.resources = data.resources.into_iter().collect();
        Ok(())
    }

    const fn table(&self, kind: EntityKind) -> &EntityLocationTable {
        match kind {
            EntityKind::Persistent => &self.persistent,
            EntityKind::Transient => &self.transient,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut EntityLocationTable {
        match kind {
            EntityKind::Persistent => &mut self.persistent,
            EntityKind::Transient => &mut self.transient,
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entities", &self.len())
            .field("components", &self.components.len())
            .field("archetypes", &self.archetypes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixture {
        store: Store,
        name: ComponentId,
        position: ComponentId,
        velocity: ComponentId,
    }

    fn fixture() -> Fixture {
        let mut store = Store::new();
        let name = store.register_component("name", Schema::string()).unwrap();
        let position = store
            .register_component(
                "position",
                Schema::object([("x", Schema::f32()), ("y", Schema::f32())]),
            )
            .unwrap();
        let velocity = store.register_component("velocity", Schema::f32()).unwrap();
        Fixture {
            store,
            name,
            position,
            velocity,
        }
    }

    #[test]
    fn test_spawn_read_get() {
        let mut f = fixture();
        let entity = f
            .store
            .spawn(&Row::from([
                (f.name, json!("a")),
                (f.position, json!({ "x": 1.0, "y": 2.0 })),
            ]))
            .unwrap();

        assert_eq!(f.store.get(entity, f.name), Some(json!("a")));
        assert_eq!(f.store.get(entity, f.velocity), None);
        let row = f.store.read(entity).unwrap();
        assert_eq!(row[&ComponentId::ID], entity.to_value());
        assert_eq!(row[&f.position], json!({ "x": 1.0, "y": 2.0 }));
    }

    #[test]
    fn test_ensure_archetype_requires_id() {
        let mut f = fixture();
        assert_eq!(
            f.store.ensure_archetype(&[f.name]),
            Err(EcsError::MissingIdComponent)
        );
        let a = f.store.ensure_archetype(&[ComponentId::ID, f.name]).unwrap();
        assert_eq!(f.store.ensure_archetype(&[f.name, ComponentId::ID]).unwrap(), a);
    }

    #[test]
    fn test_insert_rejects_foreign_components() {
        let mut f = fixture();
        let archetype = f.store.ensure_archetype(&[ComponentId::ID, f.name]).unwrap();
        let result = f.store.insert(archetype, &Row::from([(f.velocity, json!(1.0))]));
        assert!(matches!(result, Err(EcsError::NotInArchetype { .. })));
    }

    #[test]
    fn test_update_in_place_and_migration() {
        let mut f = fixture();
        let entity = f.store.spawn(&Row::from([(f.name, json!("a"))])).unwrap();
        let before = f.store.locate(entity).unwrap();

        f.store
            .update(entity, &Patch::from([(f.name, Some(json!("b")))]))
            .unwrap();
        assert_eq!(f.store.locate(entity), Some(before));
        assert_eq!(f.store.get(entity, f.name), Some(json!("b")));

        f.store
            .update(entity, &Patch::from([(f.velocity, Some(json!(2.5)))]))
            .unwrap();
        let after = f.store.locate(entity).unwrap();
        assert_ne!(after.archetype, before.archetype);
        assert_eq!(f.store.get(entity, f.velocity), Some(json!(2.5)));
        assert_eq!(f.store.get(entity, f.name), Some(json!("b")));

        f.store.update(entity, &Patch::from([(f.name, None)])).unwrap();
        assert_eq!(f.store.get(entity, f.name), None);
        assert_eq!(
            f.store.archetype(f.store.locate(entity).unwrap().archetype).unwrap().components(),
            [ComponentId::ID, f.velocity]
        );
    }

    #[test]
    fn test_migration_relocates_swapped_row() {
        let mut f = fixture();
        let a = f.store.spawn(&Row::from([(f.name, json!("a"))])).unwrap();
        let b = f.store.spawn(&Row::from([(f.name, json!("b"))])).unwrap();

        f.store
            .update(a, &Patch::from([(f.velocity, Some(json!(1.0)))]))
            .unwrap();

        assert_eq!(f.store.locate(b).unwrap().row, 0);
        assert_eq!(f.store.get(b, f.name), Some(json!("b")));
        assert_eq!(f.store.get(a, f.name), Some(json!("a")));
    }

    #[test]
    fn test_update_errors() {
        let mut f = fixture();
        let entity = f.store.spawn(&Row::from([(f.name, json!("a"))])).unwrap();

        assert_eq!(
            f.store.update(entity, &Patch::from([(ComponentId::ID, Some(json!(3)))])),
            Err(EcsError::ReservedComponent("id"))
        );
        assert_eq!(
            f.store.update(entity, &Patch::from([(ComponentId::TRANSIENT, None)])),
            Err(EcsError::ReservedComponent("transient"))
        );
        assert_eq!(
            f.store.update(Entity::Persistent(99), &Patch::new()),
            Err(EcsError::EntityNotFound(Entity::Persistent(99)))
        );
        let unknown = ComponentId::from_raw(77);
        assert_eq!(
            f.store.update(entity, &Patch::from([(unknown, Some(json!(1)))])),
            Err(EcsError::UnknownComponent(unknown))
        );
    }

    #[test]
    fn test_delete_frees_entity() {
        let mut f = fixture();
        let a = f.store.spawn(&Row::from([(f.name, json!("a"))])).unwrap();
        let b = f.store.spawn(&Row::from([(f.name, json!("b"))])).unwrap();

        assert!(f.store.delete(a).unwrap());
        assert!(!f.store.delete(a).unwrap());
        assert_eq!(f.store.read(a), None);
        assert_eq!(f.store.locate(b).unwrap().row, 0);
        assert_eq!(f.store.len(), 1);
    }

    #[test]
    fn test_transient_rows_use_transient_ids() {
        let mut f = fixture();
        let entity = f
            .store
            .spawn(&Row::from([
                (f.name, json!("ghost")),
                (ComponentId::TRANSIENT, json!(true)),
            ]))
            .unwrap();
        assert!(entity.is_transient());
        assert_eq!(f.store.get(entity, ComponentId::TRANSIENT), Some(json!(true)));

        let solid = f.store.spawn(&Row::from([(f.name, json!("solid"))])).unwrap();
        assert_eq!(solid, Entity::Persistent(0));
        assert_eq!(
            f.store.select(&[f.name], &[ComponentId::TRANSIENT]),
            [solid]
        );
    }

    #[test]
    fn test_resources() {
        let mut f = fixture();
        let time = f
            .store
            .register_resource("time", Schema::f32(), json!(0.5))
            .unwrap();
        assert_eq!(f.store.resource(time), Some(json!(0.5)));

        let entity = f.store.resource_entity(time).unwrap();
        f.store
            .update(entity, &Patch::from([(time, Some(json!(1.5)))]))
            .unwrap();
        assert_eq!(f.store.resource(time), Some(json!(1.5)));

        assert_eq!(
            f.store.register_resource("time", Schema::f32(), json!(0.0)),
            Err(EcsError::DuplicateResource("time".to_owned()))
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut f = fixture();
        let entities: Vec<_> = (0..4)
            .map(|i| {
                f.store
                    .spawn(&Row::from([(f.name, json!(format!("e{i}"))), (f.velocity, json!(1.0))]))
                    .unwrap()
            })
            .collect();
        f.store.delete(entities[1]).unwrap();
        f.store.compact();
        let data = f.store.to_data();

        let mut restored = fixture().store;
        restored.from_data(data).unwrap();
        for &entity in &entities {
            assert_eq!(restored.locate(entity), f.store.locate(entity));
            assert_eq!(restored.read(entity), f.store.read(entity));
        }
        assert_eq!(restored.to_data(), f.store.to_data());
    }
}
