//! Transactional store.
//!
//! [`TransactionalStore::execute`] runs a function against a
//! [`Transaction`], which records every insert, update and delete as a
//! forward (redo) and inverse (undo) [`WriteOperation`]. A function that
//! returns an error has its recorded undo log applied before the error is
//! passed on.

use std::{
    collections::BTreeSet,
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_ecs::{ArchetypeId, ComponentId, Entity, Patch, Row, Store, StoreConfig};
use tracing::{debug, trace, warn};

use crate::{
    error::{DbError, DbResult},
    operation::{WriteOperation, coalesce_write_operations},
};

/// Marks a transaction as one undo step.
///
/// Consecutive steps with the same `id` that both set `coalesce` collapse
/// into one entry on the undo stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undoable {
    pub id: String,
    pub coalesce: bool,
}

impl Undoable {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coalesce: false,
        }
    }

    /// An undo step that merges with the previous step of the same id.
    #[must_use]
    pub fn coalescing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            coalesce: true,
        }
    }
}

/// Per-call options for [`TransactionalStore::execute`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Exploratory result that persistence and the undo stack ignore.
    pub transient: bool,
}

impl TransactionOptions {
    pub const TRANSIENT: Self = Self { transient: true };
}

/// What one `execute` call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionResult {
    /// Entity returned by the transaction function, if any.
    pub value: Option<Entity>,
    pub transient: bool,
    pub undoable: Option<Undoable>,
    pub redo: Vec<WriteOperation>,
    pub undo: Vec<WriteOperation>,
    pub changed_entities: BTreeSet<Entity>,
    pub changed_components: BTreeSet<ComponentId>,
    pub changed_archetypes: BTreeSet<ArchetypeId>,
    /// Set on the result [`Database::from_data`](crate::Database::from_data)
    /// publishes after replacing the store contents. It has no operations.
    pub reload: bool,
}

impl TransactionResult {
    /// Whether the transaction changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.redo.is_empty() && self.undo.is_empty()
    }

    /// Whether any entity, component or archetype changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changed_entities.is_empty()
            || !self.changed_components.is_empty()
            || !self.changed_archetypes.is_empty()
    }
}

/// Values a transaction function may return.
pub trait TransactionValue {
    fn into_entity(self) -> Option<Entity>;
}

impl TransactionValue for () {
    fn into_entity(self) -> Option<Entity> {
        None
    }
}

impl TransactionValue for Entity {
    fn into_entity(self) -> Option<Entity> {
        Some(self)
    }
}

impl TransactionValue for Option<Entity> {
    fn into_entity(self) -> Option<Entity> {
        self
    }
}

/// Recording view of the store handed to transaction functions.
///
/// Reads go through [`Deref`] to the [`Store`]. Writes must use the methods
/// here; anything else escapes the redo and undo logs.
pub struct Transaction<'a> {
    store: &'a mut Store,
    redo: Vec<WriteOperation>,
    /// Inverse operations in recording order; applied back to front.
    undo: Vec<WriteOperation>,
    changed_entities: BTreeSet<Entity>,
    changed_components: BTreeSet<ComponentId>,
    changed_archetypes: BTreeSet<ArchetypeId>,
    undoable: Option<Undoable>,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a mut Store) -> Self {
        Self {
            store,
            redo: Vec::new(),
            undo: Vec::new(),
            changed_entities: BTreeSet::new(),
            changed_components: BTreeSet::new(),
            changed_archetypes: BTreeSet::new(),
            undoable: None,
        }
    }

    /// Mark this transaction as an undo step.
    pub fn set_undoable(&mut self, undoable: Undoable) {
        self.undoable = Some(undoable);
    }

    /// Archetype for exactly `components`. Not recorded.
    pub fn ensure_archetype(&mut self, components: &[ComponentId]) -> DbResult<ArchetypeId> {
        Ok(self.store.ensure_archetype(components)?)
    }

    /// Insert a row into `archetype`.
    pub fn insert(&mut self, archetype: ArchetypeId, values: &Row) -> DbResult<Entity> {
        let entity = self.store.insert(archetype, values)?;
        self.record_insert(entity, archetype, values);
        Ok(entity)
    }

    /// Insert a row into the archetype formed by `values`' components.
    pub fn spawn(&mut self, values: &Row) -> DbResult<Entity> {
        let entity = self.store.spawn(values)?;
        let archetype = self
            .store
            .locate(entity)
            .ok_or(DbError::EntityNotFound(entity))?
            .archetype;
        self.record_insert(entity, archetype, values);
        Ok(entity)
    }

    /// Patch `entity`. Values that already match are left out of the logs.
    pub fn update(&mut self, entity: Entity, patch: Patch) -> DbResult<()> {
        let before = self
            .store
            .locate(entity)
            .ok_or(DbError::EntityNotFound(entity))?;
        let old = self
            .store
            .read(entity)
            .ok_or(DbError::EntityNotFound(entity))?;

        let mut replaced = Patch::new();
        let mut changes = Patch::new();
        for (component, value) in patch {
            let previous = old.get(&component).cloned();
            if previous != value {
                replaced.insert(component, previous);
                changes.insert(component, value);
            }
        }

        self.store.update(entity, &changes)?;
        if changes.is_empty() {
            return Ok(());
        }

        self.changed_entities.insert(entity);
        self.changed_components.extend(changes.keys().copied());
        self.changed_archetypes.insert(before.archetype);
        if let Some(after) = self.store.locate(entity) {
            self.changed_archetypes.insert(after.archetype);
        }

        let last_undo = self.undo.last_mut();
        let last_redo = self.redo.last_mut();
        if let (
            Some(WriteOperation::Update {
                entity: undo_entity,
                values: undo_values,
            }),
            Some(WriteOperation::Update {
                entity: redo_entity,
                values: redo_values,
            }),
        ) = (last_undo, last_redo)
        {
            if *undo_entity == entity && *redo_entity == entity {
                redo_values.extend(changes);
                // earlier captures hold the older values
                for (component, value) in replaced {
                    undo_values.entry(component).or_insert(value);
                }
                return Ok(());
            }
        }

        self.redo.push(WriteOperation::Update {
            entity,
            values: changes,
        });
        self.undo.push(WriteOperation::Update {
            entity,
            values: replaced,
        });
        Ok(())
    }

    /// Delete `entity`. Deleting an entity that is not live is an error.
    pub fn delete(&mut self, entity: Entity) -> DbResult<()> {
        let location = self
            .store
            .locate(entity)
            .ok_or(DbError::EntityNotFound(entity))?;
        let old = self
            .store
            .read(entity)
            .ok_or(DbError::EntityNotFound(entity))?;
        self.store.delete(entity)?;

        self.changed_entities.insert(entity);
        self.changed_archetypes.insert(location.archetype);
        self.changed_components
            .extend(old.keys().copied().filter(|c| *c != ComponentId::ID));
        self.redo.push(WriteOperation::Delete { entity });
        self.undo.push(WriteOperation::Insert { values: old });
        Ok(())
    }

    /// Write the value of resource `component`.
    pub fn set_resource(&mut self, component: ComponentId, value: Value) -> DbResult<()> {
        let entity = self
            .store
            .resource_entity(component)
            .ok_or(DbError::UnknownResource(component))?;
        self.update(entity, Patch::from([(component, Some(value))]))
    }

    /// Apply recorded operations, recording them again.
    pub fn apply_operations(&mut self, operations: &[WriteOperation]) -> DbResult<()> {
        for operation in operations {
            match operation {
                WriteOperation::Insert { values } => {
                    self.spawn(values)?;
                }
                WriteOperation::Update { entity, values } => self.update(*entity, values.clone())?,
                WriteOperation::Delete { entity } => self.delete(*entity)?,
            }
        }
        Ok(())
    }

    fn record_insert(&mut self, entity: Entity, archetype: ArchetypeId, values: &Row) {
        let mut row = values.clone();
        row.insert(ComponentId::ID, entity.to_value());
        self.changed_entities.insert(entity);
        self.changed_archetypes.insert(archetype);
        self.changed_components
            .extend(values.keys().copied().filter(|c| *c != ComponentId::ID));
        self.redo.push(WriteOperation::Insert { values: row });
        self.undo.push(WriteOperation::Delete { entity });
    }

    fn finish(self, value: Option<Entity>, options: TransactionOptions) -> TransactionResult {
        TransactionResult {
            value,
            transient: options.transient,
            undoable: self.undoable,
            redo: coalesce_write_operations(self.redo),
            undo: coalesce_write_operations(self.undo.into_iter().rev()),
            changed_entities: self.changed_entities,
            changed_components: self.changed_components,
            changed_archetypes: self.changed_archetypes,
            reload: false,
        }
    }

    /// Undo everything recorded so far, directly against the store.
    ///
    /// Every step is attempted; the first failure is returned.
    fn rollback(self) -> DbResult<()> {
        let Self { store, undo, .. } = self;
        let mut failed = None;
        for operation in undo.into_iter().rev() {
            if let Err(err) = apply_untracked(store, &operation) {
                warn!(?operation, %err, "rollback step failed");
                failed.get_or_insert(err);
            }
        }
        failed.map_or(Ok(()), Err)
    }
}

impl Deref for Transaction<'_> {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store
    }
}

fn apply_untracked(store: &mut Store, operation: &WriteOperation) -> DbResult<()> {
    match operation {
        WriteOperation::Insert { values } => {
            store.spawn(values)?;
        }
        WriteOperation::Update { entity, values } => store.update(*entity, values)?,
        WriteOperation::Delete { entity } => {
            if !store.delete(*entity)? {
                return Err(DbError::EntityNotFound(*entity));
            }
        }
    }
    Ok(())
}

/// A [`Store`] whose mutations go through recorded transactions.
#[derive(Clone, Debug, Default)]
pub struct TransactionalStore {
    store: Store,
}

impl TransactionalStore {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self::new(Store::with_config(config))
    }

    /// Run `f`, returning what it recorded.
    ///
    /// If `f` fails, its recorded operations are undone and the error is
    /// returned; the store is back where it started. If an undo step fails
    /// as well, the error is [`DbError::RollbackFailed`] and the store may
    /// hold part of the transaction.
    pub fn execute<R, F>(&mut self, options: TransactionOptions, f: F) -> DbResult<TransactionResult>
    where
        R: TransactionValue,
        F: FnOnce(&mut Transaction<'_>) -> DbResult<R>,
    {
        let mut transaction = Transaction::new(&mut self.store);
        match f(&mut transaction) {
            Ok(value) => {
                let result = transaction.finish(value.into_entity(), options);
                trace!(
                    redo = result.redo.len(),
                    undo = result.undo.len(),
                    transient = result.transient,
                    "transaction committed"
                );
                Ok(result)
            }
            Err(err) => {
                debug!(%err, recorded = transaction.undo.len(), "transaction failed, rolling back");
                match transaction.rollback() {
                    Ok(()) => Err(err),
                    Err(rollback) => Err(DbError::RollbackFailed {
                        source: Box::new(err),
                        rollback: Box::new(rollback),
                    }),
                }
            }
        }
    }

    /// Apply `operations` as one transaction.
    pub fn apply_operations(
        &mut self,
        operations: &[WriteOperation],
        options: TransactionOptions,
    ) -> DbResult<TransactionResult> {
        self.execute(options, |t| t.apply_operations(operations))
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Direct store access for setup (component and resource registration).
    /// Writes made here are not recorded.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    #[must_use]
    pub fn into_inner(self) -> Store {
        self.store
    }
}

impl Deref for TransactionalStore {
    type Target = Store;

    fn deref(&self) -> &Store {
        &self.store
    }
}

impl DerefMut for TransactionalStore {
    fn deref_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_buffer::Schema;

    use super::*;

    fn setup() -> (TransactionalStore, ComponentId, ComponentId) {
        let mut store = TransactionalStore::default();
        let name = store.register_component("name", Schema::string()).unwrap();
        let mass = store.register_component("mass", Schema::f32()).unwrap();
        (store, name, mass)
    }

    #[test]
    fn test_insert_records_redo_and_undo() {
        let (mut store, name, _) = setup();
        let result = store
            .execute(TransactionOptions::default(), |t| {
                t.spawn(&Row::from([(name, json!("a"))]))
            })
            .unwrap();

        let entity = result.value.unwrap();
        assert_eq!(
            result.redo,
            [WriteOperation::Insert {
                values: Row::from([(ComponentId::ID, entity.to_value()), (name, json!("a"))])
            }]
        );
        assert_eq!(result.undo, [WriteOperation::Delete { entity }]);
        assert_eq!(result.changed_entities, BTreeSet::from([entity]));
        assert_eq!(result.changed_components, BTreeSet::from([name]));
        assert_eq!(result.changed_archetypes.len(), 1);
        assert!(!result.transient);
    }

    #[test]
    fn test_update_captures_previous_values() {
        let (mut store, name, mass) = setup();
        let entity = store
            .execute(TransactionOptions::default(), |t| {
                t.spawn(&Row::from([(name, json!("a"))]))
            })
            .unwrap()
            .value
            .unwrap();

        let result = store
            .execute(TransactionOptions::default(), |t| {
                t.update(entity, Patch::from([(name, Some(json!("b")))]))?;
                t.update(entity, Patch::from([(name, Some(json!("c"))), (mass, Some(json!(2.0)))]))
            })
            .unwrap();

        assert_eq!(
            result.redo,
            [WriteOperation::Update {
                entity,
                values: Patch::from([(name, Some(json!("c"))), (mass, Some(json!(2.0)))]),
            }]
        );
        assert_eq!(
            result.undo,
            [WriteOperation::Update {
                entity,
                values: Patch::from([(name, Some(json!("a"))), (mass, None)]),
            }]
        );
        // the mass insert moved the entity
        assert_eq!(result.changed_archetypes.len(), 2);

        store.apply_operations(&result.undo, TransactionOptions::default()).unwrap();
        assert_eq!(store.get(entity, name), Some(json!("a")));
        assert_eq!(store.get(entity, mass), None);
    }

    #[test]
    fn test_unchanged_values_are_not_recorded() {
        let (mut store, name, _) = setup();
        let entity = store.spawn(&Row::from([(name, json!("a"))])).unwrap();
        let result = store
            .execute(TransactionOptions::default(), |t| {
                t.update(entity, Patch::from([(name, Some(json!("a")))]))
            })
            .unwrap();
        assert!(result.is_noop());
        assert!(result.changed_entities.is_empty());
    }

    #[test]
    fn test_delete_undo_reinserts_values() {
        let (mut store, name, mass) = setup();
        let entity = store
            .spawn(&Row::from([(name, json!("a")), (mass, json!(1.5))]))
            .unwrap();

        let result = store
            .execute(TransactionOptions::default(), |t| t.delete(entity))
            .unwrap();
        assert_eq!(result.redo, [WriteOperation::Delete { entity }]);
        assert!(!store.contains(entity));

        let restored = store
            .apply_operations(&result.undo, TransactionOptions::default())
            .unwrap();
        let [WriteOperation::Insert { values }] = restored.redo.as_slice() else {
            panic!("expected one insert, got {:?}", restored.redo);
        };
        assert_eq!(values[&name], json!("a"));
        assert_eq!(store.get(entity, mass), Some(json!(1.5)));
    }

    #[test]
    fn test_delete_missing_entity_fails() {
        let (mut store, ..) = setup();
        let missing = Entity::Persistent(12);
        assert_eq!(
            store.execute(TransactionOptions::default(), |t| t.delete(missing)),
            Err(DbError::EntityNotFound(missing))
        );
    }

    #[test]
    fn test_error_rolls_back() {
        let (mut store, name, mass) = setup();
        let keep = store.spawn(&Row::from([(name, json!("keep"))])).unwrap();
        let before = store.locate(keep);

        let result = store.execute(TransactionOptions::default(), |t| {
            t.spawn(&Row::from([(name, json!("temp"))]))?;
            t.update(keep, Patch::from([(mass, Some(json!(3.0)))]))?;
            Err::<(), _>(DbError::Aborted("nope".to_owned()))
        });

        assert_eq!(result, Err(DbError::Aborted("nope".to_owned())));
        assert_eq!(store.get(keep, mass), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.locate(keep), before);
    }

    #[test]
    fn test_rejected_patch_writes_nothing() {
        let (mut store, name, mass) = setup();
        let entity = store
            .spawn(&Row::from([(name, json!("a")), (mass, json!(1.0))]))
            .unwrap();

        let result = store.execute(TransactionOptions::default(), |t| {
            t.update(entity, Patch::from([(name, Some(json!("b"))), (mass, Some(json!("x")))]))
        });

        assert!(matches!(result, Err(DbError::Ecs(_))));
        assert_eq!(store.get(entity, name), Some(json!("a")));
        assert_eq!(store.get(entity, mass), Some(json!(1.0)));
    }

    #[test]
    fn test_failed_rollback_is_reported() {
        let (mut store, name, mass) = setup();
        let missing = Entity::Persistent(40);

        let result = store.execute(TransactionOptions::default(), |t| {
            t.spawn(&Row::from([(name, json!("temp"))]))?;
            // an inverse step that cannot apply
            t.undo.push(WriteOperation::Update {
                entity: missing,
                values: Patch::from([(mass, Some(json!(1.0)))]),
            });
            Err::<(), _>(DbError::Aborted("nope".to_owned()))
        });

        let Err(DbError::RollbackFailed { source, rollback }) = result else {
            panic!("expected a rollback failure, got {result:?}");
        };
        assert_eq!(*source, DbError::Aborted("nope".to_owned()));
        assert!(matches!(*rollback, DbError::Ecs(_)));
        // later steps still ran
        assert!(store.is_empty());
    }

    #[test]
    fn test_transient_option_and_undoable() {
        let (mut store, name, _) = setup();
        let result = store
            .execute(TransactionOptions::TRANSIENT, |t| {
                t.set_undoable(Undoable::coalescing("drag"));
                t.spawn(&Row::from([(name, json!("x"))]))?;
                Ok(())
            })
            .unwrap();
        assert!(result.transient);
        assert_eq!(result.value, None);
        assert_eq!(result.undoable, Some(Undoable::coalescing("drag")));
    }

    #[test]
    fn test_set_resource() {
        let (mut store, ..) = setup();
        let time = store
            .register_resource("time", Schema::f32(), json!(0.0))
            .unwrap();
        let result = store
            .execute(TransactionOptions::default(), |t| t.set_resource(time, json!(4.0)))
            .unwrap();
        assert_eq!(store.resource(time), Some(json!(4.0)));
        assert!(result.changed_components.contains(&time));

        let unknown = ComponentId::from_raw(40);
        assert_eq!(
            store.execute(TransactionOptions::default(), |t| t.set_resource(unknown, json!(1))),
            Err(DbError::UnknownResource(unknown))
        );
    }
}
