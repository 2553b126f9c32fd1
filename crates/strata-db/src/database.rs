//! Observable database.
//!
//! Wraps a [`TransactionalStore`] and publishes every successful
//! transaction that changed something. Observers subscribe to all results,
//! or to the results touching one component, archetype, entity or resource.
//! Failed and no-op transactions publish nothing.

use std::{collections::BTreeSet, fmt, ops::Deref};

use rustc_hash::FxHashMap;
use serde_json::Value;
use strata_buffer::Schema;
use strata_ecs::{ArchetypeId, ComponentId, Entity, Row, Store, StoreConfig, StoreData};
use tracing::debug;

use crate::{
    error::DbResult,
    observe::{ObserverId, Observers},
    operation::WriteOperation,
    transaction::{
        Transaction, TransactionOptions, TransactionResult, TransactionValue, TransactionalStore,
    },
};

/// A transactional store with change notification.
#[derive(Default)]
pub struct Database {
    store: TransactionalStore,
    transactions: Observers<TransactionResult>,
    components: FxHashMap<ComponentId, Observers<TransactionResult>>,
    archetypes: FxHashMap<ArchetypeId, Observers<TransactionResult>>,
    entities: FxHashMap<Entity, Observers<Option<Row>>>,
    resources: FxHashMap<ComponentId, Observers<Value>>,
}

impl Database {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            store: TransactionalStore::with_config(config),
            ..Self::default()
        }
    }

    // ==================== Setup ====================

    pub fn register_component(&mut self, name: &str, schema: Schema) -> DbResult<ComponentId> {
        Ok(self.store.register_component(name, schema)?)
    }

    /// Register a resource with its initial value. Not recorded.
    pub fn register_resource(
        &mut self,
        name: &str,
        schema: Schema,
        value: Value,
    ) -> DbResult<ComponentId> {
        Ok(self.store.register_resource(name, schema, value)?)
    }

    // ==================== Transactions ====================

    /// Run a transaction and publish its result if it changed anything.
    pub fn execute<R, F>(&mut self, options: TransactionOptions, f: F) -> DbResult<TransactionResult>
    where
        R: TransactionValue,
        F: FnOnce(&mut Transaction<'_>) -> DbResult<R>,
    {
        let result = self.store.execute(options, f)?;
        self.publish(&result);
        Ok(result)
    }

    /// Apply `operations` as one published transaction.
    pub fn apply_operations(
        &mut self,
        operations: &[WriteOperation],
        options: TransactionOptions,
    ) -> DbResult<TransactionResult> {
        self.execute(options, |t| t.apply_operations(operations))
    }

    fn publish(&self, result: &TransactionResult) {
        if !result.has_changes() {
            return;
        }
        self.transactions.notify(result);
        for component in &result.changed_components {
            if let Some(observers) = self.components.get(component) {
                observers.notify(result);
            }
        }
        for archetype in &result.changed_archetypes {
            if let Some(observers) = self.archetypes.get(archetype) {
                observers.notify(result);
            }
        }
        for entity in &result.changed_entities {
            if let Some(observers) = self.entities.get(entity) {
                observers.notify(&self.store.read(*entity));
            }
        }
        for (component, observers) in &self.resources {
            if !result.changed_components.contains(component) {
                continue;
            }
            let Some(entity) = self.store.resource_entity(*component) else {
                continue;
            };
            if !result.changed_entities.contains(&entity) {
                continue;
            }
            if let Some(value) = self.store.resource(*component) {
                observers.notify(&value);
            }
        }
    }

    // ==================== Observers ====================

    /// Observe every published result, transient ones included.
    pub fn observe_transactions<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn(&TransactionResult) + Send + Sync + 'static,
    {
        self.transactions.subscribe(callback)
    }

    pub fn unobserve_transactions(&mut self, id: ObserverId) -> bool {
        self.transactions.unsubscribe(id)
    }

    /// Observe results that change `component` on any entity.
    pub fn observe_component<F>(&mut self, component: ComponentId, callback: F) -> ObserverId
    where
        F: Fn(&TransactionResult) + Send + Sync + 'static,
    {
        self.components
            .entry(component)
            .or_default()
            .subscribe(callback)
    }

    pub fn unobserve_component(&mut self, component: ComponentId, id: ObserverId) -> bool {
        self.components
            .get_mut(&component)
            .is_some_and(|observers| observers.unsubscribe(id))
    }

    /// Observe results that add, change or remove rows of `archetype`.
    pub fn observe_archetype<F>(&mut self, archetype: ArchetypeId, callback: F) -> ObserverId
    where
        F: Fn(&TransactionResult) + Send + Sync + 'static,
    {
        self.archetypes
            .entry(archetype)
            .or_default()
            .subscribe(callback)
    }

    pub fn unobserve_archetype(&mut self, archetype: ArchetypeId, id: ObserverId) -> bool {
        self.archetypes
            .get_mut(&archetype)
            .is_some_and(|observers| observers.unsubscribe(id))
    }

    /// Observe the values of `entity`, `None` once it is deleted.
    ///
    /// `callback` runs once immediately with the current values, then after
    /// every result that changes the entity.
    pub fn observe_entity<F>(&mut self, entity: Entity, callback: F) -> ObserverId
    where
        F: Fn(Option<&Row>) + Send + Sync + 'static,
    {
        callback(self.store.read(entity).as_ref());
        self.entities
            .entry(entity)
            .or_default()
            .subscribe(move |values: &Option<Row>| callback(values.as_ref()))
    }

    pub fn unobserve_entity(&mut self, entity: Entity, id: ObserverId) -> bool {
        self.entities
            .get_mut(&entity)
            .is_some_and(|observers| observers.unsubscribe(id))
    }

    /// Observe the value of resource `component` after each transaction
    /// that writes it.
    pub fn observe_resource<F>(&mut self, component: ComponentId, callback: F) -> ObserverId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.resources
            .entry(component)
            .or_default()
            .subscribe(callback)
    }

    pub fn unobserve_resource(&mut self, component: ComponentId, id: ObserverId) -> bool {
        self.resources
            .get_mut(&component)
            .is_some_and(|observers| observers.unsubscribe(id))
    }

    // ==================== Snapshots ====================

    #[must_use]
    pub const fn store(&self) -> &Store {
        self.store.store()
    }

    #[must_use]
    pub fn to_data(&self) -> StoreData {
        self.store.to_data()
    }

    /// Replace the store contents.
    ///
    /// Publishes a [`TransactionResult::reload`] result that marks every
    /// component, every archetype and every entity live before or after the
    /// load as changed.
    pub fn from_data(&mut self, data: StoreData) -> DbResult<()> {
        let mut changed_entities: BTreeSet<Entity> =
            self.store.select(&[], &[]).into_iter().collect();
        self.store.from_data(data)?;
        changed_entities.extend(self.store.select(&[], &[]));

        let result = TransactionResult {
            changed_entities,
            changed_components: self.store.components().iter().map(|info| info.id).collect(),
            changed_archetypes: self.store.archetypes().iter().map(|a| a.id()).collect(),
            reload: true,
            ..TransactionResult::default()
        };
        debug!(entities = result.changed_entities.len(), "store reloaded");
        self.publish(&result);
        Ok(())
    }
}

impl Deref for Database {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store.store()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", self.store.store())
            .field("transaction_observers", &self.transactions.len())
            .field("component_observers", &self.components.len())
            .field("archetype_observers", &self.archetypes.len())
            .field("entity_observers", &self.entities.len())
            .field("resource_observers", &self.resources.len())
            .finish()
    }
}
