//! Reconciling database.
//!
//! Transactions arrive as [`TransactionEnvelope`]s naming a registered
//! transaction function. Each envelope carries a time: negative for a
//! speculative (transient) application, positive for an authoritative
//! (committed) one, zero to cancel the transient entry with the same id.
//!
//! Applied entries are kept sorted by `(|time|, id, name)`. An envelope that
//! sorts before entries already applied rolls those entries back with their
//! recorded undo logs, takes its place, and the suffix is replayed. Replay
//! is only correct if transaction functions are deterministic for a given
//! store state and arguments.

use std::{cmp::Ordering, fmt, sync::Arc};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_buffer::Schema;
use strata_ecs::{ComponentId, Entity, StoreData};
use tracing::{debug, instrument, trace, warn};

use crate::{
    config::DatabaseConfig,
    database::Database,
    error::{DbError, DbResult},
    transaction::{Transaction, TransactionOptions, TransactionResult, TransactionalStore},
};

/// A registered transaction function.
pub type TransactionFn =
    Arc<dyn Fn(&mut Transaction<'_>, &Value) -> DbResult<Option<Entity>> + Send + Sync>;

/// A request to run the transaction `name` with `args`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub id: u64,
    pub name: String,
    pub args: Value,
    /// `< 0` transient, `> 0` committed, `0` cancels.
    pub time: i64,
}

impl TransactionEnvelope {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, args: Value, time: i64) -> Self {
        Self {
            id,
            name: name.into(),
            args,
            time,
        }
    }
}

/// An applied envelope and the result of its latest execution.
#[derive(Clone, Debug)]
pub struct ReconcilingEntry {
    pub id: u64,
    pub name: String,
    pub args: Value,
    pub time: i64,
    /// `None` when the last execution changed nothing.
    pub result: Option<TransactionResult>,
}

impl ReconcilingEntry {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.time < 0
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.time
            .unsigned_abs()
            .cmp(&other.time.unsigned_abs())
            .then(self.id.cmp(&other.id))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Index at which `entry` is inserted: after every entry that does not sort
/// after it.
fn insert_index(entries: &[ReconcilingEntry], entry: &ReconcilingEntry) -> usize {
    entries.partition_point(|existing| existing.compare(entry) != Ordering::Greater)
}

/// A [`Database`] fed by time-ordered transaction envelopes.
pub struct ReconcilingDatabase {
    database: Database,
    transactions: HashMap<String, TransactionFn>,
    entries: Vec<ReconcilingEntry>,
    verify_replay: bool,
}

impl Default for ReconcilingDatabase {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

impl ReconcilingDatabase {
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_database(Database::with_config(config.store), config.verify_replay)
    }

    #[must_use]
    pub fn with_database(database: Database, verify_replay: bool) -> Self {
        Self {
            database,
            transactions: HashMap::new(),
            entries: Vec::new(),
            verify_replay,
        }
    }

    // ==================== Setup ====================

    pub fn register_component(&mut self, name: &str, schema: Schema) -> DbResult<ComponentId> {
        self.database.register_component(name, schema)
    }

    pub fn register_resource(
        &mut self,
        name: &str,
        schema: Schema,
        value: Value,
    ) -> DbResult<ComponentId> {
        self.database.register_resource(name, schema, value)
    }

    /// Register a transaction function under `name`.
    pub fn register_transaction<F>(&mut self, name: &str, f: F) -> DbResult<()>
    where
        F: Fn(&mut Transaction<'_>, &Value) -> DbResult<Option<Entity>> + Send + Sync + 'static,
    {
        if self.transactions.contains_key(name) {
            return Err(DbError::DuplicateTransaction(name.to_owned()));
        }
        self.transactions.insert(name.to_owned(), Arc::new(f));
        Ok(())
    }

    // ==================== Envelopes ====================

    /// Apply an envelope, reordering against entries already applied.
    ///
    /// Returns the result of executing the envelope's own transaction, or
    /// `None` for a cancellation. An error from a replayed entry propagates
    /// and leaves the store as it was just before that entry.
    #[instrument(skip_all, fields(id = envelope.id, name = %envelope.name, time = envelope.time))]
    pub fn apply(&mut self, envelope: TransactionEnvelope) -> DbResult<Option<TransactionResult>> {
        if envelope.time == 0 {
            self.cancel(envelope.id)?;
            return Ok(None);
        }
        if !self.transactions.contains_key(&envelope.name) {
            return Err(DbError::UnknownTransaction(envelope.name));
        }

        let replaced = self
            .entries
            .iter()
            .position(|entry| entry.is_transient() && entry.id == envelope.id);
        let entry = ReconcilingEntry {
            id: envelope.id,
            name: envelope.name,
            args: envelope.args,
            time: envelope.time,
            result: None,
        };
        let options = TransactionOptions {
            transient: entry.is_transient(),
        };
        let mut index = insert_index(&self.entries, &entry);

        if replaced.is_none() && index == self.entries.len() {
            self.entries.push(entry);
            return match self.run(index, options, false) {
                Ok(result) => Ok(Some(result)),
                Err(err) => {
                    self.entries.pop();
                    Err(err)
                }
            };
        }

        let rollback_from = replaced.map_or(index, |replaced| replaced.min(index));
        debug!(
            rollback = self.entries.len() - rollback_from,
            "out of order, rolling back"
        );
        self.rollback_to(rollback_from)?;
        if let Some(replaced) = replaced {
            self.entries.remove(replaced);
            if replaced < index {
                index -= 1;
            }
        }
        self.entries.insert(index, entry);
        self.replay_from(rollback_from, Some((index, options)))
    }

    /// Remove the transient entry `id`, replaying what came after it.
    /// Returns `false` if there is no such entry.
    pub fn cancel(&mut self, id: u64) -> DbResult<bool> {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.is_transient() && entry.id == id)
        else {
            return Ok(false);
        };
        debug!(id, rollback = self.entries.len() - index, "cancelling transient entry");

        self.rollback_to(index)?;
        self.entries.remove(index);
        self.replay_from(index, None)?;
        Ok(true)
    }

    // ==================== State ====================

    /// Applied entries in order.
    #[must_use]
    pub fn entries(&self) -> &[ReconcilingEntry] {
        &self.entries
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// Observers and reads go through the database. Writes made through it
    /// bypass reconciliation.
    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    /// Store contents as if no transient entry had been applied.
    pub fn snapshot(&self) -> DbResult<StoreData> {
        let Some(first) = self.entries.iter().position(ReconcilingEntry::is_transient) else {
            return Ok(self.database.to_data());
        };

        let mut scratch = TransactionalStore::new(self.database.store().clone());
        for entry in self.entries[first..].iter().rev() {
            if let Some(result) = &entry.result {
                scratch.apply_operations(&result.undo, TransactionOptions::TRANSIENT)?;
            }
        }
        for entry in self.entries[first..].iter().filter(|e| !e.is_transient()) {
            let f = self.function(&entry.name)?;
            scratch.execute(TransactionOptions::TRANSIENT, |t| f(t, &entry.args))?;
        }
        Ok(scratch.to_data())
    }

    /// Replace committed state with `data` and replay transient entries on
    /// top. Committed entries are dropped; `data` is taken to include them.
    pub fn restore(&mut self, data: StoreData) -> DbResult<()> {
        self.entries.retain(ReconcilingEntry::is_transient);
        self.database.from_data(data)?;
        for position in 0..self.entries.len() {
            self.entries[position].result = None;
            self.run(position, TransactionOptions::TRANSIENT, false)?;
        }
        Ok(())
    }

    /// Forget the committed entries that precede every transient entry.
    ///
    /// Pruned entries can no longer be rolled back, so envelopes that sort
    /// before them must not arrive afterwards. Returns the number removed.
    pub fn prune_committed(&mut self) -> usize {
        let settled = self
            .entries
            .iter()
            .position(ReconcilingEntry::is_transient)
            .unwrap_or(self.entries.len());
        self.entries.drain(..settled);
        trace!(settled, "pruned committed entries");
        settled
    }

    // ==================== Internals ====================

    fn function(&self, name: &str) -> DbResult<TransactionFn> {
        self.transactions
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownTransaction(name.to_owned()))
    }

    /// Execute the entry at `position` and store its result.
    ///
    /// On a replay, the new redo log is checked against the stored one when
    /// `verify_replay` is set.
    fn run(
        &mut self,
        position: usize,
        options: TransactionOptions,
        replay: bool,
    ) -> DbResult<TransactionResult> {
        let entry = &self.entries[position];
        let f = self.function(&entry.name)?;
        let args = entry.args.clone();
        let result = self.database.execute(options, |t| f(t, &args))?;

        let entry = &mut self.entries[position];
        if replay && self.verify_replay {
            let before = entry.result.as_ref().map_or(&[][..], |r| r.redo.as_slice());
            if before != result.redo.as_slice() {
                warn!(
                    id = entry.id,
                    name = %entry.name,
                    time = entry.time,
                    "replay diverged from previous execution"
                );
            }
        }
        entry.result = (!result.is_noop()).then(|| result.clone());
        Ok(result)
    }

    /// Undo entries from `from` to the end, last first. Their stored results
    /// stay in place for replay verification.
    fn rollback_to(&mut self, from: usize) -> DbResult<()> {
        for position in (from..self.entries.len()).rev() {
            if let Some(result) = &self.entries[position].result {
                trace!(id = self.entries[position].id, "rolling back entry");
                self.database
                    .apply_operations(&result.undo, TransactionOptions::TRANSIENT)?;
            }
        }
        Ok(())
    }

    /// Re-execute entries from `start` on. `own` is the newly applied
    /// entry, which runs with its own options and is dropped again if its
    /// function fails.
    fn replay_from(
        &mut self,
        start: usize,
        mut own: Option<(usize, TransactionOptions)>,
    ) -> DbResult<Option<TransactionResult>> {
        let mut own_result = None;
        let mut rejected = None;
        let mut position = start;
        while position < self.entries.len() {
            match own {
                Some((index, options)) if index == position => {
                    own = None;
                    match self.run(position, options, false) {
                        Ok(result) => own_result = Some(result),
                        Err(err) => {
                            warn!(%err, "rejected envelope during replay");
                            self.entries.remove(position);
                            rejected = Some(err);
                            continue;
                        }
                    }
                }
                _ => {
                    if let Err(err) = self.run(position, TransactionOptions::TRANSIENT, true) {
                        // nothing from here on is applied
                        for entry in &mut self.entries[position..] {
                            entry.result = None;
                        }
                        return Err(err);
                    }
                }
            }
            position += 1;
        }
        rejected.map_or(Ok(own_result), Err)
    }
}

impl fmt::Debug for ReconcilingDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcilingDatabase")
            .field("database", &self.database)
            .field("transactions", &self.transactions.len())
            .field("entries", &self.entries.len())
            .field("verify_replay", &self.verify_replay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata_ecs::{Patch, Row};

    use super::*;

    /// A log resource that records the order transactions ran in.
    fn setup(verify_replay: bool) -> (ReconcilingDatabase, ComponentId) {
        let mut db = ReconcilingDatabase::new(DatabaseConfig {
            verify_replay,
            ..DatabaseConfig::default()
        });
        let log = db
            .register_resource("log", Schema::array(Schema::number()), json!([]))
            .unwrap();
        db.register_transaction("push", move |t, args| {
            let mut values = t.resource(log).unwrap_or_else(|| json!([]));
            if let Some(values) = values.as_array_mut() {
                values.push(args.clone());
            }
            t.set_resource(log, values)?;
            Ok(None)
        })
        .unwrap();
        (db, log)
    }

    fn push(id: u64, value: i64, time: i64) -> TransactionEnvelope {
        TransactionEnvelope::new(id, "push", json!(value), time)
    }

    fn times(db: &ReconcilingDatabase) -> Vec<i64> {
        db.entries().iter().map(|entry| entry.time).collect()
    }

    #[test]
    fn test_in_order_appends() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, 1)).unwrap();
        db.apply(push(2, 2, 2)).unwrap();
        assert_eq!(db.database().resource(log), Some(json!([1, 2])));
        assert_eq!(times(&db), [1, 2]);
    }

    #[test]
    fn test_out_of_order_replays_suffix() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 5, -5)).unwrap();
        db.apply(push(2, 10, 10)).unwrap();
        let result = db.apply(push(3, 3, -3)).unwrap().unwrap();

        assert!(result.transient);
        assert_eq!(times(&db), [-3, -5, 10]);
        assert_eq!(db.database().resource(log), Some(json!([3, 5, 10])));
    }

    #[test]
    fn test_cancel_removes_transient_entry() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, -1)).unwrap();
        db.apply(push(2, 2, 2)).unwrap();

        assert_eq!(db.apply(TransactionEnvelope::new(1, "push", Value::Null, 0)).unwrap(), None);
        assert_eq!(times(&db), [2]);
        assert_eq!(db.database().resource(log), Some(json!([2])));

        // committed entries cannot be cancelled
        assert!(!db.cancel(2).unwrap());
        assert!(!db.cancel(99).unwrap());
    }

    #[test]
    fn test_commit_replaces_transient_with_same_id() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, -1)).unwrap();
        db.apply(push(2, 2, -2)).unwrap();
        db.apply(push(1, 1, 3)).unwrap();

        assert_eq!(times(&db), [-2, 3]);
        assert_eq!(db.database().resource(log), Some(json!([2, 1])));
    }

    #[test]
    fn test_resubmitting_transient_replaces_it() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, -1)).unwrap();
        db.apply(push(1, 7, -1)).unwrap();
        assert_eq!(times(&db), [-1]);
        assert_eq!(db.database().resource(log), Some(json!([7])));
    }

    #[test]
    fn test_unknown_and_duplicate_transactions() {
        let (mut db, _) = setup(false);
        assert_eq!(
            db.apply(TransactionEnvelope::new(1, "missing", Value::Null, 1)),
            Err(DbError::UnknownTransaction("missing".to_owned()))
        );
        assert_eq!(
            db.register_transaction("push", |_, _| Ok(None)),
            Err(DbError::DuplicateTransaction("push".to_owned()))
        );
    }

    #[test]
    fn test_snapshot_excludes_transient_entries() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, 1)).unwrap();
        db.apply(push(2, 2, -2)).unwrap();
        db.apply(push(3, 3, 3)).unwrap();

        let snapshot = db.snapshot().unwrap();
        assert_eq!(db.database().resource(log), Some(json!([1, 2, 3])));

        let mut committed = Database::new();
        committed
            .register_resource("log", Schema::array(Schema::number()), json!([]))
            .unwrap();
        committed.from_data(snapshot).unwrap();
        assert_eq!(committed.resource(log), Some(json!([1, 3])));
    }

    #[test]
    fn test_restore_replays_transients() {
        let (mut db, log) = setup(false);
        db.apply(push(1, 1, 1)).unwrap();
        db.apply(push(2, 2, -2)).unwrap();
        let committed = db.snapshot().unwrap();

        db.apply(push(3, 3, 3)).unwrap();
        db.restore(committed).unwrap();
        assert_eq!(times(&db), [-2]);
        assert_eq!(db.database().resource(log), Some(json!([1, 2])));
    }

    #[test]
    fn test_prune_committed_prefix() {
        let (mut db, _) = setup(false);
        db.apply(push(1, 1, 1)).unwrap();
        db.apply(push(2, 2, 2)).unwrap();
        db.apply(push(3, 3, -3)).unwrap();
        db.apply(push(4, 4, 4)).unwrap();

        assert_eq!(db.prune_committed(), 2);
        assert_eq!(times(&db), [-3, 4]);
    }

    #[test]
    fn test_noop_results_are_not_stored() {
        let (mut db, _) = setup(false);
        db.register_transaction("nothing", |_, _| Ok(None)).unwrap();
        db.apply(TransactionEnvelope::new(1, "nothing", Value::Null, -1))
            .unwrap();
        assert!(db.entries()[0].result.is_none());
    }

    #[test]
    fn test_failed_envelope_is_rejected() {
        let (mut db, log) = setup(false);
        db.register_transaction("fail", |_, _| Err(DbError::Aborted("bad".to_owned())))
            .unwrap();
        db.apply(push(1, 1, -2)).unwrap();

        let err = db.apply(TransactionEnvelope::new(2, "fail", Value::Null, -1));
        assert_eq!(err, Err(DbError::Aborted("bad".to_owned())));
        assert_eq!(times(&db), [-2]);
        assert_eq!(db.database().resource(log), Some(json!([1])));
    }

    #[test]
    fn test_entity_inserts_survive_rollback() {
        let (mut db, _) = setup(false);
        let name = db.register_component("name", Schema::string()).unwrap();
        db.register_transaction("spawn", move |t, args| {
            Ok(Some(t.spawn(&Row::from([(name, args.clone())]))?))
        })
        .unwrap();
        db.register_transaction("rename", move |t, args| {
            let entity = t.select(&[name], &[]).into_iter().next();
            if let Some(entity) = entity {
                t.update(entity, Patch::from([(name, Some(args.clone()))]))?;
            }
            Ok(entity)
        })
        .unwrap();

        let spawned = db
            .apply(TransactionEnvelope::new(1, "spawn", json!("a"), -10))
            .unwrap()
            .unwrap()
            .value
            .unwrap();
        db.apply(TransactionEnvelope::new(2, "rename", json!("b"), 20)).unwrap();
        db.apply(TransactionEnvelope::new(3, "rename", json!("c"), -5)).unwrap();

        assert_eq!(db.database().get(spawned, name), Some(json!("b")));
        assert_eq!(db.database().len(), 2);
    }
}
