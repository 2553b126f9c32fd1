//! Undo/redo service.
//!
//! Records undoable, non-transient transaction results published by a
//! [`Database`] onto a stack with a cursor. Undo applies the entry below
//! the cursor's undo log; redo applies the entry at the cursor's redo log.
//! Both go through [`Database::apply_operations`] and are not themselves
//! recorded. Results that changed nothing are skipped, and a store reload
//! clears the stack.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    database::Database,
    error::DbResult,
    observe::{ObserverId, Observers},
    operation::coalesce_write_operations,
    transaction::{TransactionOptions, TransactionResult},
};

/// Snapshot of the stack published to state observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoRedoState {
    pub len: usize,
    pub index: usize,
}

impl UndoRedoState {
    #[must_use]
    pub const fn undo_enabled(self) -> bool {
        self.index > 0
    }

    #[must_use]
    pub const fn redo_enabled(self) -> bool {
        self.index < self.len
    }
}

/// Whether `current` merges into `previous` on the undo stack.
#[must_use]
pub fn should_coalesce(previous: &TransactionResult, current: &TransactionResult) -> bool {
    match (&previous.undoable, &current.undoable) {
        (Some(previous), Some(current)) => {
            previous.coalesce && current.coalesce && previous.id == current.id
        }
        _ => false,
    }
}

/// Merge `current` into `previous`.
///
/// Redo runs both in order. Undo keeps only `previous.undo`, which restores
/// the state from before the first step.
#[must_use]
pub fn coalesce_transactions(
    previous: &TransactionResult,
    current: &TransactionResult,
) -> TransactionResult {
    let mut changed_entities = previous.changed_entities.clone();
    changed_entities.extend(current.changed_entities.iter().copied());
    let mut changed_components = previous.changed_components.clone();
    changed_components.extend(current.changed_components.iter().copied());
    let mut changed_archetypes = previous.changed_archetypes.clone();
    changed_archetypes.extend(current.changed_archetypes.iter().copied());

    TransactionResult {
        value: current.value,
        transient: current.transient,
        undoable: current.undoable.clone(),
        redo: coalesce_write_operations(
            previous.redo.iter().chain(&current.redo).cloned(),
        ),
        undo: previous.undo.clone(),
        changed_entities,
        changed_components,
        changed_archetypes,
        reload: false,
    }
}

#[derive(Default)]
struct UndoStack {
    entries: Vec<TransactionResult>,
    index: usize,
    observers: Observers<UndoRedoState>,
}

impl UndoStack {
    const fn state(&self) -> UndoRedoState {
        UndoRedoState {
            len: self.entries.len(),
            index: self.index,
        }
    }

    fn record(&mut self, result: &TransactionResult) -> bool {
        if result.reload {
            // entries may name entities the new contents lack
            self.entries.clear();
            self.index = 0;
            return true;
        }
        if result.transient || result.undoable.is_none() || !result.has_changes() {
            return false;
        }
        match self.index.checked_sub(1).map(|top| &mut self.entries[top]) {
            Some(top) if should_coalesce(top, result) => {
                *top = coalesce_transactions(top, result);
            }
            _ => {
                self.entries.truncate(self.index);
                self.entries.push(result.clone());
                self.index += 1;
            }
        }
        true
    }
}

/// Undo/redo stack attached to one [`Database`].
#[derive(Clone)]
pub struct UndoRedoService {
    stack: Arc<Mutex<UndoStack>>,
    subscription: ObserverId,
}

impl UndoRedoService {
    /// Start recording results published by `database`.
    pub fn attach(database: &mut Database) -> Self {
        let stack = Arc::new(Mutex::new(UndoStack::default()));
        let recorder = Arc::clone(&stack);
        let subscription = database.observe_transactions(move |result| {
            let mut stack = recorder.lock();
            if stack.record(result) {
                let state = stack.state();
                let callbacks = stack.observers.callbacks();
                drop(stack);
                for callback in callbacks {
                    callback(&state);
                }
            }
        });
        Self {
            stack,
            subscription,
        }
    }

    /// Stop recording. The stack keeps its entries.
    pub fn detach(&self, database: &mut Database) -> bool {
        database.unobserve_transactions(self.subscription)
    }

    /// Step back one entry. Returns `Ok(false)` when there is nothing to
    /// undo.
    pub fn undo(&self, database: &mut Database) -> DbResult<bool> {
        let operations = {
            let stack = self.stack.lock();
            match stack.index.checked_sub(1) {
                Some(index) => stack.entries[index].undo.clone(),
                None => return Ok(false),
            }
        };
        database.apply_operations(&operations, TransactionOptions::default())?;
        self.move_cursor(|index| index - 1);
        debug!(ops = operations.len(), "undo");
        Ok(true)
    }

    /// Re-apply the entry at the cursor. Returns `Ok(false)` when there is
    /// nothing to redo.
    pub fn redo(&self, database: &mut Database) -> DbResult<bool> {
        let operations = {
            let stack = self.stack.lock();
            match stack.entries.get(stack.index) {
                Some(entry) => entry.redo.clone(),
                None => return Ok(false),
            }
        };
        database.apply_operations(&operations, TransactionOptions::default())?;
        self.move_cursor(|index| index + 1);
        debug!(ops = operations.len(), "redo");
        Ok(true)
    }

    #[must_use]
    pub fn state(&self) -> UndoRedoState {
        self.stack.lock().state()
    }

    #[must_use]
    pub fn undo_enabled(&self) -> bool {
        self.state().undo_enabled()
    }

    #[must_use]
    pub fn redo_enabled(&self) -> bool {
        self.state().redo_enabled()
    }

    /// Recorded entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<TransactionResult> {
        self.stack.lock().entries.clone()
    }

    /// Observe stack length and cursor changes.
    pub fn observe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&UndoRedoState) + Send + Sync + 'static,
    {
        self.stack.lock().observers.subscribe(callback)
    }

    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.stack.lock().observers.unsubscribe(id)
    }

    fn move_cursor(&self, step: impl FnOnce(usize) -> usize) {
        let mut stack = self.stack.lock();
        stack.index = step(stack.index);
        let state = stack.state();
        let callbacks = stack.observers.callbacks();
        drop(stack);
        for callback in callbacks {
            callback(&state);
        }
    }
}

impl fmt::Debug for UndoRedoService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoRedoService")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
