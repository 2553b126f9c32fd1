#![allow(clippy::missing_panics_doc)]

//! Strata DB - transactions, undo/redo and reconciliation.
//!
//! # Layers
//!
//! - [`TransactionalStore`]: runs a function against a recording
//!   [`Transaction`] and returns its redo and undo logs
//! - [`Database`]: publishes each successful result to observers
//! - [`UndoRedoService`]: an undo stack fed by a database's results
//! - [`ReconcilingDatabase`]: applies time-ordered envelopes, rolling back
//!   and replaying when one arrives out of order
//!
//! ```ignore
//! let mut db = Database::new();
//! let position = db.register_component("position", Schema::f32())?;
//! let undo = UndoRedoService::attach(&mut db);
//!
//! db.execute(TransactionOptions::default(), |t| {
//!     t.set_undoable(Undoable::coalescing("drag"));
//!     t.spawn(&Row::from([(position, json!(1.0))]))
//! })?;
//! undo.undo(&mut db)?;
//! ```

mod config;
mod database;
mod error;
mod observe;
mod operation;
mod reconcile;
mod transaction;
mod undo;

pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{DbError, DbResult};
pub use observe::{ObserverId, Observers};
pub use operation::{WriteOperation, coalesce_write_operations};
pub use reconcile::{ReconcilingDatabase, ReconcilingEntry, TransactionEnvelope, TransactionFn};
pub use transaction::{
    Transaction, TransactionOptions, TransactionResult, TransactionValue, TransactionalStore,
    Undoable,
};
pub use undo::{UndoRedoService, UndoRedoState, coalesce_transactions, should_coalesce};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Database, ReconcilingDatabase, TransactionEnvelope, TransactionOptions, Undoable,
        UndoRedoService,
    };
    pub use strata_ecs::prelude::*;
}
