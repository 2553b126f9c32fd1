//! Zero-storage columns.

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::schema::Schema;

/// Column where every row holds the schema's `const` value.
///
/// Only a logical capacity is tracked; writes are ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstBuffer {
    schema: Arc<Schema>,
    value: Value,
    capacity: usize,
}

impl ConstBuffer {
    #[must_use]
    pub fn new(schema: Arc<Schema>, value: Value, capacity: usize) -> Self {
        Self {
            schema,
            value,
            capacity,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    #[must_use]
    pub fn get(&self, _index: usize) -> Value {
        self.value.clone()
    }

    pub fn set(&mut self, index: usize, value: &Value) {
        if *value != self.value {
            trace!(index, %value, "ignored write to const column");
        }
    }

    #[must_use]
    pub fn is_default(&self, _index: usize) -> bool {
        self.schema.default.as_ref() == Some(&self.value)
    }
}
