//! Columns of arbitrary JSON values.

use std::sync::Arc;

use serde_json::Value;

use crate::schema::Schema;

/// One boxed value per slot, used for shapes that have no fixed-width form
/// (strings, variable-length arrays, unbounded numbers inside objects).
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayBuffer {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl ArrayBuffer {
    #[must_use]
    pub fn new(schema: Arc<Schema>, capacity: usize) -> Self {
        Self {
            schema,
            values: vec![Value::Null; capacity],
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The backing values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.values.resize(capacity, Value::Null);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.values[index].clone()
    }

    pub fn set(&mut self, index: usize, value: &Value) {
        self.values[index].clone_from(value);
    }

    pub fn copy_within(&mut self, target: usize, start: usize, end: usize) {
        if target <= start {
            for i in 0..end - start {
                self.values[target + i] = self.values[start + i].clone();
            }
        } else {
            for i in (0..end - start).rev() {
                self.values[target + i] = self.values[start + i].clone();
            }
        }
    }

    /// Compares against the declared default; without one, `null` is default.
    #[must_use]
    pub fn is_default(&self, index: usize) -> bool {
        let value = &self.values[index];
        self.schema
            .default
            .as_ref()
            .map_or(value.is_null(), |default| default == value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_copy_within_overlapping() {
        let mut buffer = ArrayBuffer::new(Arc::new(Schema::string()), 5);
        for i in 0..5 {
            buffer.set(i, &json!(format!("v{i}")));
        }
        buffer.copy_within(1, 0, 3);
        let values: Vec<_> = buffer.values().iter().cloned().collect();
        assert_eq!(values, [json!("v0"), json!("v0"), json!("v1"), json!("v2"), json!("v4")]);
    }

    #[test]
    fn test_default_by_value() {
        let schema = Schema::string().with_default(json!("untitled"));
        let mut buffer = ArrayBuffer::new(Arc::new(schema), 2);
        buffer.set(0, &json!("untitled"));
        buffer.set(1, &json!("report"));
        assert!(buffer.is_default(0));
        assert!(!buffer.is_default(1));

        let plain = ArrayBuffer::new(Arc::new(Schema::string()), 1);
        assert!(plain.is_default(0));
    }
}
