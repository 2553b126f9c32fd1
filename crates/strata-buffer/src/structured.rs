//! Columns of fixed-layout composite records.

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{
    accessor::StructAccessor,
    error::{BufferError, BufferResult},
    layout::StructLayout,
    schema::Schema,
};

/// Records laid out back to back in one word array, read and written through
/// a shared [`StructAccessor`].
#[derive(Clone)]
pub struct StructBuffer {
    schema: Arc<Schema>,
    layout: Arc<StructLayout>,
    accessor: Arc<StructAccessor>,
    words: Vec<u32>,
}

impl StructBuffer {
    #[must_use]
    pub fn new(
        schema: Arc<Schema>,
        layout: Arc<StructLayout>,
        accessor: Arc<StructAccessor>,
        capacity: usize,
    ) -> Self {
        let words = vec![0; capacity * accessor.stride()];
        Self {
            schema,
            layout,
            accessor,
            words,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn layout(&self) -> &Arc<StructLayout> {
        &self.layout
    }

    #[must_use]
    pub fn accessor(&self) -> &StructAccessor {
        &self.accessor
    }

    /// The backing words, `capacity * stride` long.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() / self.accessor.stride()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.words.resize(capacity * self.accessor.stride(), 0);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.accessor.read(&self.words, index)
    }

    pub fn set(&mut self, index: usize, value: &Value) -> BufferResult<()> {
        self.accessor.write(&mut self.words, index, value)
    }

    pub fn copy_within(&mut self, target: usize, start: usize, end: usize) {
        let stride = self.accessor.stride();
        self.words
            .copy_within(start * stride..end * stride, target * stride);
    }

    /// Compares against the declared default; without one, an all-zero
    /// record is default.
    #[must_use]
    pub fn is_default(&self, index: usize) -> bool {
        match &self.schema.default {
            Some(default) => self.get(index) == *default,
            None => {
                let stride = self.accessor.stride();
                self.words[index * stride..(index + 1) * stride]
                    .iter()
                    .all(|word| *word == 0)
            }
        }
    }

    /// Replace the contents with little-endian `bytes`, which must match the
    /// current capacity exactly.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let expected = self.words.len() * 4;
        if bytes.len() != expected {
            return Err(BufferError::ByteLength {
                expected,
                actual: bytes.len(),
            });
        }
        self.words = bytes
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Ok(())
    }
}

impl PartialEq for StructBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.words == other.words
    }
}

impl fmt::Debug for StructBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructBuffer")
            .field("layout", &self.layout)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
