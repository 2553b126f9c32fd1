//! The typed column abstraction.
//!
//! A [`TypedBuffer`] is one component's column. The variant is chosen once
//! from the schema (see [`BufferKind::for_schema`]) and never changes:
//!
//! 1. `const` present: [`ConstBuffer`]
//! 2. numeric type: [`NumberBuffer`]
//! 3. compiles as a struct layout: [`StructBuffer`]
//! 4. anything else: [`ArrayBuffer`]
//!
//! Every buffer exclusively owns its storage. Growth reallocates and keeps
//! the existing population; `copy` shares nothing mutable with the original.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    accessor::StructAccessor,
    array::ArrayBuffer,
    constant::ConstBuffer,
    error::{BufferError, BufferResult},
    layout::StructLayout,
    number::{NumberBuffer, NumberKind, TypedArrayRef},
    schema::Schema,
    structured::StructBuffer,
};

/// Byte views of number and struct columns are their in-memory
/// representation, which is only the documented little-endian format on
/// little-endian targets.
const _: () = {
    #[cfg(not(target_endian = "little"))]
    compile_error!("strata-buffer only supports little-endian architectures");
};

/// Default number of slots for a freshly created buffer.
pub const DEFAULT_CAPACITY: usize = 16;

/// Buffer variant selected for a schema, with anything precompiled.
#[derive(Clone, Debug)]
pub enum BufferKind {
    Const(Value),
    Number(NumberKind),
    Struct {
        layout: Arc<StructLayout>,
        accessor: Arc<StructAccessor>,
    },
    Array,
}

impl BufferKind {
    /// Select the buffer variant for `schema`.
    ///
    /// A schema with an explicit `layout` must compile as a struct; any other
    /// composite that fails to compile falls back to an array buffer.
    pub fn for_schema(schema: &Schema) -> BufferResult<Self> {
        if let Some(value) = &schema.constant {
            return Ok(Self::Const(value.clone()));
        }
        if let Some(kind) = NumberKind::for_schema(schema) {
            return Ok(Self::Number(kind));
        }
        match StructLayout::from_schema(schema) {
            Ok(layout) => Ok(Self::Struct {
                accessor: StructAccessor::for_layout(&layout),
                layout,
            }),
            Err(err) if schema.layout.is_some() => Err(err.into()),
            Err(_) => Ok(Self::Array),
        }
    }

    /// Create an empty column of this kind.
    #[must_use]
    pub fn create(&self, schema: &Arc<Schema>, capacity: usize) -> TypedBuffer {
        let schema = Arc::clone(schema);
        match self {
            Self::Const(value) => {
                TypedBuffer::Const(ConstBuffer::new(schema, value.clone(), capacity))
            }
            Self::Number(kind) => TypedBuffer::Number(NumberBuffer::new(schema, *kind, capacity)),
            Self::Struct { layout, accessor } => TypedBuffer::Struct(StructBuffer::new(
                schema,
                Arc::clone(layout),
                Arc::clone(accessor),
                capacity,
            )),
            Self::Array => TypedBuffer::Array(ArrayBuffer::new(schema, capacity)),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Const(_) => "const",
            Self::Number(_) => "number",
            Self::Struct { .. } => "struct",
            Self::Array => "array",
        }
    }
}

/// A single component column.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedBuffer {
    Number(NumberBuffer),
    Array(ArrayBuffer),
    Struct(StructBuffer),
    Const(ConstBuffer),
}

macro_rules! each_buffer {
    ($value:expr, $buffer:ident => $body:expr) => {
        match $value {
            TypedBuffer::Number($buffer) => $body,
            TypedBuffer::Array($buffer) => $body,
            TypedBuffer::Struct($buffer) => $body,
            TypedBuffer::Const($buffer) => $body,
        }
    };
}

impl TypedBuffer {
    /// Create a column for `schema` with `capacity` slots.
    pub fn new(schema: impl Into<Arc<Schema>>, capacity: usize) -> BufferResult<Self> {
        let schema = schema.into();
        Ok(BufferKind::for_schema(&schema)?.create(&schema, capacity))
    }

    /// Create a column holding exactly `values`.
    pub fn from_values(schema: impl Into<Arc<Schema>>, values: &[Value]) -> BufferResult<Self> {
        let mut buffer = Self::new(schema, values.len())?;
        for (index, value) in values.iter().enumerate() {
            buffer.set(index, value)?;
        }
        Ok(buffer)
    }

    /// Variant name: `number`, `array`, `struct` or `const`.
    #[must_use]
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Const(_) => "const",
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        each_buffer!(self, buffer => buffer.schema())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        each_buffer!(self, buffer => buffer.capacity())
    }

    /// Grow or shrink to `capacity` slots, keeping the common prefix.
    pub fn set_capacity(&mut self, capacity: usize) {
        each_buffer!(self, buffer => buffer.set_capacity(capacity));
    }

    /// # Panics
    ///
    /// Panics if `index` is beyond the capacity.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        each_buffer!(self, buffer => buffer.get(index))
    }

    /// Write `value` into slot `index`. Const columns ignore writes.
    ///
    /// # Panics
    ///
    /// Panics if `index` is beyond the capacity.
    pub fn set(&mut self, index: usize, value: &Value) -> BufferResult<()> {
        match self {
            Self::Number(buffer) => buffer.set(index, value),
            Self::Struct(buffer) => buffer.set(index, value),
            Self::Array(buffer) => {
                buffer.set(index, value);
                Ok(())
            }
            Self::Const(buffer) => {
                buffer.set(index, value);
                Ok(())
            }
        }
    }

    /// Copy slots `start..end` so they begin at `target`.
    ///
    /// # Panics
    ///
    /// Panics if either range is beyond the capacity.
    pub fn copy_within(&mut self, target: usize, start: usize, end: usize) {
        match self {
            Self::Number(buffer) => buffer.copy_within(target, start, end),
            Self::Struct(buffer) => buffer.copy_within(target, start, end),
            Self::Array(buffer) => buffer.copy_within(target, start, end),
            Self::Const(_) => {}
        }
    }

    /// An independent clone; mutating either side never affects the other.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Whether slot `index` holds the schema default.
    ///
    /// Numeric columns treat zero as default regardless of the declared
    /// default; the other variants compare against the declared default.
    #[must_use]
    pub fn is_default(&self, index: usize) -> bool {
        each_buffer!(self, buffer => buffer.is_default(index))
    }

    /// Borrow slots `start..end` without copying.
    ///
    /// # Panics
    ///
    /// Panics if the range is beyond the capacity.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> BufferSlice<'_> {
        match self {
            Self::Number(buffer) => BufferSlice::Number(buffer.data().slice(start..end)),
            Self::Array(buffer) => BufferSlice::Array(&buffer.values()[start..end]),
            Self::Struct(buffer) => {
                let stride = buffer.accessor().stride();
                BufferSlice::Struct {
                    words: &buffer.words()[start * stride..end * stride],
                    accessor: buffer.accessor(),
                }
            }
            Self::Const(buffer) => {
                assert!(start <= end && end <= buffer.capacity(), "slice out of range");
                BufferSlice::Const {
                    value: buffer.value(),
                    len: end - start,
                }
            }
        }
    }

    /// Typed numeric view of the whole column.
    ///
    /// Struct columns expose their raw words. Const and array columns have
    /// no numeric backing and return an error.
    pub fn typed_array(&self) -> BufferResult<TypedArrayRef<'_>> {
        match self {
            Self::Number(buffer) => Ok(buffer.data().as_typed_array()),
            Self::Struct(buffer) => Ok(TypedArrayRef::U32(buffer.words())),
            Self::Array(_) | Self::Const(_) => Err(BufferError::NoTypedView(self.variant())),
        }
    }

    /// Raw little-endian bytes of number and struct columns.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Number(buffer) => Some(buffer.data().as_bytes()),
            Self::Struct(buffer) => Some(bytemuck::cast_slice(buffer.words())),
            Self::Array(_) | Self::Const(_) => None,
        }
    }

    /// Replace the contents of a number or struct column with raw bytes.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> BufferResult<()> {
        match self {
            Self::Number(buffer) => buffer.load_bytes(bytes),
            Self::Struct(buffer) => buffer.load_bytes(bytes),
            Self::Array(_) | Self::Const(_) => Err(BufferError::NoTypedView(self.variant())),
        }
    }
}

/// Borrowed view over a range of slots.
#[derive(Clone, Copy, Debug)]
pub enum BufferSlice<'a> {
    Number(TypedArrayRef<'a>),
    Array(&'a [Value]),
    Struct {
        words: &'a [u32],
        accessor: &'a StructAccessor,
    },
    Const {
        value: &'a Value,
        len: usize,
    },
}

impl BufferSlice<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Number(array) => array.len(),
            Self::Array(values) => values.len(),
            Self::Struct { words, accessor } => words.len() / accessor.stride(),
            Self::Const { len, .. } => *len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        match self {
            Self::Number(array) => array.get(index),
            Self::Array(values) => values[index].clone(),
            Self::Struct { words, accessor } => accessor.read(words, index),
            Self::Const { value, len } => {
                assert!(index < *len, "index {index} out of range for slice of {len}");
                (*value).clone()
            }
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }
}
