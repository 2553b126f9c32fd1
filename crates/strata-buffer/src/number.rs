//! Fixed-width numeric columns.

use std::{ops::Range, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{BufferError, BufferResult},
    schema::{Schema, SchemaType},
};

/// Element type of a numeric column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    U32,
    I32,
    F32,
    F64,
}

impl NumberKind {
    /// Narrowest element type that holds every value `schema` admits.
    ///
    /// Returns `None` for non-numeric schemas.
    #[must_use]
    pub fn for_schema(schema: &Schema) -> Option<Self> {
        match schema.ty? {
            SchemaType::Integer => Some(match (schema.minimum, schema.maximum) {
                (Some(min), Some(max)) if min >= 0.0 && max <= f64::from(u32::MAX) => Self::U32,
                (Some(min), Some(max))
                    if min >= f64::from(i32::MIN) && max <= f64::from(i32::MAX) =>
                {
                    Self::I32
                }
                _ => Self::F64,
            }),
            SchemaType::Number if schema.precision == Some(1) => Some(Self::F32),
            SchemaType::Number => Some(Self::F64),
            _ => None,
        }
    }

    /// Element width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Owned numeric storage, one variant per element type.
#[derive(Clone, Debug, PartialEq)]
pub enum NumericVec {
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Borrowed numeric view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TypedArrayRef<'a> {
    U32(&'a [u32]),
    I32(&'a [i32]),
    F32(&'a [f32]),
    F64(&'a [f64]),
}

macro_rules! each_numeric {
    ($enum:ident, $value:expr, $data:ident => $body:expr) => {
        match $value {
            $enum::U32($data) => $body,
            $enum::I32($data) => $body,
            $enum::F32($data) => $body,
            $enum::F64($data) => $body,
        }
    };
}

impl NumericVec {
    /// `len` zeroes of the given kind.
    #[must_use]
    pub fn zeroed(kind: NumberKind, len: usize) -> Self {
        match kind {
            NumberKind::U32 => Self::U32(vec![0; len]),
            NumberKind::I32 => Self::I32(vec![0; len]),
            NumberKind::F32 => Self::F32(vec![0.0; len]),
            NumberKind::F64 => Self::F64(vec![0.0; len]),
        }
    }

    /// Reinterpret little-endian `bytes` as elements of `kind`.
    pub fn from_bytes(kind: NumberKind, bytes: &[u8]) -> BufferResult<Self> {
        let width = kind.width();
        if bytes.len() % width != 0 {
            return Err(BufferError::ByteLength {
                expected: bytes.len() / width * width,
                actual: bytes.len(),
            });
        }
        let chunks = bytes.chunks_exact(width);
        Ok(match kind {
            NumberKind::U32 => Self::U32(chunks.map(bytemuck::pod_read_unaligned).collect()),
            NumberKind::I32 => Self::I32(chunks.map(bytemuck::pod_read_unaligned).collect()),
            NumberKind::F32 => Self::F32(chunks.map(bytemuck::pod_read_unaligned).collect()),
            NumberKind::F64 => Self::F64(chunks.map(bytemuck::pod_read_unaligned).collect()),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> NumberKind {
        match self {
            Self::U32(_) => NumberKind::U32,
            Self::I32(_) => NumberKind::I32,
            Self::F32(_) => NumberKind::F32,
            Self::F64(_) => NumberKind::F64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        each_numeric!(NumericVec, self, data => data.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink, zero-filling new slots.
    pub fn resize(&mut self, len: usize) {
        each_numeric!(NumericVec, self, data => data.resize(len, Default::default()));
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        each_numeric!(NumericVec, self, data => bytemuck::cast_slice(data.as_slice()))
    }

    #[must_use]
    pub fn as_typed_array(&self) -> TypedArrayRef<'_> {
        self.slice(0..self.len())
    }

    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    #[must_use]
    pub fn slice(&self, range: Range<usize>) -> TypedArrayRef<'_> {
        match self {
            Self::U32(data) => TypedArrayRef::U32(&data[range]),
            Self::I32(data) => TypedArrayRef::I32(&data[range]),
            Self::F32(data) => TypedArrayRef::F32(&data[range]),
            Self::F64(data) => TypedArrayRef::F64(&data[range]),
        }
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        each_numeric!(NumericVec, self, data => Value::from(data[index]))
    }

    /// Store `value`, truncating or saturating into the element type.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, value: f64) {
        each_numeric!(NumericVec, self, data => data[index] = value as _);
    }

    /// # Panics
    ///
    /// Panics if either range is out of bounds.
    pub fn copy_within(&mut self, target: usize, start: usize, end: usize) {
        each_numeric!(NumericVec, self, data => data.copy_within(start..end, target));
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_zero(&self, index: usize) -> bool {
        match self {
            Self::U32(data) => data[index] == 0,
            Self::I32(data) => data[index] == 0,
            Self::F32(data) => data[index] == 0.0,
            Self::F64(data) => data[index] == 0.0,
        }
    }
}

impl<'a> TypedArrayRef<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        each_numeric!(TypedArrayRef, self, data => data.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn kind(&self) -> NumberKind {
        match self {
            Self::U32(_) => NumberKind::U32,
            Self::I32(_) => NumberKind::I32,
            Self::F32(_) => NumberKind::F32,
            Self::F64(_) => NumberKind::F64,
        }
    }

    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        each_numeric!(TypedArrayRef, self, data => Value::from(data[index]))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        each_numeric!(TypedArrayRef, *self, data => bytemuck::cast_slice(data))
    }

    #[must_use]
    pub fn to_owned_vec(&self) -> NumericVec {
        match *self {
            Self::U32(data) => NumericVec::U32(data.to_vec()),
            Self::I32(data) => NumericVec::I32(data.to_vec()),
            Self::F32(data) => NumericVec::F32(data.to_vec()),
            Self::F64(data) => NumericVec::F64(data.to_vec()),
        }
    }
}

/// Column of fixed-width numbers.
///
/// Zero is the default of every slot regardless of the declared default.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberBuffer {
    schema: Arc<Schema>,
    data: NumericVec,
}

impl NumberBuffer {
    #[must_use]
    pub fn new(schema: Arc<Schema>, kind: NumberKind, capacity: usize) -> Self {
        Self {
            schema,
            data: NumericVec::zeroed(kind, capacity),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub fn data(&self) -> &NumericVec {
        &self.data
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.data.resize(capacity);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.data.get(index)
    }

    /// Numbers and booleans are accepted; `null` stores zero.
    pub fn set(&mut self, index: usize, value: &Value) -> BufferResult<()> {
        let number = match value {
            Value::Number(number) => number.as_f64().unwrap_or_default(),
            Value::Bool(flag) => f64::from(u8::from(*flag)),
            Value::Null => 0.0,
            other => return Err(BufferError::NotNumeric(other.clone())),
        };
        self.data.set(index, number);
        Ok(())
    }

    pub fn copy_within(&mut self, target: usize, start: usize, end: usize) {
        self.data.copy_within(target, start, end);
    }

    #[must_use]
    pub fn is_default(&self, index: usize) -> bool {
        self.data.is_zero(index)
    }

    /// Replace the contents with `bytes`, which must match the current
    /// capacity exactly.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let expected = self.capacity() * self.data.kind().width();
        if bytes.len() != expected {
            return Err(BufferError::ByteLength {
                expected,
                actual: bytes.len(),
            });
        }
        self.data = NumericVec::from_bytes(self.data.kind(), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_kind_selection() {
        assert_eq!(NumberKind::for_schema(&Schema::u32()), Some(NumberKind::U32));
        assert_eq!(NumberKind::for_schema(&Schema::i32()), Some(NumberKind::I32));
        assert_eq!(NumberKind::for_schema(&Schema::f32()), Some(NumberKind::F32));
        assert_eq!(NumberKind::for_schema(&Schema::number()), Some(NumberKind::F64));
        assert_eq!(
            NumberKind::for_schema(&Schema::integer(0.0, 1e12)),
            Some(NumberKind::F64)
        );
        assert_eq!(
            NumberKind::for_schema(&Schema::of_type(SchemaType::Integer)),
            Some(NumberKind::F64)
        );
        assert_eq!(NumberKind::for_schema(&Schema::string()), None);
    }

    #[test]
    fn test_set_get_and_default() {
        let mut buffer = NumberBuffer::new(Arc::new(Schema::i32()), NumberKind::I32, 4);
        buffer.set(1, &json!(-12)).unwrap();
        buffer.set(2, &json!(true)).unwrap();

        assert_eq!(buffer.get(1), json!(-12));
        assert_eq!(buffer.get(2), json!(1));
        assert!(buffer.is_default(0));
        assert!(!buffer.is_default(1));
        assert!(buffer.set(0, &json!("x")).is_err());
    }

    #[test]
    fn test_zero_is_default_despite_declared_default() {
        let schema = Schema::number().with_default(json!(3.0));
        let mut buffer = NumberBuffer::new(Arc::new(schema), NumberKind::F64, 2);
        buffer.set(1, &json!(3.0)).unwrap();
        assert!(buffer.is_default(0));
        assert!(!buffer.is_default(1));
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut buffer = NumberBuffer::new(Arc::new(Schema::f32()), NumberKind::F32, 3);
        buffer.set(0, &json!(0.25)).unwrap();
        buffer.set(2, &json!(-8.0)).unwrap();
        let bytes = buffer.data().as_bytes().to_vec();

        let mut copy = NumberBuffer::new(Arc::new(Schema::f32()), NumberKind::F32, 3);
        copy.load_bytes(&bytes).unwrap();
        assert_eq!(copy, buffer);

        assert_eq!(
            copy.load_bytes(&bytes[..8]),
            Err(BufferError::ByteLength {
                expected: 12,
                actual: 8
            })
        );
    }
}
