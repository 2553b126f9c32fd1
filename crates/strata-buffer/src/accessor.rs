//! Precompiled record accessors for struct buffers.
//!
//! A [`StructLayout`] is flattened once into two small programs that address
//! the backing words directly:
//!
//! - the read program loads each leaf at its absolute word offset and
//!   assembles arrays and objects bottom-up on a value stack;
//! - the write program walks the incoming value top-down, storing each leaf
//!   at its precomputed word.
//!
//! Neither program consults the schema or the layout tree at run time.
//! Programs are cached process-wide by structural layout identity, so every
//! buffer created for the same shape shares one [`StructAccessor`].

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{
    error::{BufferError, BufferResult},
    layout::{FieldType, StructKind, StructLayout, ViewType},
};

static ACCESSORS: LazyLock<Mutex<FxHashMap<Arc<StructLayout>, Arc<StructAccessor>>>> =
    LazyLock::new(Default::default);

#[derive(Clone, Copy, Debug)]
enum ReadOp {
    Load { word: usize, view: ViewType },
    Array(usize),
    Object(usize),
}

#[derive(Clone, Debug)]
enum WriteOp {
    Field(Arc<str>),
    Element(usize),
    Store { word: usize, view: ViewType },
    Pop,
}

impl ViewType {
    fn load(self, word: u32) -> Value {
        match self {
            Self::F32 => Value::from(f32::from_bits(word)),
            Self::I32 => Value::from(word as i32),
            Self::U32 => Value::from(word),
        }
    }

    fn store(self, value: Option<&Value>) -> BufferResult<u32> {
        let number = match value {
            None | Some(Value::Null) => 0.0,
            Some(Value::Bool(flag)) => f64::from(u8::from(*flag)),
            Some(Value::Number(number)) => number.as_f64().unwrap_or_default(),
            Some(other) => return Err(BufferError::NotNumeric(other.clone())),
        };
        Ok(match self {
            Self::F32 => (number as f32).to_bits(),
            Self::I32 => (number as i32) as u32,
            Self::U32 => number as u32,
        })
    }
}

/// Compiled read/write programs for one layout.
#[derive(Debug)]
pub struct StructAccessor {
    stride: usize,
    read: Box<[ReadOp]>,
    write: Box<[WriteOp]>,
    shapes: Box<[Box<[Arc<str>]>]>,
}

impl StructAccessor {
    /// Shared accessor for `layout`, compiling it on first use.
    pub fn for_layout(layout: &Arc<StructLayout>) -> Arc<Self> {
        let mut cache = ACCESSORS.lock();
        if let Some(accessor) = cache.get(layout) {
            return Arc::clone(accessor);
        }
        let accessor = Arc::new(Self::compile(layout));
        trace!(
            size = layout.size(),
            read_ops = accessor.read.len(),
            write_ops = accessor.write.len(),
            "compiled struct accessor"
        );
        cache.insert(Arc::clone(layout), Arc::clone(&accessor));
        accessor
    }

    fn compile(layout: &StructLayout) -> Self {
        let mut read = Vec::new();
        let mut write = Vec::new();
        let mut shapes = Vec::new();
        compile_read(layout, 0, &mut read, &mut shapes);
        compile_write(layout, 0, &mut write);
        Self {
            stride: layout.words(),
            read: read.into_boxed_slice(),
            write: write.into_boxed_slice(),
            shapes: shapes.into_boxed_slice(),
        }
    }

    /// Words per record.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Decode record `index` from `words`.
    ///
    /// # Panics
    ///
    /// Panics if the record lies outside `words`.
    #[must_use]
    pub fn read(&self, words: &[u32], index: usize) -> Value {
        let record = &words[index * self.stride..(index + 1) * self.stride];
        let mut stack: Vec<Value> = Vec::with_capacity(self.read.len());
        for op in &*self.read {
            match *op {
                ReadOp::Load { word, view } => stack.push(view.load(record[word])),
                ReadOp::Array(len) => {
                    let items = stack.split_off(stack.len() - len);
                    stack.push(Value::Array(items));
                }
                ReadOp::Object(shape) => {
                    let keys = &self.shapes[shape];
                    let values = stack.split_off(stack.len() - keys.len());
                    let fields = keys
                        .iter()
                        .map(|key| key.to_string())
                        .zip(values)
                        .collect::<Map<_, _>>();
                    stack.push(Value::Object(fields));
                }
            }
        }
        stack.pop().unwrap_or_default()
    }

    /// Encode `value` into record `index` of `words`.
    ///
    /// Missing fields and `null` are written as zero.
    ///
    /// # Panics
    ///
    /// Panics if the record lies outside `words`.
    pub fn write(&self, words: &mut [u32], index: usize, value: &Value) -> BufferResult<()> {
        let record = &mut words[index * self.stride..(index + 1) * self.stride];
        let mut stack: Vec<Option<&Value>> = vec![Some(value)];
        for op in &*self.write {
            let top = stack.last().copied().flatten();
            match op {
                WriteOp::Field(name) => stack.push(top.and_then(|v| v.get(&**name))),
                WriteOp::Element(i) => stack.push(top.and_then(|v| v.get(*i))),
                WriteOp::Store { word, view } => record[*word] = view.store(top)?,
                WriteOp::Pop => {
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

fn compile_read(
    layout: &StructLayout,
    base: usize,
    ops: &mut Vec<ReadOp>,
    shapes: &mut Vec<Box<[Arc<str>]>>,
) {
    for (_, field) in layout.named_fields() {
        let word = base + field.offset / 4;
        match &field.ty {
            FieldType::Primitive(view) => ops.push(ReadOp::Load { word, view: *view }),
            FieldType::Struct(nested) => compile_read(nested, word, ops, shapes),
        }
    }
    match layout.kind() {
        StructKind::Array => ops.push(ReadOp::Array(layout.len())),
        StructKind::Object => {
            shapes.push(layout.named_fields().iter().map(|(name, _)| Arc::clone(name)).collect());
            ops.push(ReadOp::Object(shapes.len() - 1));
        }
    }
}

fn compile_write(layout: &StructLayout, base: usize, ops: &mut Vec<WriteOp>) {
    for (index, (name, field)) in layout.named_fields().iter().enumerate() {
        ops.push(match layout.kind() {
            StructKind::Object => WriteOp::Field(Arc::clone(name)),
            StructKind::Array => WriteOp::Element(index),
        });
        let word = base + field.offset / 4;
        match &field.ty {
            FieldType::Primitive(view) => ops.push(WriteOp::Store { word, view: *view }),
            FieldType::Struct(nested) => compile_write(nested, word, ops),
        }
        ops.push(WriteOp::Pop);
    }
}
