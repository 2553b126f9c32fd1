//! Codec registry for persisting buffers.
//!
//! A codec turns a [`Payload`] into a JSON skeleton plus zero or more binary
//! segments, and back. The registry is an explicit value owned by whoever
//! builds the storage engine; names are unique and lookups for encoding go
//! through each codec's `accepts` predicate in registration order.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    buffer::TypedBuffer,
    error::CodecError,
    number::{NumberKind, NumericVec},
    schema::Schema,
};

/// Anything a codec can encode.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Buffer(TypedBuffer),
    Numbers(NumericVec),
}

impl Payload {
    const fn describe(&self) -> &'static str {
        match self {
            Self::Buffer(buffer) => buffer.variant(),
            Self::Numbers(_) => "numeric array",
        }
    }
}

/// Encoded form of a payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    /// Name of the codec that produced it.
    pub codec: String,
    pub json: Value,
    pub binary: Vec<Vec<u8>>,
}

/// A named encoder/decoder pair.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, payload: &Payload) -> bool;

    /// Returns the JSON skeleton and the binary segments it refers to.
    fn encode(&self, payload: &Payload) -> Result<(Value, Vec<Vec<u8>>), CodecError>;

    fn decode(&self, json: &Value, binary: &[Vec<u8>]) -> Result<Payload, CodecError>;
}

/// Registry of codecs keyed by unique name.
#[derive(Default)]
pub struct CodecRegistry {
    codecs: IndexMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the typed-buffer codec and one codec per numeric
    /// array element type.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut codecs: IndexMap<String, Arc<dyn Codec>> = IndexMap::new();
        codecs.insert(TypedBufferCodec.name().to_owned(), Arc::new(TypedBufferCodec));
        for kind in [NumberKind::U32, NumberKind::I32, NumberKind::F32, NumberKind::F64] {
            let codec = NumericArrayCodec::new(kind);
            codecs.insert(codec.name().to_owned(), Arc::new(codec));
        }
        Self { codecs }
    }

    /// Register a codec. Names must be unique.
    pub fn register(&mut self, codec: impl Codec + 'static) -> Result<(), CodecError> {
        let name = codec.name().to_owned();
        if self.codecs.contains_key(&name) {
            return Err(CodecError::Duplicate(name));
        }
        debug!(codec = %name, "registered codec");
        self.codecs.insert(name, Arc::new(codec));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs.get(name).map(|codec| &**codec)
    }

    /// First registered codec that accepts `payload`.
    #[must_use]
    pub fn find(&self, payload: &Payload) -> Option<&dyn Codec> {
        self.codecs
            .values()
            .find(|codec| codec.accepts(payload))
            .map(|codec| &**codec)
    }

    pub fn encode(&self, payload: &Payload) -> Result<Encoded, CodecError> {
        let codec = self
            .find(payload)
            .ok_or(CodecError::Unsupported(payload.describe()))?;
        let (json, binary) = codec.encode(payload)?;
        Ok(Encoded {
            codec: codec.name().to_owned(),
            json,
            binary,
        })
    }

    pub fn decode(&self, encoded: &Encoded) -> Result<Payload, CodecError> {
        let codec = self
            .get(&encoded.codec)
            .ok_or_else(|| CodecError::Unknown(encoded.codec.clone()))?;
        codec.decode(&encoded.json, &encoded.binary)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.codecs.keys()).finish()
    }
}

/// Encodes every [`TypedBuffer`] variant.
///
/// Const and transient columns keep only the skeleton. Array columns inline
/// their values. Number and struct columns reference one binary segment.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypedBufferCodec;

impl Codec for TypedBufferCodec {
    fn name(&self) -> &str {
        "typed-buffer"
    }

    fn accepts(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Buffer(_))
    }

    fn encode(&self, payload: &Payload) -> Result<(Value, Vec<Vec<u8>>), CodecError> {
        let Payload::Buffer(buffer) = payload else {
            return Err(CodecError::Unsupported(payload.describe()));
        };
        let schema = buffer.schema();
        let mut skeleton = json!({
            "type": buffer.variant(),
            "schema": serde_json::to_value(&**schema)?,
            "capacity": buffer.capacity(),
        });

        if schema.transient {
            return Ok((skeleton, Vec::new()));
        }
        match buffer {
            TypedBuffer::Const(_) => Ok((skeleton, Vec::new())),
            TypedBuffer::Array(array) => {
                skeleton["values"] = Value::Array(array.values().to_vec());
                Ok((skeleton, Vec::new()))
            }
            TypedBuffer::Number(_) | TypedBuffer::Struct(_) => {
                let bytes = buffer.as_bytes().unwrap_or_default().to_vec();
                skeleton["binary"] = json!(0);
                Ok((skeleton, vec![bytes]))
            }
        }
    }

    fn decode(&self, json: &Value, binary: &[Vec<u8>]) -> Result<Payload, CodecError> {
        let schema: Schema = serde_json::from_value(json["schema"].clone())?;
        let capacity = json["capacity"]
            .as_u64()
            .ok_or_else(|| CodecError::Malformed("missing capacity".to_owned()))?
            as usize;
        let transient = schema.transient;
        let default = schema.default.clone();
        let mut buffer = TypedBuffer::new(schema, capacity)?;

        if transient {
            if let Some(default) = default {
                for index in 0..capacity {
                    buffer.set(index, &default)?;
                }
            }
            return Ok(Payload::Buffer(buffer));
        }

        match buffer.variant() {
            "array" => {
                let values = json["values"]
                    .as_array()
                    .ok_or_else(|| CodecError::Malformed("missing values".to_owned()))?;
                if values.len() != capacity {
                    return Err(CodecError::Malformed(format!(
                        "{} values for capacity {capacity}",
                        values.len()
                    )));
                }
                for (index, value) in values.iter().enumerate() {
                    buffer.set(index, value)?;
                }
            }
            "number" | "struct" => buffer.load_bytes(segment(json, binary)?)?,
            _ => {}
        }
        Ok(Payload::Buffer(buffer))
    }
}

/// Encodes a [`NumericVec`] of one element type.
#[derive(Clone, Debug)]
pub struct NumericArrayCodec {
    kind: NumberKind,
    name: String,
}

impl NumericArrayCodec {
    #[must_use]
    pub fn new(kind: NumberKind) -> Self {
        let name = match kind {
            NumberKind::U32 => "u32-array",
            NumberKind::I32 => "i32-array",
            NumberKind::F32 => "f32-array",
            NumberKind::F64 => "f64-array",
        };
        Self {
            kind,
            name: name.to_owned(),
        }
    }
}

impl Codec for NumericArrayCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, payload: &Payload) -> bool {
        matches!(payload, Payload::Numbers(numbers) if numbers.kind() == self.kind)
    }

    fn encode(&self, payload: &Payload) -> Result<(Value, Vec<Vec<u8>>), CodecError> {
        let Payload::Numbers(numbers) = payload else {
            return Err(CodecError::Unsupported(payload.describe()));
        };
        Ok((
            json!({ "length": numbers.len(), "binary": 0 }),
            vec![numbers.as_bytes().to_vec()],
        ))
    }

    fn decode(&self, json: &Value, binary: &[Vec<u8>]) -> Result<Payload, CodecError> {
        let numbers = NumericVec::from_bytes(self.kind, segment(json, binary)?)?;
        if json["length"].as_u64() != Some(numbers.len() as u64) {
            return Err(CodecError::Malformed("length does not match payload".to_owned()));
        }
        Ok(Payload::Numbers(numbers))
    }
}

fn segment<'a>(json: &Value, binary: &'a [Vec<u8>]) -> Result<&'a [u8], CodecError> {
    let index = json["binary"]
        .as_u64()
        .ok_or_else(|| CodecError::Malformed("missing binary segment index".to_owned()))?;
    binary
        .get(index as usize)
        .map(Vec::as_slice)
        .ok_or_else(|| CodecError::Malformed(format!("binary segment {index} not present")))
}
