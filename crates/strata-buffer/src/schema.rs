//! Component shape descriptions.
//!
//! A [`Schema`] is the subset of JSON schema the engine consumes: a type tag,
//! numeric precision and bounds, nested `properties`/`items`, an optional
//! struct `layout`, and the `const`/`default`/`transient` markers. Schemas are
//! plain data and are shared behind `Arc` once a component is registered.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layout::Layout;

/// JSON schema type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Number,
    Integer,
    Boolean,
    String,
    Object,
    Array,
    Null,
}

/// Static description of a component's shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<SchemaType>,
    /// Significant precision; `1` selects single-precision floats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Object fields, in declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    /// Every row holds exactly this value.
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Requests a struct buffer with the given alignment rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    /// Column contents are never persisted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub transient: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl Schema {
    /// A schema with only a type tag.
    #[must_use]
    pub fn of_type(ty: SchemaType) -> Self {
        Self {
            ty: Some(ty),
            ..Self::default()
        }
    }

    /// Double-precision number.
    #[must_use]
    pub fn number() -> Self {
        Self::of_type(SchemaType::Number)
    }

    /// Single-precision number.
    #[must_use]
    pub fn f32() -> Self {
        Self {
            precision: Some(1),
            ..Self::number()
        }
    }

    /// Integer bounded to the given inclusive range.
    #[must_use]
    pub fn integer(minimum: f64, maximum: f64) -> Self {
        Self {
            minimum: Some(minimum),
            maximum: Some(maximum),
            ..Self::of_type(SchemaType::Integer)
        }
    }

    /// Unsigned 32-bit integer.
    #[must_use]
    pub fn u32() -> Self {
        Self::integer(0.0, f64::from(u32::MAX))
    }

    /// Signed 32-bit integer.
    #[must_use]
    pub fn i32() -> Self {
        Self::integer(f64::from(i32::MIN), f64::from(i32::MAX))
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::of_type(SchemaType::Boolean)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::of_type(SchemaType::String)
    }

    /// A schema whose every value is `value`.
    #[must_use]
    pub fn constant(value: Value) -> Self {
        Self {
            constant: Some(value),
            ..Self::default()
        }
    }

    /// Object with the given fields, in order.
    #[must_use]
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Schema)>,
    {
        Self {
            properties: Some(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..Self::of_type(SchemaType::Object)
        }
    }

    /// Fixed-length array (`minItems == maxItems == len`).
    #[must_use]
    pub fn vector(items: Schema, len: usize) -> Self {
        Self {
            items: Some(Box::new(items)),
            min_items: Some(len),
            max_items: Some(len),
            ..Self::of_type(SchemaType::Array)
        }
    }

    /// Unbounded array.
    #[must_use]
    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of_type(SchemaType::Array)
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    #[must_use]
    pub fn mark_transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Whether this schema describes a number or integer.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self.ty, Some(SchemaType::Number | SchemaType::Integer))
    }

    /// The value a freshly created slot of this shape should hold.
    ///
    /// Declared `default` wins, then `const`, then a zero value derived from
    /// the type tag.
    #[must_use]
    pub fn default_value(&self) -> Value {
        if let Some(value) = self.default.as_ref().or(self.constant.as_ref()) {
            return value.clone();
        }
        match self.ty {
            Some(SchemaType::Number) => Value::from(0.0),
            Some(SchemaType::Integer) => Value::from(0),
            Some(SchemaType::Boolean) => Value::Bool(false),
            Some(SchemaType::String) => Value::String(String::new()),
            Some(SchemaType::Object) => {
                let fields = self
                    .properties
                    .iter()
                    .flatten()
                    .map(|(name, field)| (name.clone(), field.default_value()))
                    .collect::<Map<_, _>>();
                Value::Object(fields)
            }
            Some(SchemaType::Array) => match (&self.items, self.min_items, self.max_items) {
                (Some(items), Some(min), Some(max)) if min == max => {
                    Value::Array(vec![items.default_value(); min])
                }
                _ => Value::Array(Vec::new()),
            },
            Some(SchemaType::Null) | None => Value::Null,
        }
    }
}
