//! Struct layout compiler.
//!
//! Walks a composite [`Schema`] once and assigns every primitive leaf a byte
//! offset and a 32-bit view type. Composite nodes record their aggregate size
//! and fields. Two alignment rule sets are supported:
//!
//! | rule     | vector | struct | array |
//! |----------|--------|--------|-------|
//! | `std140` | 16     | 16     | 16    |
//! | `packed` | 4      | 1      | 1     |
//!
//! Every primitive is 4 bytes, so every offset and size is a whole number of
//! 32-bit words. The compiled layout is immutable and compared structurally,
//! which is what the accessor cache keys on.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::LayoutError,
    schema::{Schema, SchemaType},
};

/// Nesting bound for composite schemas.
pub const MAX_DEPTH: usize = 16;

const WORD: usize = 4;

/// Alignment rule set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// GPU uniform-buffer compatible alignment.
    #[default]
    Std140,
    /// No padding beyond natural element size.
    Packed,
}

#[derive(Clone, Copy)]
struct Rules {
    vec_align: usize,
    struct_align: usize,
    array_align: usize,
}

impl Layout {
    const fn rules(self) -> Rules {
        match self {
            Self::Std140 => Rules {
                vec_align: 16,
                struct_align: 16,
                array_align: 16,
            },
            Self::Packed => Rules {
                vec_align: 4,
                struct_align: 1,
                array_align: 1,
            },
        }
    }

    /// Rounding applied to composite sizes.
    const fn size_align(self) -> usize {
        match self {
            Self::Std140 => 16,
            Self::Packed => 1,
        }
    }
}

/// Primitive 32-bit view used to read and write a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewType {
    F32,
    I32,
    U32,
}

impl ViewType {
    /// Primitive view for a leaf schema, if it has one.
    #[must_use]
    pub fn for_schema(schema: &Schema) -> Option<Self> {
        match schema.ty {
            Some(SchemaType::Integer) => match (schema.minimum, schema.maximum) {
                (Some(min), Some(max)) if min >= 0.0 && max <= f64::from(u32::MAX) => {
                    Some(Self::U32)
                }
                (Some(min), Some(max)) if min < 0.0 && max <= f64::from(i32::MAX) => {
                    Some(Self::I32)
                }
                _ => None,
            },
            Some(SchemaType::Number) if matches!(schema.precision, Some(1 | 2)) => Some(Self::F32),
            _ => None,
        }
    }
}

/// Type of a single field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Primitive(ViewType),
    Struct(Arc<StructLayout>),
}

impl FieldType {
    /// Byte size of the field.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Primitive(_) => WORD,
            Self::Struct(layout) => layout.size,
        }
    }
}

/// A field placed at a byte offset relative to its parent.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructField {
    pub offset: usize,
    pub ty: FieldType,
}

/// Whether a composite node came from an object or a fixed-size array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructKind {
    Object,
    Array,
}

/// A compiled composite layout.
///
/// Array fields are named by their index.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StructLayout {
    kind: StructKind,
    size: usize,
    fields: Vec<(Arc<str>, StructField)>,
}

impl StructLayout {
    /// Compile the layout for a composite schema using its declared rules
    /// (`std140` when unspecified).
    pub fn from_schema(schema: &Schema) -> Result<Arc<Self>, LayoutError> {
        Self::compile(schema, schema.layout.unwrap_or_default())
    }

    /// Compile the layout for a composite schema with explicit rules.
    pub fn compile(schema: &Schema, layout: Layout) -> Result<Arc<Self>, LayoutError> {
        Compiler { layout }.node(schema, "$", 0)
    }

    #[must_use]
    pub const fn kind(&self) -> StructKind {
        self.kind
    }

    /// Record size in bytes, including trailing padding.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Record size in 32-bit words.
    #[must_use]
    pub const fn words(&self) -> usize {
        self.size / WORD
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &StructField)> {
        self.fields.iter().map(|(name, field)| (&**name, field))
    }

    pub(crate) fn named_fields(&self) -> &[(Arc<str>, StructField)] {
        &self.fields
    }

    /// Look up a field by name (or index, for arrays).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields
            .iter()
            .find(|(field, _)| &**field == name)
            .map(|(_, field)| field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for StructLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, field) in &self.fields {
            match &field.ty {
                FieldType::Primitive(view) => map.entry(name, &(field.offset, view)),
                FieldType::Struct(nested) => map.entry(name, &(field.offset, nested)),
            };
        }
        map.finish()?;
        write!(f, " ({} bytes)", self.size)
    }
}

struct Compiler {
    layout: Layout,
}

impl Compiler {
    fn node(&self, schema: &Schema, path: &str, depth: usize) -> Result<Arc<StructLayout>, LayoutError> {
        if depth >= MAX_DEPTH {
            return Err(LayoutError::TooDeep(MAX_DEPTH));
        }
        match schema.ty {
            Some(SchemaType::Array) => self.array(schema, path, depth),
            Some(SchemaType::Object) => self.object(schema, path, depth),
            _ => Err(LayoutError::NotComposite(path.to_owned())),
        }
    }

    fn array(&self, schema: &Schema, path: &str, depth: usize) -> Result<Arc<StructLayout>, LayoutError> {
        let items = schema
            .items
            .as_deref()
            .ok_or_else(|| LayoutError::MissingItems(path.to_owned()))?;
        let len = match (schema.min_items, schema.max_items) {
            (Some(min), Some(max)) if min == max => min,
            _ => return Err(LayoutError::VariableLength(path.to_owned())),
        };
        if len == 0 {
            return Err(LayoutError::ZeroLength(path.to_owned()));
        }

        let rules = self.layout.rules();

        if let Some(view) = ViewType::for_schema(items) {
            // vectors pack tightly; only the vec3 keeps its 12 byte size
            let fields = (0..len)
                .map(|i| {
                    let field = StructField {
                        offset: i * WORD,
                        ty: FieldType::Primitive(view),
                    };
                    (Arc::from(i.to_string()), field)
                })
                .collect();
            let size = if len == 3 {
                3 * WORD
            } else {
                (len * WORD).next_multiple_of(rules.vec_align.max(self.layout.size_align()))
            };
            return Ok(Arc::new(StructLayout {
                kind: StructKind::Array,
                size,
                fields,
            }));
        }

        let element = self.node(items, &format!("{path}[]"), depth + 1)?;
        let stride = match self.layout {
            Layout::Std140 => element.size.next_multiple_of(16),
            Layout::Packed => element.size,
        };

        let mut offset: usize = 0;
        let mut fields = Vec::with_capacity(len);
        for i in 0..len {
            offset = offset.next_multiple_of(rules.array_align);
            fields.push((
                Arc::from(i.to_string()),
                StructField {
                    offset,
                    ty: FieldType::Struct(Arc::clone(&element)),
                },
            ));
            offset += stride;
        }

        Ok(Arc::new(StructLayout {
            kind: StructKind::Array,
            size: offset.next_multiple_of(rules.array_align.max(self.layout.size_align())),
            fields,
        }))
    }

    fn object(&self, schema: &Schema, path: &str, depth: usize) -> Result<Arc<StructLayout>, LayoutError> {
        let properties = schema
            .properties
            .as_ref()
            .filter(|properties| !properties.is_empty())
            .ok_or_else(|| LayoutError::EmptyObject(path.to_owned()))?;

        let rules = self.layout.rules();
        let mut offset: usize = 0;
        let mut fields = Vec::with_capacity(properties.len());

        for (name, field) in properties {
            let field_path = format!("{path}.{name}");
            let (ty, align) = if let Some(view) = ViewType::for_schema(field) {
                (FieldType::Primitive(view), WORD)
            } else {
                let align = match field.ty {
                    Some(SchemaType::Array) => rules.array_align,
                    Some(SchemaType::Object) => rules.struct_align,
                    _ => return Err(LayoutError::UnsupportedField(field_path)),
                };
                (FieldType::Struct(self.node(field, &field_path, depth + 1)?), align)
            };

            offset = offset.next_multiple_of(align);
            let size = ty.size();
            fields.push((Arc::from(name.as_str()), StructField { offset, ty }));
            offset += size;
        }

        Ok(Arc::new(StructLayout {
            kind: StructKind::Object,
            size: offset.next_multiple_of(self.layout.size_align()),
            fields,
        }))
    }
}
