#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)]

//! Typed column buffers for the strata storage engine.
//!
//! # Key Concepts
//!
//! - **Schema**: static description of a component's shape
//! - **TypedBuffer**: one component column, in one of four forms
//!   (number, array, struct, const)
//! - **StructLayout**: compiled byte offsets for a composite schema under
//!   `std140` or `packed` alignment
//! - **StructAccessor**: cached read/write programs for one layout
//! - **CodecRegistry**: named encoders that split buffers into a JSON
//!   skeleton and binary segments

mod accessor;
mod array;
mod buffer;
mod codec;
mod constant;
mod error;
mod layout;
mod number;
mod schema;
mod structured;

pub use accessor::StructAccessor;
pub use array::ArrayBuffer;
pub use buffer::{BufferKind, BufferSlice, DEFAULT_CAPACITY, TypedBuffer};
pub use codec::{Codec, CodecRegistry, Encoded, NumericArrayCodec, Payload, TypedBufferCodec};
pub use constant::ConstBuffer;
pub use error::{BufferError, BufferResult, CodecError, LayoutError};
pub use layout::{FieldType, Layout, MAX_DEPTH, StructField, StructKind, StructLayout, ViewType};
pub use number::{NumberBuffer, NumberKind, NumericVec, TypedArrayRef};
pub use schema::{Schema, SchemaType};
pub use structured::StructBuffer;
