//! # Flatwire: a zero-copy wire-format runtime
//!
//! Flatwire serializes schema-typed object graphs into a single contiguous
//! little-endian buffer and deserializes them with access cost proportional
//! to the fields actually touched, not to the buffer size.
//!
//! The format is offset-addressed: tables locate their fields through a
//! shared vtable, references are strictly forward-pointing `uoffset`s, and
//! scalars, structs and vector payloads are stored inline and aligned, so
//! a single field read is a handful of bounds-checked buffer accesses.
//!
//! ## Core features
//!
//! - **Schema-first**: types are registered once in a [`TypeRegistry`] and
//!   addressed by cheap [`TypeHandle`]s; self-referential schemas use
//!   declare-then-define.
//! - **Six deserialization strategies**: from fully lazy buffer-backed
//!   views to fully materialized owned graphs, selected per parse call via
//!   [`DeserializationMode`].
//! - **Write-through mutation**: under the Lazy strategy, scalar fields can
//!   be patched in place through a shared-mutable buffer ([`as_shared`]).
//! - **Exact preallocation**: [`Serializer::compute_max_size`] bounds the
//!   output before a single byte is written; the write path never
//!   reallocates.
//! - **Memory-mapped parsing**: [`MappedBuffer`] parses straight from disk.
//!
//! ## Quick example
//!
//! ```
//! use flatwire::{FieldDef, ScalarKind, Serializer, TypeRegistry, Value};
//!
//! # fn main() -> flatwire::Result<()> {
//! let mut registry = TypeRegistry::new();
//! let i32_ty = registry.scalar(ScalarKind::I32);
//! let str_ty = registry.string();
//! let person = registry.table(vec![
//!     FieldDef::new("age", i32_ty),
//!     FieldDef::new("name", str_ty),
//! ])?;
//!
//! let serializer = Serializer::new(&registry);
//! let value = Value::Table(vec![Some(21i32.into()), Some("ada".into())]);
//! let bytes = serializer.write(person, &value)?;
//!
//! let parsed = serializer.parse(bytes.as_slice(), person)?;
//! assert_eq!(parsed.field(0)?, Some(21i32.into()));
//! assert_eq!(parsed.field(1)?, Some("ada".into()));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod api;
pub mod buffer;
pub mod error;
pub mod options;
pub mod schema;
pub mod value;
pub mod vector;
pub mod view;

mod write;

pub use api::{OwnedTable, Parsed, Serializer};
pub use buffer::{as_shared, InputBuffer, InputBufferMut, MappedBuffer, OffsetWidth};
pub use error::{FlatwireError, Result};
pub use options::{DeserializationMode, SerializerOptions};
pub use schema::{FieldDef, TypeHandle, TypeRegistry};
pub use value::{ScalarKind, ScalarValue, Value};
pub use vector::{VectorValue, VectorView};
pub use view::{LazyValue, StructView, TableView};

/// Wire format constants.
pub mod constants {
    /// Length of the optional file identifier stored after the root offset.
    pub const FILE_IDENTIFIER_LEN: usize = 4;

    /// Bytes of a vtable header: `u16` vtable size + `u16` table size.
    pub const VTABLE_HEADER_LEN: usize = 4;

    /// Largest table body representable by the `u16` size field.
    pub const MAX_TABLE_BYTES: usize = u16::MAX as usize;

    /// Largest vtable representable by its own `u16` size field.
    pub const MAX_VTABLE_BYTES: usize = u16::MAX as usize;
}
