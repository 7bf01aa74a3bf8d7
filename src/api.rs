//! The public serializer surface.
//!
//! A [`Serializer`] binds a [`TypeRegistry`] to one
//! [`SerializerOptions`] configuration and exposes the three entry
//! points: [`Serializer::compute_max_size`], [`Serializer::write`] and
//! [`Serializer::parse`].
//!
//! `parse` is strategy-dispatching: under the Greedy family it
//! materializes the whole graph immediately and returns an owned result
//! that keeps no borrow of the buffer; under every other strategy it
//! returns a live [`TableView`] that serves fields from the buffer per
//! the active mode.

use crate::buffer::InputBuffer;
use crate::constants::FILE_IDENTIFIER_LEN;
use crate::error::{FlatwireError, Result};
use crate::options::SerializerOptions;
use crate::schema::{TypeHandle, TypeRegistry};
use crate::value::Value;
use crate::view::{ParseContext, TableView};
use crate::write;

/// Serializer for one schema under one configuration.
#[derive(Debug, Clone)]
pub struct Serializer<'r> {
    registry: &'r TypeRegistry,
    options: SerializerOptions,
}

impl<'r> Serializer<'r> {
    /// A serializer with default options (Lazy strategy, 4-byte offsets).
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry, options: SerializerOptions::default() }
    }

    /// A serializer with explicit options.
    pub fn with_options(registry: &'r TypeRegistry, options: SerializerOptions) -> Self {
        Self { registry, options }
    }

    /// The active configuration.
    pub fn options(&self) -> &SerializerOptions {
        &self.options
    }

    /// Upper bound on the serialized size of `value` as type `handle`.
    ///
    /// The bound accounts for actual field presence and is safe to use for
    /// preallocation: [`Serializer::write`] never produces more bytes.
    pub fn compute_max_size(&self, handle: TypeHandle, value: &Value) -> Result<usize> {
        write::compute_max_size(self.registry, &self.options, handle, value)
    }

    /// Serializes `value` as type `handle` into a fresh buffer.
    ///
    /// The root must be a table value. The returned buffer is sized to the
    /// bytes actually written.
    pub fn write(&self, handle: TypeHandle, value: &Value) -> Result<Vec<u8>> {
        write::write_buffer(self.registry, &self.options, handle, value)
    }

    /// Parses `buf` as a serialized instance of table type `handle`.
    ///
    /// Under Greedy and GreedyMutable the graph is fully materialized here
    /// and the result owns no reference into `buf`. Every other strategy
    /// returns a view that reads (and under Lazy, may write) the buffer on
    /// each access.
    pub fn parse<'a, B>(&'a self, buf: &'a B, handle: TypeHandle) -> Result<Parsed<'a, B>>
    where
        B: InputBuffer + ?Sized,
    {
        let width = self.options.offset_width;
        if buf.len() < self.options.header_len() {
            return Err(FlatwireError::OutOfBounds {
                position: self.options.header_len(),
                length: buf.len(),
            });
        }
        if self.options.strict_file_identifier {
            if let Some(expected) = self.options.file_identifier {
                let mut actual = [0u8; FILE_IDENTIFIER_LEN];
                buf.copy_into(width.bytes(), &mut actual)?;
                if actual != expected {
                    return Err(FlatwireError::TypeMismatch(format!(
                        "file identifier mismatch: expected {expected:?}, found {actual:?}"
                    )));
                }
            }
        }

        let root_pos = crate::buffer::read_uoffset(buf, 0, width)?;
        let ctx = ParseContext { buf, registry: self.registry, options: &self.options };
        let view = TableView::new(ctx, handle, root_pos)?;

        if self.options.greedy_deserialize() {
            let value = view.materialize()?;
            Ok(Parsed::Owned(OwnedTable {
                value,
                mutable: self.options.generate_mutable_objects(),
            }))
        } else {
            Ok(Parsed::View(view))
        }
    }
}

/// The result of a parse: a live view or a fully owned graph, depending
/// on the strategy.
#[derive(Debug)]
pub enum Parsed<'a, B: InputBuffer + ?Sized> {
    /// A buffer-backed view (Lazy, PropertyCache, VectorCache families).
    View(TableView<'a, B>),
    /// A materialized graph with no buffer borrow (Greedy family).
    Owned(OwnedTable),
}

impl<'a, B: InputBuffer + ?Sized> Parsed<'a, B> {
    /// Reads a root field by logical index as an owned value.
    ///
    /// `Ok(None)` means a non-scalar field is absent; absent scalars come
    /// back as their default.
    pub fn field(&self, index: usize) -> Result<Option<Value>> {
        match self {
            Self::View(view) => match view.field(index)? {
                Some(lazy) => Ok(Some(lazy.materialize()?)),
                None => Ok(None),
            },
            Self::Owned(table) => table.field(index),
        }
    }

    /// Materializes the whole root table as an owned value.
    pub fn materialize(&self) -> Result<Value> {
        match self {
            Self::View(view) => view.materialize(),
            Self::Owned(table) => Ok(table.value.clone()),
        }
    }

    /// The live view, when the strategy keeps one.
    pub fn as_view(&self) -> Option<&TableView<'a, B>> {
        match self {
            Self::View(view) => Some(view),
            Self::Owned(_) => None,
        }
    }

    /// The owned result, when the strategy materialized one.
    pub fn as_owned(&self) -> Option<&OwnedTable> {
        match self {
            Self::View(_) => None,
            Self::Owned(table) => Some(table),
        }
    }

    /// Mutable access to the owned result, when the strategy materialized
    /// one.
    pub fn as_owned_mut(&mut self) -> Option<&mut OwnedTable> {
        match self {
            Self::View(_) => None,
            Self::Owned(table) => Some(table),
        }
    }
}

/// A fully materialized root table. Produced by Greedy-family parses;
/// holds no reference to the source buffer.
#[derive(Debug, Clone)]
pub struct OwnedTable {
    value: Value,
    mutable: bool,
}

impl OwnedTable {
    /// The materialized root value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the graph.
    ///
    /// Only GreedyMutable permits this; a plain Greedy result is frozen.
    /// Mutations live in this copy and are never written back to the
    /// source buffer.
    pub fn value_mut(&mut self) -> Result<&mut Value> {
        if !self.mutable {
            return Err(FlatwireError::AssertionViolation(
                "this strategy does not generate mutable objects".into(),
            ));
        }
        Ok(&mut self.value)
    }

    /// Consumes the wrapper, yielding the graph regardless of mutability.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Reads a root field by logical index.
    pub fn field(&self, index: usize) -> Result<Option<Value>> {
        let fields = self.value.as_table().ok_or_else(|| {
            FlatwireError::AssertionViolation("materialized root is not a table".into())
        })?;
        fields
            .get(index)
            .cloned()
            .ok_or_else(|| {
                FlatwireError::AssertionViolation(format!("field index {index} out of range"))
            })
    }
}
