//! The vector subsystem.
//!
//! A wire vector is a `u32` element count followed by a contiguous run of
//! items: inline bytes for fixed-width element types (scalars, structs),
//! or one forward `uoffset` per item for reference types (strings, tables,
//! nested vectors). Two materializations exist:
//!
//! - [`VectorView`]: a flat view backed directly by the buffer. `get(i)`
//!   is pure arithmetic (`base + i * stride`) plus, for reference
//!   elements, one offset resolution. Every access re-touches the buffer.
//! - An owned `Vec<Value>` sequence, produced when the active strategy
//!   preallocates vectors or when a caller materializes a view.
//!
//! [`VectorValue`] is the strategy-facing wrapper over the two shapes.
//!
//! Materialization has a devirtualized fast path: when the element type is
//! a fixed-width scalar and the configuration allows it, the loop reads
//! elements at a fixed stride without re-dispatching on the type model per
//! index. This affects throughput only; results are identical to the
//! generic path.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::buffer::{read_scalar, InputBuffer};
use crate::error::{FlatwireError, Result};
use crate::schema::{TypeHandle, TypeModel};
use crate::value::{ScalarValue, Value};
use crate::view::{decode_value, LazyValue, ParseContext};

/// A flat, buffer-backed view of a wire vector.
pub struct VectorView<'a, B: InputBuffer + ?Sized> {
    ctx: ParseContext<'a, B>,
    /// Element type.
    element: TypeHandle,
    /// Absolute position of the `u32` count prefix.
    pos: usize,
    count: usize,
    stride: usize,
}

impl<'a, B: InputBuffer + ?Sized> VectorView<'a, B> {
    /// Builds a view over the vector starting (count prefix) at `pos`.
    ///
    /// Enforces the size invariant up front: `4 + count * stride` bytes
    /// must remain in the buffer from `pos`.
    pub(crate) fn new(ctx: ParseContext<'a, B>, handle: TypeHandle, pos: usize) -> Result<Self> {
        let element = match ctx.registry.resolved(handle)? {
            TypeModel::Vector(v) => v.element,
            _ => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {handle} is not a vector"
                )))
            }
        };
        if matches!(ctx.registry.resolved(element)?, TypeModel::Union(_)) {
            return Err(FlatwireError::TypeMismatch(
                "vectors of unions are not supported".into(),
            ));
        }
        let (stride, _) = ctx.registry.inline_layout(element, ctx.options.offset_width)?;

        let count = read_scalar::<B, u32>(ctx.buf, pos)? as usize;
        let payload = count
            .checked_mul(stride)
            .and_then(|b| b.checked_add(4))
            .ok_or(FlatwireError::OutOfBounds { position: pos, length: ctx.buf.len() })?;
        if pos + payload > ctx.buf.len() {
            return Err(FlatwireError::OutOfBounds {
                position: pos + payload,
                length: ctx.buf.len(),
            });
        }

        Ok(Self { ctx, element, pos, count, stride })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True if the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decodes the element at `index` straight from the buffer.
    pub fn get(&self, index: usize) -> Result<LazyValue<'a, B>> {
        if index >= self.count {
            return Err(FlatwireError::OutOfBounds {
                position: index,
                length: self.count,
            });
        }
        let item_pos = self.pos + 4 + index * self.stride;
        decode_value(self.ctx, self.element, item_pos)
    }

    /// A lazy sequence producer over the elements.
    pub fn iter(&self) -> VectorIter<'a, B> {
        VectorIter { view: *self, index: 0 }
    }

    /// Copies every element out into an owned sequence.
    pub fn materialize(&self) -> Result<Vec<Value>> {
        // Fast path: fixed-stride scalar elements need no per-index type
        // dispatch.
        if self.ctx.options.devirtualize {
            if let TypeModel::Scalar(kind) = self.ctx.registry.resolved(self.element)? {
                let base = self.pos + 4;
                let mut out = Vec::with_capacity(self.count);
                for i in 0..self.count {
                    let v = ScalarValue::read_from(self.ctx.buf, base + i * self.stride, *kind)?;
                    out.push(Value::Scalar(v));
                }
                return Ok(out);
            }
        }

        let mut out = Vec::with_capacity(self.count);
        for i in 0..self.count {
            out.push(self.get(i)?.materialize()?);
        }
        Ok(out)
    }
}

impl<'a, B: InputBuffer + ?Sized> Clone for VectorView<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: InputBuffer + ?Sized> Copy for VectorView<'a, B> {}

impl<B: InputBuffer + ?Sized> fmt::Debug for VectorView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VectorView(pos={}, count={}, stride={})",
            self.pos, self.count, self.stride
        )
    }
}

/// Iterator over a flat vector, yielding lazily decoded elements.
pub struct VectorIter<'a, B: InputBuffer + ?Sized> {
    view: VectorView<'a, B>,
    index: usize,
}

impl<'a, B: InputBuffer + ?Sized> Iterator for VectorIter<'a, B> {
    type Item = Result<LazyValue<'a, B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.view.len() {
            return None;
        }
        let item = self.view.get(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.view.len() - self.index;
        (remaining, Some(remaining))
    }
}

/// A vector field as seen through a deserialization strategy: either still
/// flat in the buffer, or copied into an owned cached sequence.
///
/// Cached sequences are shared (`Rc`) so that repeated accesses to the
/// same field observe one sequence, and so that mutations through a
/// mutable cached strategy are visible to every holder of the field.
pub enum VectorValue<'a, B: InputBuffer + ?Sized> {
    /// Served from the buffer, element by element.
    Flat(VectorView<'a, B>),
    /// Eagerly copied into an owned sequence.
    Cached {
        /// The owned elements.
        items: Rc<RefCell<Vec<Value>>>,
        /// Whether the active strategy permits in-memory mutation.
        mutable: bool,
    },
}

impl<'a, B: InputBuffer + ?Sized> VectorValue<'a, B> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(view) => view.len(),
            Self::Cached { items, .. } => items.borrow().len(),
        }
    }

    /// True if the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element at `index` as an owned value.
    pub fn get(&self, index: usize) -> Result<Value> {
        match self {
            Self::Flat(view) => view.get(index)?.materialize(),
            Self::Cached { items, .. } => {
                items.borrow().get(index).cloned().ok_or(FlatwireError::OutOfBounds {
                    position: index,
                    length: items.borrow().len(),
                })
            }
        }
    }

    /// Copies the whole sequence out as owned values.
    pub fn materialize(&self) -> Result<Vec<Value>> {
        match self {
            Self::Flat(view) => view.materialize(),
            Self::Cached { items, .. } => Ok(items.borrow().clone()),
        }
    }

    /// Replaces the element at `index` in the cached sequence.
    ///
    /// Only valid for cached vectors under a mutable strategy; the change
    /// lives in the in-memory copy and is never written back to the
    /// buffer.
    pub fn set(&self, index: usize, value: Value) -> Result<()> {
        match self {
            Self::Flat(_) => Err(FlatwireError::AssertionViolation(
                "flat vectors are not mutable; only cached vectors under a mutable strategy are"
                    .into(),
            )),
            Self::Cached { mutable: false, .. } => Err(FlatwireError::AssertionViolation(
                "this strategy does not generate mutable objects".into(),
            )),
            Self::Cached { items, mutable: true } => {
                let mut guard = items.borrow_mut();
                let len = guard.len();
                let slot = guard.get_mut(index).ok_or(FlatwireError::OutOfBounds {
                    position: index,
                    length: len,
                })?;
                *slot = value;
                Ok(())
            }
        }
    }
}

impl<'a, B: InputBuffer + ?Sized> Clone for VectorValue<'a, B> {
    fn clone(&self) -> Self {
        match self {
            Self::Flat(view) => Self::Flat(*view),
            Self::Cached { items, mutable } => Self::Cached {
                items: Rc::clone(items),
                mutable: *mutable,
            },
        }
    }
}

impl<B: InputBuffer + ?Sized> fmt::Debug for VectorValue<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(view) => write!(f, "VectorValue::Flat({view:?})"),
            Self::Cached { items, mutable } => write!(
                f,
                "VectorValue::Cached(len={}, mutable={mutable})",
                items.borrow().len()
            ),
        }
    }
}
