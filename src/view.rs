//! The deserialization strategy engine: lazy views over a parsed buffer.
//!
//! A [`TableView`] resolves its vtable once at construction and then
//! answers field accesses according to the active
//! [`SerializerOptions`](crate::SerializerOptions):
//!
//! - **Lazy**: every access recomputes the field from the buffer. The only
//!   mode where [`TableView::set_scalar`] write-through is permitted.
//! - **PropertyCache / VectorCache(-Mutable)**: each field slot carries an
//!   explicit `unresolved | cached(value)` state inside the view (never
//!   process-wide); the first access resolves from the buffer and caches,
//!   later accesses return the cached result. The vector-cache flavors
//!   additionally copy vector elements into owned sequences at first
//!   touch, and the mutable flavor accepts in-memory replacement via
//!   [`TableView::set_field`].
//! - **Greedy(-Mutable)**: the parse entry point materializes the whole
//!   graph through [`TableView::materialize`] and discards the view, so no
//!   buffer borrow survives.
//!
//! Caches never mask faults: a field whose bytes are out of bounds or
//! whose offset is corrupt reports the error the first time it is touched,
//! consistent with each strategy's materialization timing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::buffer::{read_scalar, read_soffset, read_uoffset, InputBuffer, InputBufferMut};
use crate::error::{FlatwireError, Result};
use crate::options::SerializerOptions;
use crate::schema::{TableModel, TypeHandle, TypeModel, TypeRegistry};
use crate::value::{ScalarValue, Value};
use crate::vector::{VectorValue, VectorView};

/// Everything a view needs to resolve fields: the buffer, the type model
/// registry and the active strategy configuration. Plain references, so
/// contexts are freely copyable into child views.
pub(crate) struct ParseContext<'a, B: InputBuffer + ?Sized> {
    pub buf: &'a B,
    pub registry: &'a TypeRegistry,
    pub options: &'a SerializerOptions,
}

impl<'a, B: InputBuffer + ?Sized> Clone for ParseContext<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: InputBuffer + ?Sized> Copy for ParseContext<'a, B> {}

/// A field value as resolved by a view: scalars and strings are copied
/// out, aggregates stay lazy until materialized.
pub enum LazyValue<'a, B: InputBuffer + ?Sized> {
    /// A scalar, read from the buffer (or a declared default).
    Scalar(ScalarValue),
    /// A string, copied out of the buffer on access.
    Str(String),
    /// An inline struct, still backed by the buffer.
    Struct(StructView<'a, B>),
    /// A referenced table, still backed by the buffer.
    Table(TableView<'a, B>),
    /// A vector, flat or cached depending on the strategy.
    Vector(VectorValue<'a, B>),
    /// A union: `None` is the "none" state, otherwise discriminant and
    /// selected value.
    Union(Option<(u8, Box<LazyValue<'a, B>>)>),
    /// An owned replacement installed by an in-memory mutation.
    Owned(Value),
}

impl<'a, B: InputBuffer + ?Sized> LazyValue<'a, B> {
    /// Recursively converts into an owned [`Value`].
    pub fn materialize(&self) -> Result<Value> {
        match self {
            Self::Scalar(v) => Ok(Value::Scalar(*v)),
            Self::Str(s) => Ok(Value::Str(s.clone())),
            Self::Struct(view) => view.materialize(),
            Self::Table(view) => view.materialize(),
            Self::Vector(vec) => Ok(Value::Vector(vec.materialize()?)),
            Self::Union(None) => Ok(Value::Union(None)),
            Self::Union(Some((disc, inner))) => Ok(Value::Union(Some((
                *disc,
                Box::new(inner.materialize()?),
            )))),
            Self::Owned(v) => Ok(v.clone()),
        }
    }

    /// The scalar payload, if this is a scalar.
    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Owned(Value::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    /// The table view, if this is a buffer-backed table.
    pub fn as_table(&self) -> Option<&TableView<'a, B>> {
        match self {
            Self::Table(view) => Some(view),
            _ => None,
        }
    }

    /// The vector handle, if this is a vector.
    pub fn as_vector(&self) -> Option<&VectorValue<'a, B>> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a, B: InputBuffer + ?Sized> Clone for LazyValue<'a, B> {
    fn clone(&self) -> Self {
        match self {
            Self::Scalar(v) => Self::Scalar(*v),
            Self::Str(s) => Self::Str(s.clone()),
            Self::Struct(view) => Self::Struct(*view),
            Self::Table(view) => Self::Table(view.clone()),
            Self::Vector(vec) => Self::Vector(vec.clone()),
            Self::Union(u) => Self::Union(u.clone()),
            Self::Owned(v) => Self::Owned(v.clone()),
        }
    }
}

impl<B: InputBuffer + ?Sized> fmt::Debug for LazyValue<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "LazyValue::Scalar({v:?})"),
            Self::Str(s) => write!(f, "LazyValue::Str({s:?})"),
            Self::Struct(v) => write!(f, "LazyValue::Struct({v:?})"),
            Self::Table(v) => write!(f, "LazyValue::Table({v:?})"),
            Self::Vector(v) => write!(f, "LazyValue::Vector({v:?})"),
            Self::Union(Some((d, _))) => write!(f, "LazyValue::Union(disc={d})"),
            Self::Union(None) => write!(f, "LazyValue::Union(None)"),
            Self::Owned(v) => write!(f, "LazyValue::Owned({v:?})"),
        }
    }
}

/// Per-slot memoization: `None` = unresolved, `Some(cached)` = resolved
/// (where the cached entry itself is `None` for an absent field).
type SlotCache<'a, B> = Rc<RefCell<Vec<Option<Option<LazyValue<'a, B>>>>>>;

/// A view over one table instance inside a buffer.
///
/// Cloning is cheap and shares the field cache, so every clone observes
/// the same memoized state. The view borrows the buffer for its whole
/// lifetime; only a Greedy-family materialization severs that borrow.
pub struct TableView<'a, B: InputBuffer + ?Sized> {
    ctx: ParseContext<'a, B>,
    handle: TypeHandle,
    table_pos: usize,
    vtable_pos: usize,
    vtable_size: usize,
    table_size: usize,
    cache: Option<SlotCache<'a, B>>,
}

impl<'a, B: InputBuffer + ?Sized> TableView<'a, B> {
    /// Resolves the vtable of the table whose soffset cell sits at
    /// `table_pos`.
    pub(crate) fn new(
        ctx: ParseContext<'a, B>,
        handle: TypeHandle,
        table_pos: usize,
    ) -> Result<Self> {
        let field_count = match ctx.registry.resolved(handle)? {
            TypeModel::Table(m) => m.fields.len(),
            _ => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {handle} is not a table"
                )))
            }
        };

        let width = ctx.options.offset_width;
        let soffset = read_soffset(ctx.buf, table_pos, width)?;
        let vtable_pos = (table_pos as i64) - soffset;
        if vtable_pos < 0 || (vtable_pos as usize) + 4 > ctx.buf.len() {
            return Err(FlatwireError::InvalidOffset(format!(
                "soffset at {table_pos} resolves to invalid vtable position {vtable_pos}"
            )));
        }
        let vtable_pos = vtable_pos as usize;

        let vtable_size = read_scalar::<B, u16>(ctx.buf, vtable_pos)? as usize;
        let table_size = read_scalar::<B, u16>(ctx.buf, vtable_pos + 2)? as usize;
        if vtable_size < 4 {
            return Err(FlatwireError::InvalidOffset(format!(
                "vtable at {vtable_pos} is smaller than its own header"
            )));
        }
        if vtable_pos + vtable_size > ctx.buf.len() || table_pos + table_size > ctx.buf.len() {
            return Err(FlatwireError::InvalidOffset(format!(
                "table at {table_pos} extends past the end of the buffer"
            )));
        }

        let cache = ctx
            .options
            .property_cache()
            .then(|| Rc::new(RefCell::new(vec![None; field_count])));

        Ok(Self {
            ctx,
            handle,
            table_pos,
            vtable_pos,
            vtable_size,
            table_size,
            cache,
        })
    }

    fn table_model(&self) -> Result<&'a TableModel> {
        match self.ctx.registry.resolved(self.handle)? {
            TypeModel::Table(m) => Ok(m),
            _ => Err(FlatwireError::AssertionViolation(format!(
                "type {} is not a table",
                self.handle
            ))),
        }
    }

    /// The type handle this view decodes as.
    pub fn type_handle(&self) -> TypeHandle {
        self.handle
    }

    /// Number of declared fields.
    pub fn field_count(&self) -> Result<usize> {
        Ok(self.table_model()?.fields.len())
    }

    /// Absolute position of the table's soffset cell.
    pub fn position(&self) -> usize {
        self.table_pos
    }

    /// Resolves a vtable slot to the absolute position of its field bytes.
    /// `None` means the field is absent (zero slot, or slot past the
    /// vtable's recorded length) and the default applies.
    pub fn slot_offset(&self, slot: usize) -> Result<Option<usize>> {
        let entry = 4 + slot * 2;
        if entry + 2 > self.vtable_size {
            return Ok(None);
        }
        let rel = read_scalar::<B, u16>(self.ctx.buf, self.vtable_pos + entry)? as usize;
        if rel == 0 {
            return Ok(None);
        }
        let pos = self.table_pos + rel;
        if pos >= self.ctx.buf.len() {
            return Err(FlatwireError::InvalidOffset(format!(
                "vtable slot {slot} points past the end of the buffer"
            )));
        }
        Ok(Some(pos))
    }

    /// Reads a field by logical index.
    ///
    /// `Ok(None)` means a non-scalar field is absent. Absent scalar fields
    /// come back as their declared default (or zero), so they are always
    /// `Some`.
    pub fn field(&self, index: usize) -> Result<Option<LazyValue<'a, B>>> {
        if let Some(cache) = &self.cache {
            let hit = cache.borrow().get(index).cloned();
            match hit {
                None => {
                    return Err(FlatwireError::AssertionViolation(format!(
                        "field index {index} out of range"
                    )))
                }
                Some(Some(entry)) => return Ok(entry),
                Some(None) => {}
            }
        }

        let resolved = self.resolve_field(index)?;

        if let Some(cache) = &self.cache {
            if let Some(slot) = cache.borrow_mut().get_mut(index) {
                *slot = Some(resolved.clone());
            }
        }
        Ok(resolved)
    }

    /// Reads a field by name.
    pub fn field_by_name(&self, name: &str) -> Result<Option<LazyValue<'a, B>>> {
        let index = self.table_model()?.field_index(name).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("no field named '{name}'"))
        })?;
        self.field(index)
    }

    fn resolve_field(&self, index: usize) -> Result<Option<LazyValue<'a, B>>> {
        let model = self.table_model()?;
        let fm = model.fields.get(index).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("field index {index} out of range"))
        })?;

        match self.ctx.registry.resolved(fm.ty)? {
            TypeModel::Scalar(kind) => {
                let value = match self.slot_offset(fm.slot)? {
                    Some(pos) => ScalarValue::read_from(self.ctx.buf, pos, *kind)?,
                    None => fm.default.unwrap_or_else(|| ScalarValue::zero(*kind)),
                };
                Ok(Some(LazyValue::Scalar(value)))
            }
            TypeModel::Union(u) => {
                let disc = match self.slot_offset(fm.slot)? {
                    Some(pos) => read_scalar::<B, u8>(self.ctx.buf, pos)?,
                    None => 0,
                };
                if disc == 0 {
                    return Ok(Some(LazyValue::Union(None)));
                }
                let member =
                    u.members.get(disc as usize - 1).copied().ok_or_else(|| {
                        FlatwireError::TypeMismatch(format!(
                            "union discriminant {disc} does not match any member of field '{}'",
                            fm.name
                        ))
                    })?;
                let slot_pos = self.slot_offset(fm.slot + 1)?.ok_or_else(|| {
                    FlatwireError::InvalidOffset(format!(
                        "union field '{}' carries a discriminant but no value",
                        fm.name
                    ))
                })?;
                let target =
                    read_uoffset(self.ctx.buf, slot_pos, self.ctx.options.offset_width)?;
                let inner = LazyValue::Table(TableView::new(self.ctx, member, target)?);
                Ok(Some(LazyValue::Union(Some((disc, Box::new(inner))))))
            }
            _ => match self.slot_offset(fm.slot)? {
                None => Ok(None),
                Some(pos) => decode_value(self.ctx, fm.ty, pos).map(Some),
            },
        }
    }

    /// Materializes the whole table into an owned [`Value::Table`].
    ///
    /// Goes through [`TableView::field`], so memoizing strategies fill
    /// their caches as a side effect.
    pub fn materialize(&self) -> Result<Value> {
        let count = self.table_model()?.fields.len();
        let mut fields = Vec::with_capacity(count);
        for index in 0..count {
            match self.field(index)? {
                Some(value) => fields.push(Some(value.materialize()?)),
                None => fields.push(None),
            }
        }
        Ok(Value::Table(fields))
    }

    /// Replaces a field in the view's in-memory cache.
    ///
    /// Only valid under a mutable cached strategy; the backing buffer is
    /// untouched and the change is never flushed back automatically.
    pub fn set_field(&self, index: usize, value: Option<Value>) -> Result<()> {
        if !self.ctx.options.generate_mutable_objects() {
            return Err(FlatwireError::AssertionViolation(
                "this strategy does not generate mutable objects".into(),
            ));
        }
        let cache = self.cache.as_ref().ok_or_else(|| {
            FlatwireError::AssertionViolation(
                "in-memory mutation requires a caching strategy".into(),
            )
        })?;
        let mut guard = cache.borrow_mut();
        let slot = guard.get_mut(index).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("field index {index} out of range"))
        })?;
        *slot = Some(value.map(LazyValue::Owned));
        Ok(())
    }
}

impl<'a, B: InputBufferMut + ?Sized> TableView<'a, B> {
    /// Write-through: patches a present scalar field directly in the
    /// backing buffer.
    ///
    /// Only the Lazy strategy supports this; the mutation is immediately
    /// visible to every other view over the same bytes. Absent fields
    /// cannot be added this way (their vtable slot is zero), and the value
    /// kind must match the declared field kind.
    pub fn set_scalar(&self, index: usize, value: ScalarValue) -> Result<()> {
        if !self.ctx.options.supports_write_through() {
            return Err(FlatwireError::AssertionViolation(
                "write-through requires the Lazy strategy".into(),
            ));
        }
        let model = self.table_model()?;
        let fm = model.fields.get(index).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("field index {index} out of range"))
        })?;
        let kind = match self.ctx.registry.resolved(fm.ty)? {
            TypeModel::Scalar(kind) => *kind,
            _ => {
                return Err(FlatwireError::TypeMismatch(format!(
                    "write-through targets scalar fields; '{}' is not one",
                    fm.name
                )))
            }
        };
        if value.kind() != kind {
            return Err(FlatwireError::TypeMismatch(format!(
                "field '{}' is {kind:?}, got {:?}",
                fm.name,
                value.kind()
            )));
        }
        let pos = self.slot_offset(fm.slot)?.ok_or_else(|| {
            FlatwireError::InvalidOffset(format!(
                "field '{}' is absent; write-through cannot add fields",
                fm.name
            ))
        })?;
        let mut raw = [0u8; 8];
        value.encode(&mut raw);
        self.ctx.buf.write_from(pos, &raw[..kind.width()])
    }
}

impl<'a, B: InputBuffer + ?Sized> Clone for TableView<'a, B> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx,
            handle: self.handle,
            table_pos: self.table_pos,
            vtable_pos: self.vtable_pos,
            vtable_size: self.vtable_size,
            table_size: self.table_size,
            cache: self.cache.clone(),
        }
    }
}

impl<B: InputBuffer + ?Sized> fmt::Debug for TableView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableView(pos={}, vtable={}, size={})",
            self.table_pos, self.vtable_pos, self.table_size
        )
    }
}

/// A view over a fixed-layout struct, inline at a known position.
///
/// Structs have no vtable and no absent-field concept; field access is a
/// direct offset computation.
pub struct StructView<'a, B: InputBuffer + ?Sized> {
    ctx: ParseContext<'a, B>,
    handle: TypeHandle,
    pos: usize,
}

impl<'a, B: InputBuffer + ?Sized> StructView<'a, B> {
    pub(crate) fn new(ctx: ParseContext<'a, B>, handle: TypeHandle, pos: usize) -> Result<Self> {
        let size = match ctx.registry.resolved(handle)? {
            TypeModel::Struct(s) => s.size,
            _ => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {handle} is not a struct"
                )))
            }
        };
        if pos + size > ctx.buf.len() {
            return Err(FlatwireError::OutOfBounds {
                position: pos + size,
                length: ctx.buf.len(),
            });
        }
        Ok(Self { ctx, handle, pos })
    }

    /// Reads a member by declaration index.
    pub fn field(&self, index: usize) -> Result<LazyValue<'a, B>> {
        let model = match self.ctx.registry.resolved(self.handle)? {
            TypeModel::Struct(s) => s,
            _ => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {} is not a struct",
                    self.handle
                )))
            }
        };
        let fm = model.fields.get(index).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("struct member index {index} out of range"))
        })?;
        let pos = self.pos + fm.offset;
        match self.ctx.registry.resolved(fm.ty)? {
            TypeModel::Scalar(kind) => Ok(LazyValue::Scalar(ScalarValue::read_from(
                self.ctx.buf,
                pos,
                *kind,
            )?)),
            TypeModel::Struct(_) => Ok(LazyValue::Struct(StructView::new(
                self.ctx, fm.ty, pos,
            )?)),
            _ => Err(FlatwireError::AssertionViolation(format!(
                "struct member '{}' is not fixed-size",
                fm.name
            ))),
        }
    }

    /// Materializes into an owned [`Value::Struct`].
    pub fn materialize(&self) -> Result<Value> {
        let count = match self.ctx.registry.resolved(self.handle)? {
            TypeModel::Struct(s) => s.fields.len(),
            _ => 0,
        };
        let mut fields = Vec::with_capacity(count);
        for index in 0..count {
            fields.push(self.field(index)?.materialize()?);
        }
        Ok(Value::Struct(fields))
    }
}

impl<'a, B: InputBuffer + ?Sized> Clone for StructView<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: InputBuffer + ?Sized> Copy for StructView<'a, B> {}

impl<B: InputBuffer + ?Sized> fmt::Debug for StructView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructView(pos={})", self.pos)
    }
}

/// Decodes the value whose inline cell (scalar/struct bytes, or the
/// uoffset of a reference type) sits at `pos`.
pub(crate) fn decode_value<'a, B: InputBuffer + ?Sized>(
    ctx: ParseContext<'a, B>,
    handle: TypeHandle,
    pos: usize,
) -> Result<LazyValue<'a, B>> {
    let width = ctx.options.offset_width;
    match ctx.registry.resolved(handle)? {
        TypeModel::Scalar(kind) => Ok(LazyValue::Scalar(ScalarValue::read_from(
            ctx.buf, pos, *kind,
        )?)),
        TypeModel::Str => {
            let target = read_uoffset(ctx.buf, pos, width)?;
            Ok(LazyValue::Str(read_string(ctx.buf, target)?))
        }
        TypeModel::Struct(_) => Ok(LazyValue::Struct(StructView::new(ctx, handle, pos)?)),
        TypeModel::Table(_) => {
            let target = read_uoffset(ctx.buf, pos, width)?;
            Ok(LazyValue::Table(TableView::new(ctx, handle, target)?))
        }
        TypeModel::Vector(_) => {
            let target = read_uoffset(ctx.buf, pos, width)?;
            let view = VectorView::new(ctx, handle, target)?;
            if ctx.options.preallocate_vectors() {
                let items = view.materialize()?;
                Ok(LazyValue::Vector(VectorValue::Cached {
                    items: Rc::new(RefCell::new(items)),
                    mutable: ctx.options.generate_mutable_objects(),
                }))
            } else {
                Ok(LazyValue::Vector(VectorValue::Flat(view)))
            }
        }
        TypeModel::Union(_) => Err(FlatwireError::AssertionViolation(
            "unions are decoded through their enclosing table".into(),
        )),
        TypeModel::Declared => Err(FlatwireError::AssertionViolation(format!(
            "type {handle} was accessed before it was defined"
        ))),
    }
}

/// Copies a string out of the buffer: `u32` length, UTF-8 bytes, then one
/// NUL byte not counted by the length prefix.
pub(crate) fn read_string<B: InputBuffer + ?Sized>(buf: &B, pos: usize) -> Result<String> {
    let len = read_scalar::<B, u32>(buf, pos)? as usize;
    // The length prefix is untrusted; the whole extent (including the
    // uncounted trailing NUL) must fit before any allocation happens.
    let end = pos
        .checked_add(4)
        .and_then(|e| e.checked_add(len))
        .and_then(|e| e.checked_add(1))
        .ok_or(FlatwireError::OutOfBounds { position: pos, length: buf.len() })?;
    if end > buf.len() {
        return Err(FlatwireError::OutOfBounds { position: end, length: buf.len() });
    }
    let mut bytes = vec![0u8; len];
    buf.copy_into(pos + 4, &mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| FlatwireError::TypeMismatch("string is not valid UTF-8".into()))
}
