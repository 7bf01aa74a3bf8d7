//! The write path: value graph in, contiguous buffer out.
//!
//! Serialization is a two-pass affair:
//!
//! 1. [`compute_max_size`] walks the graph once and returns an upper bound
//!    on the bytes needed: payload, one worst-case vtable per table
//!    instance, per-object alignment slop, and the root header. The bound
//!    may overestimate (padding, vtable dedup) but never underestimates,
//!    and it inspects actual field presence rather than assuming the
//!    worst, so omitted fields cost nothing.
//! 2. [`write_buffer`] allocates exactly that many zeroed bytes and fills
//!    them front to back, parents before children: a table or vector body
//!    is emitted with zeroed placeholder cells for its references, then
//!    each child is appended at a higher address and the placeholder is
//!    patched with the (strictly forward) relative offset. The buffer is
//!    never reallocated; the final length is the write cursor.
//!
//! VTables are emitted once per distinct byte pattern per write call;
//! structurally identical tables share one vtable. This only ever shrinks
//! the output relative to the size bound.
//!
//! Capacity limits (too many vtable slots, a table body past 64 KiB, a
//! graph larger than the configured offset width can address) surface as
//! `SchemaLimitExceeded` before any buffer is handed back.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use twox_hash::XxHash64;

use crate::buffer::{align_up, OffsetWidth};
use crate::constants::{MAX_TABLE_BYTES, MAX_VTABLE_BYTES, VTABLE_HEADER_LEN};
use crate::error::{FlatwireError, Result};
use crate::options::SerializerOptions;
use crate::schema::{TypeHandle, TypeModel, TypeRegistry};
use crate::value::{ScalarKind, ScalarValue, Value};

/// Upper bound on the serialized size of `value` as type `handle`,
/// including the root header configured in `options`.
pub(crate) fn compute_max_size(
    registry: &TypeRegistry,
    options: &SerializerOptions,
    handle: TypeHandle,
    value: &Value,
) -> Result<usize> {
    Ok(options.header_len() + max_size_of(registry, options, handle, value)?)
}

fn max_size_of(
    registry: &TypeRegistry,
    options: &SerializerOptions,
    handle: TypeHandle,
    value: &Value,
) -> Result<usize> {
    let width = options.offset_width;
    match (registry.resolved(handle)?, value) {
        (TypeModel::Table(model), Value::Table(fields)) => {
            if fields.len() != model.fields.len() {
                return Err(FlatwireError::TypeMismatch(format!(
                    "value has {} fields, table declares {}",
                    fields.len(),
                    model.fields.len()
                )));
            }
            let vtable_size = VTABLE_HEADER_LEN + 2 * model.slot_count;
            if vtable_size > MAX_VTABLE_BYTES {
                return Err(FlatwireError::SchemaLimitExceeded(format!(
                    "{} vtable slots exceed the 16-bit vtable size limit",
                    model.slot_count
                )));
            }

            // Table start alignment slop + soffset + vtable (2-aligned).
            let mut size = 8 + width.bytes() + vtable_size + 2;
            let mut children = 0;

            for (fm, field) in model.fields.iter().zip(fields) {
                let Some(field) = field else { continue };
                match registry.resolved(fm.ty)? {
                    TypeModel::Scalar(kind) => {
                        size += 2 * kind.width() - 1;
                    }
                    TypeModel::Struct(s) => {
                        size += s.size + s.alignment - 1;
                    }
                    TypeModel::Union(u) => match field {
                        Value::Union(None) => {}
                        Value::Union(Some((disc, inner))) => {
                            let member = union_member(u.members.as_slice(), *disc, &fm.name)?;
                            size += 1 + 2 * width.bytes() - 1;
                            children += max_size_of(registry, options, member, inner)?;
                        }
                        other => {
                            return Err(FlatwireError::TypeMismatch(format!(
                                "field '{}' expects a union, found a {}",
                                fm.name,
                                other.describe()
                            )))
                        }
                    },
                    _ => {
                        size += 2 * width.bytes() - 1;
                        children += max_size_of(registry, options, fm.ty, field)?;
                    }
                }
            }
            Ok(size + children)
        }
        (TypeModel::Str, Value::Str(s)) => Ok(4 + s.len() + 1 + 3),
        (TypeModel::Vector(vm), Value::Vector(items)) => {
            let (stride, elem_align) = registry.inline_layout(vm.element, width)?;
            let mut size = 4 + items.len() * stride + elem_align.max(4);
            if !registry.is_fixed_size(vm.element)? {
                for item in items {
                    size += max_size_of(registry, options, vm.element, item)?;
                }
            }
            Ok(size)
        }
        (model, value) => Err(FlatwireError::TypeMismatch(format!(
            "cannot serialize a {} value as a {}",
            value.describe(),
            model.describe()
        ))),
    }
}

fn union_member(members: &[TypeHandle], disc: u8, field: &str) -> Result<TypeHandle> {
    // Discriminants are 1-based; 0 is the "none" state and never pairs
    // with a value.
    (disc as usize)
        .checked_sub(1)
        .and_then(|i| members.get(i))
        .copied()
        .ok_or_else(|| {
            FlatwireError::TypeMismatch(format!(
                "union discriminant {disc} does not match any member of field '{field}'"
            ))
        })
}

/// Serializes `root` as type `handle` and returns the finished buffer,
/// truncated to the bytes actually written.
pub(crate) fn write_buffer(
    registry: &TypeRegistry,
    options: &SerializerOptions,
    handle: TypeHandle,
    root: &Value,
) -> Result<Vec<u8>> {
    let max = compute_max_size(registry, options, handle, root)?;
    if max > options.offset_width.max_addressable() {
        return Err(FlatwireError::SchemaLimitExceeded(format!(
            "maximum buffer size {max} exceeds what {:?} offsets can address",
            options.offset_width
        )));
    }
    let fields = match root {
        Value::Table(fields) => fields,
        other => {
            return Err(FlatwireError::TypeMismatch(format!(
                "the root value must be a table, found a {}",
                other.describe()
            )))
        }
    };

    let mut writer = Writer {
        registry,
        options,
        buf: vec![0u8; max],
        cursor: options.header_len(),
        vtables: HashMap::default(),
    };

    if let Some(id) = options.file_identifier {
        writer.put_at(options.offset_width.bytes(), &id)?;
    }

    let root_pos = writer.write_table(handle, fields)?;
    writer.patch_uoffset(0, root_pos)?;

    let written = writer.cursor;
    let mut out = writer.buf;
    out.truncate(written);
    Ok(out)
}

/// What a present table field contributes to the table body.
enum FieldEmit<'v> {
    Scalar(ScalarValue),
    StructInline(TypeHandle, &'v Value),
    Ref(TypeHandle, &'v Value),
    UnionDisc(u8),
}

struct Writer<'r> {
    registry: &'r TypeRegistry,
    options: &'r SerializerOptions,
    buf: Vec<u8>,
    cursor: usize,
    /// Byte-identical vtables emitted so far, keyed for deduplication.
    vtables: HashMap<Vec<u8>, usize, BuildHasherDefault<XxHash64>>,
}

impl<'r> Writer<'r> {
    fn put_at(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let end = pos + bytes.len();
        let dst = self.buf.get_mut(pos..end).ok_or_else(|| {
            FlatwireError::AssertionViolation(
                "write ran past the computed maximum buffer size".into(),
            )
        })?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn put_scalar_at(&mut self, pos: usize, value: ScalarValue) -> Result<()> {
        let mut raw = [0u8; 8];
        value.encode(&mut raw);
        self.put_at(pos, &raw[..value.kind().width()])
    }

    /// Padding bytes are already zero; aligning is just cursor arithmetic.
    fn align_to(&mut self, align: usize) {
        self.cursor = align_up(self.cursor, align);
    }

    fn patch_uoffset(&mut self, at: usize, target: usize) -> Result<()> {
        let rel = target - at;
        match self.options.offset_width {
            OffsetWidth::Four => {
                let rel = u32::try_from(rel).map_err(|_| offset_overflow(rel))?;
                self.put_at(at, &rel.to_le_bytes())
            }
            OffsetWidth::Two => {
                let rel = u16::try_from(rel).map_err(|_| offset_overflow(rel))?;
                self.put_at(at, &rel.to_le_bytes())
            }
        }
    }

    fn patch_soffset(&mut self, table_pos: usize, vtable_pos: usize) -> Result<()> {
        let rel = table_pos as i64 - vtable_pos as i64;
        match self.options.offset_width {
            OffsetWidth::Four => {
                let rel = i32::try_from(rel).map_err(|_| soffset_overflow(rel))?;
                self.put_at(table_pos, &rel.to_le_bytes())
            }
            OffsetWidth::Two => {
                let rel = i16::try_from(rel).map_err(|_| soffset_overflow(rel))?;
                self.put_at(table_pos, &rel.to_le_bytes())
            }
        }
    }

    fn write_table<'v>(
        &mut self,
        handle: TypeHandle,
        fields: &'v [Option<Value>],
    ) -> Result<usize> {
        let model = match self.registry.resolved(handle)? {
            TypeModel::Table(m) => m,
            other => {
                return Err(FlatwireError::TypeMismatch(format!(
                    "cannot serialize a table value as a {}",
                    other.describe()
                )))
            }
        };
        if fields.len() != model.fields.len() {
            return Err(FlatwireError::TypeMismatch(format!(
                "value has {} fields, table declares {}",
                fields.len(),
                model.fields.len()
            )));
        }

        let width = self.options.offset_width;

        // Pass 1: relative layout of the table body.
        let mut body = width.bytes();
        let mut table_align = width.bytes();
        let mut emits: Vec<(usize, usize, FieldEmit<'v>)> = Vec::new();

        for (fm, field) in model.fields.iter().zip(fields) {
            let Some(field) = field else { continue };
            match self.registry.resolved(fm.ty)? {
                TypeModel::Scalar(kind) => {
                    let sv = field.expect_scalar(&fm.name)?;
                    check_kind(&fm.name, *kind, sv)?;
                    let rel = align_up(body, kind.width());
                    emits.push((fm.slot, rel, FieldEmit::Scalar(sv)));
                    body = rel + kind.width();
                    table_align = table_align.max(kind.width());
                }
                TypeModel::Struct(s) => {
                    let rel = align_up(body, s.alignment);
                    emits.push((fm.slot, rel, FieldEmit::StructInline(fm.ty, field)));
                    body = rel + s.size;
                    table_align = table_align.max(s.alignment);
                }
                TypeModel::Union(u) => match field {
                    Value::Union(None) => {}
                    Value::Union(Some((disc, inner))) => {
                        let member = union_member(u.members.as_slice(), *disc, &fm.name)?;
                        emits.push((fm.slot, body, FieldEmit::UnionDisc(*disc)));
                        body += 1;
                        let rel = align_up(body, width.bytes());
                        emits.push((fm.slot + 1, rel, FieldEmit::Ref(member, inner)));
                        body = rel + width.bytes();
                    }
                    other => {
                        return Err(FlatwireError::TypeMismatch(format!(
                            "field '{}' expects a union, found a {}",
                            fm.name,
                            other.describe()
                        )))
                    }
                },
                _ => {
                    let rel = align_up(body, width.bytes());
                    emits.push((fm.slot, rel, FieldEmit::Ref(fm.ty, field)));
                    body = rel + width.bytes();
                }
            }
        }

        if body > MAX_TABLE_BYTES {
            return Err(FlatwireError::SchemaLimitExceeded(format!(
                "table body of {body} bytes exceeds the 16-bit table size limit"
            )));
        }
        let vtable_size = VTABLE_HEADER_LEN + 2 * model.slot_count;
        if vtable_size > MAX_VTABLE_BYTES {
            return Err(FlatwireError::SchemaLimitExceeded(format!(
                "{} vtable slots exceed the 16-bit vtable size limit",
                model.slot_count
            )));
        }

        // Pass 2: emit body, then vtable, then referenced children.
        self.align_to(table_align);
        let table_pos = self.cursor;
        self.cursor = table_pos + body;

        let mut pending: Vec<(usize, TypeHandle, &'v Value)> = Vec::new();
        for (_, rel, emit) in &emits {
            let abs = table_pos + rel;
            match emit {
                FieldEmit::Scalar(sv) => self.put_scalar_at(abs, *sv)?,
                FieldEmit::UnionDisc(disc) => self.put_at(abs, &[*disc])?,
                FieldEmit::StructInline(ty, value) => self.write_struct_at(*ty, value, abs)?,
                FieldEmit::Ref(ty, value) => pending.push((abs, *ty, value)),
            }
        }

        self.align_to(2);
        let mut vt = Vec::with_capacity(vtable_size);
        vt.extend((vtable_size as u16).to_le_bytes());
        vt.extend((body as u16).to_le_bytes());
        let mut slots = vec![0u16; model.slot_count];
        for (slot, rel, _) in &emits {
            let cell = slots.get_mut(*slot).ok_or_else(|| {
                FlatwireError::AssertionViolation(format!("slot {slot} exceeds the vtable"))
            })?;
            *cell = *rel as u16;
        }
        for slot in slots {
            vt.extend(slot.to_le_bytes());
        }

        let vtable_pos = match self.vtables.get(&vt) {
            Some(&existing) => existing,
            None => {
                let pos = self.cursor;
                self.put_at(pos, &vt)?;
                self.cursor = pos + vt.len();
                self.vtables.insert(vt, pos);
                pos
            }
        };
        self.patch_soffset(table_pos, vtable_pos)?;

        for (slot_pos, ty, value) in pending {
            let child_pos = self.write_value(ty, value)?;
            self.patch_uoffset(slot_pos, child_pos)?;
        }

        Ok(table_pos)
    }

    fn write_value(&mut self, handle: TypeHandle, value: &Value) -> Result<usize> {
        match (self.registry.resolved(handle)?, value) {
            (TypeModel::Str, Value::Str(s)) => self.write_string(s),
            (TypeModel::Table(_), Value::Table(fields)) => self.write_table(handle, fields),
            (TypeModel::Vector(_), Value::Vector(items)) => self.write_vector(handle, items),
            (model, value) => Err(FlatwireError::TypeMismatch(format!(
                "cannot serialize a {} value as a {}",
                value.describe(),
                model.describe()
            ))),
        }
    }

    fn write_string(&mut self, s: &str) -> Result<usize> {
        self.align_to(4);
        let pos = self.cursor;
        let len = u32::try_from(s.len()).map_err(|_| {
            FlatwireError::SchemaLimitExceeded("string longer than u32::MAX bytes".into())
        })?;
        self.put_at(pos, &len.to_le_bytes())?;
        self.put_at(pos + 4, s.as_bytes())?;
        // Implicit trailing NUL, not counted by the length prefix.
        self.put_at(pos + 4 + s.len(), &[0])?;
        self.cursor = pos + 4 + s.len() + 1;
        Ok(pos)
    }

    fn write_vector(&mut self, handle: TypeHandle, items: &[Value]) -> Result<usize> {
        let element = match self.registry.resolved(handle)? {
            TypeModel::Vector(v) => v.element,
            other => {
                return Err(FlatwireError::TypeMismatch(format!(
                    "cannot serialize a vector value as a {}",
                    other.describe()
                )))
            }
        };
        let width = self.options.offset_width;
        let (stride, elem_align) = self.registry.inline_layout(element, width)?;

        // Position the count prefix so the payload after it lands
        // element-aligned.
        let pos = if elem_align > 4 {
            align_up(self.cursor + 4, elem_align) - 4
        } else {
            align_up(self.cursor, 4)
        };
        self.cursor = pos;

        let count = u32::try_from(items.len()).map_err(|_| {
            FlatwireError::SchemaLimitExceeded("vector longer than u32::MAX items".into())
        })?;
        self.put_at(pos, &count.to_le_bytes())?;
        self.cursor = pos + 4;

        match self.registry.resolved(element)? {
            TypeModel::Scalar(kind) => {
                let kind = *kind;
                for item in items {
                    let sv = item.expect_scalar("vector element")?;
                    check_kind("vector element", kind, sv)?;
                    let at = self.cursor;
                    self.put_scalar_at(at, sv)?;
                    self.cursor = at + stride;
                }
            }
            TypeModel::Struct(_) => {
                for item in items {
                    let at = self.cursor;
                    self.write_struct_at(element, item, at)?;
                    self.cursor = at + stride;
                }
            }
            _ => {
                let base = self.cursor;
                self.cursor = base + items.len() * stride;
                for (i, item) in items.iter().enumerate() {
                    let child_pos = self.write_value(element, item)?;
                    self.patch_uoffset(base + i * stride, child_pos)?;
                }
            }
        }
        Ok(pos)
    }

    /// Structs are written inline with no indirection: each member lands
    /// at its precomputed offset from `pos`.
    fn write_struct_at(&mut self, handle: TypeHandle, value: &Value, pos: usize) -> Result<()> {
        let model = match self.registry.resolved(handle)? {
            TypeModel::Struct(s) => s,
            other => {
                return Err(FlatwireError::TypeMismatch(format!(
                    "cannot serialize a struct value as a {}",
                    other.describe()
                )))
            }
        };
        let members = match value {
            Value::Struct(members) => members,
            other => {
                return Err(FlatwireError::TypeMismatch(format!(
                    "expected a struct value, found a {}",
                    other.describe()
                )))
            }
        };
        if members.len() != model.fields.len() {
            return Err(FlatwireError::TypeMismatch(format!(
                "value has {} members, struct declares {}",
                members.len(),
                model.fields.len()
            )));
        }
        for (fm, member) in model.fields.iter().zip(members) {
            match self.registry.resolved(fm.ty)? {
                TypeModel::Scalar(kind) => {
                    let sv = member.expect_scalar(&fm.name)?;
                    check_kind(&fm.name, *kind, sv)?;
                    self.put_scalar_at(pos + fm.offset, sv)?;
                }
                TypeModel::Struct(_) => {
                    self.write_struct_at(fm.ty, member, pos + fm.offset)?;
                }
                _ => {
                    return Err(FlatwireError::AssertionViolation(format!(
                        "struct member '{}' is not fixed-size",
                        fm.name
                    )))
                }
            }
        }
        Ok(())
    }
}

fn check_kind(name: &str, expected: ScalarKind, actual: ScalarValue) -> Result<()> {
    if actual.kind() != expected {
        return Err(FlatwireError::TypeMismatch(format!(
            "'{name}' is declared {expected:?}, got {:?}",
            actual.kind()
        )));
    }
    Ok(())
}

fn offset_overflow(rel: usize) -> FlatwireError {
    FlatwireError::SchemaLimitExceeded(format!(
        "relative offset {rel} exceeds the configured offset width"
    ))
}

fn soffset_overflow(rel: i64) -> FlatwireError {
    FlatwireError::SchemaLimitExceeded(format!(
        "vtable offset {rel} exceeds the configured offset width"
    ))
}
