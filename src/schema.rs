//! The Type Model Registry.
//!
//! A [`TypeRegistry`] is an arena of [`TypeModel`] variants addressed by
//! stable [`TypeHandle`] indices. Each logical type is registered exactly
//! once; the entry is immutable after definition and memoized for the
//! registry's lifetime. Handles rather than ownership pointers are what
//! make self-referential schemas expressible: a table that references its
//! own type (directly or transitively) is declared first with
//! [`TypeRegistry::declare`] and defined later with
//! [`TypeRegistry::define_table`], so child references can resolve after
//! the parent's registration completes.
//!
//! Touching a declared-but-undefined entry on the write or parse path is a
//! programming error and surfaces as
//! [`AssertionViolation`](crate::FlatwireError::AssertionViolation).

use std::fmt;

use crate::buffer::{align_up, OffsetWidth};
use crate::error::{FlatwireError, Result};
use crate::value::{ScalarKind, ScalarValue};

/// A strong type identifying one registered type model.
///
/// Handles are plain indices into the registry arena; they stay valid for
/// the registry's lifetime and are cheap to copy into views and writers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(u32);

impl TypeHandle {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw index value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle({})", self.0)
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One declared field of a table, as supplied by the caller.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name, used for lookup and diagnostics.
    pub name: String,
    /// The field's type.
    pub ty: TypeHandle,
    /// Declared default for scalar fields. Absent scalar fields read back
    /// as this value (or as zero when no default is declared).
    pub default: Option<ScalarValue>,
}

impl FieldDef {
    /// A field with no declared default.
    pub fn new(name: impl Into<String>, ty: TypeHandle) -> Self {
        Self { name: name.into(), ty, default: None }
    }

    /// Attaches a scalar default.
    pub fn with_default(mut self, default: ScalarValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// A resolved table field with its assigned vtable slot.
#[derive(Debug, Clone)]
pub struct FieldModel {
    /// Field name.
    pub name: String,
    /// The field's type.
    pub ty: TypeHandle,
    /// Declared scalar default, if any.
    pub default: Option<ScalarValue>,
    /// First vtable slot occupied by this field. Union fields occupy this
    /// slot (discriminant) and the next (value reference).
    pub slot: usize,
}

/// Layout model for a table: variable layout, optional fields, vtable
/// indirection.
#[derive(Debug, Clone)]
pub struct TableModel {
    /// Declared fields in logical order.
    pub fields: Vec<FieldModel>,
    /// Total vtable slots, counting the extra slot of each union field.
    pub slot_count: usize,
}

impl TableModel {
    /// Finds a field's logical index by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One member of a struct with its precomputed inline offset.
#[derive(Debug, Clone)]
pub struct StructFieldModel {
    /// Member name.
    pub name: String,
    /// Member type (scalar or struct).
    pub ty: TypeHandle,
    /// Byte offset from the struct's own start.
    pub offset: usize,
}

/// Layout model for a struct: fixed inline layout, no indirection, no
/// absent-field concept. Members and padding are fixed at definition time.
#[derive(Debug, Clone)]
pub struct StructModel {
    /// Members in declaration order.
    pub fields: Vec<StructFieldModel>,
    /// Total padded size in bytes.
    pub size: usize,
    /// Required alignment (the max member alignment).
    pub alignment: usize,
}

/// Layout model for a vector.
#[derive(Debug, Clone)]
pub struct VectorModel {
    /// Element type.
    pub element: TypeHandle,
}

/// Layout model for a union: a closed member set selected by a 1-based
/// discriminant, with 0 reserved for "none".
#[derive(Debug, Clone)]
pub struct UnionModel {
    /// Member types, all tables, in discriminant order.
    pub members: Vec<TypeHandle>,
}

/// The closed set of per-type layout models.
///
/// Dispatch over this enum (rather than an open class hierarchy) is what
/// the whole runtime is built on: each variant knows its inline size,
/// alignment and fixed-ness, and the write/parse/max-size machinery
/// pattern-matches on it, recursively following child handles.
#[derive(Debug, Clone)]
pub enum TypeModel {
    /// A fixed-width scalar.
    Scalar(ScalarKind),
    /// A length-prefixed UTF-8 string with a trailing NUL.
    Str,
    /// A fixed-layout inline aggregate.
    Struct(StructModel),
    /// A vtable-indexed variable-layout object.
    Table(TableModel),
    /// A length-prefixed homogeneous sequence.
    Vector(VectorModel),
    /// A discriminated closed variant set.
    Union(UnionModel),
    /// Declared but not yet defined. Only valid during registry
    /// construction; reaching one at write/parse time is an assertion
    /// violation.
    Declared,
}

impl TypeModel {
    /// A one-word description of the variant, for error messages.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Str => "string",
            Self::Struct(_) => "struct",
            Self::Table(_) => "table",
            Self::Vector(_) => "vector",
            Self::Union(_) => "union",
            Self::Declared => "declared placeholder",
        }
    }
}

/// The arena of type models for one schema.
///
/// Construction is append-only; once built, the registry is immutable and
/// can be shared freely across threads and parse calls.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    models: Vec<TypeModel>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    fn push(&mut self, model: TypeModel) -> TypeHandle {
        let id = u32::try_from(self.models.len()).unwrap_or(u32::MAX);
        self.models.push(model);
        TypeHandle::new(id)
    }

    /// Registers (or returns the memoized handle of) a scalar type.
    pub fn scalar(&mut self, kind: ScalarKind) -> TypeHandle {
        let existing = self.models.iter().position(|m| matches!(m, TypeModel::Scalar(k) if *k == kind));
        match existing {
            Some(i) => TypeHandle::new(i as u32),
            None => self.push(TypeModel::Scalar(kind)),
        }
    }

    /// Registers (or returns the memoized handle of) the string type.
    pub fn string(&mut self) -> TypeHandle {
        let existing = self.models.iter().position(|m| matches!(m, TypeModel::Str));
        match existing {
            Some(i) => TypeHandle::new(i as u32),
            None => self.push(TypeModel::Str),
        }
    }

    /// Registers a placeholder for a type that will be defined later.
    ///
    /// This is the forward-reference mechanism for cyclic schemas: declare
    /// the table, use the handle in child fields, then fill it in with
    /// [`TypeRegistry::define_table`].
    pub fn declare(&mut self) -> TypeHandle {
        self.push(TypeModel::Declared)
    }

    /// Fills in a previously declared handle with a table definition.
    ///
    /// Vtable slots are assigned in declaration order; a union-typed field
    /// consumes two consecutive slots (discriminant, then value). Union
    /// types must therefore already be defined when the table is.
    ///
    /// Declared defaults are checked here: only scalar fields may carry
    /// one, and its kind must match the field's declared kind.
    pub fn define_table(&mut self, handle: TypeHandle, fields: Vec<FieldDef>) -> Result<()> {
        match self.models.get(handle.as_u32() as usize) {
            Some(TypeModel::Declared) => {}
            Some(_) => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {handle} is already defined"
                )))
            }
            None => {
                return Err(FlatwireError::AssertionViolation(format!(
                    "type {handle} was never declared"
                )))
            }
        }

        let mut resolved = Vec::with_capacity(fields.len());
        let mut slot = 0usize;
        for def in fields {
            if let Some(default) = def.default {
                match self.models.get(def.ty.as_u32() as usize) {
                    Some(TypeModel::Scalar(kind)) if default.kind() == *kind => {}
                    Some(TypeModel::Scalar(kind)) => {
                        return Err(FlatwireError::TypeMismatch(format!(
                            "default for field '{}' is {:?}, field is declared {kind:?}",
                            def.name,
                            default.kind()
                        )))
                    }
                    _ => {
                        return Err(FlatwireError::TypeMismatch(format!(
                            "field '{}' declares a default but is not a scalar",
                            def.name
                        )))
                    }
                }
            }
            let is_union = matches!(
                self.models.get(def.ty.as_u32() as usize),
                Some(TypeModel::Union(_))
            );
            resolved.push(FieldModel {
                name: def.name,
                ty: def.ty,
                default: def.default,
                slot,
            });
            slot += if is_union { 2 } else { 1 };
        }

        self.models[handle.as_u32() as usize] = TypeModel::Table(TableModel {
            fields: resolved,
            slot_count: slot,
        });
        Ok(())
    }

    /// Declares and defines a table in one step (for acyclic types).
    pub fn table(&mut self, fields: Vec<FieldDef>) -> Result<TypeHandle> {
        let handle = self.declare();
        self.define_table(handle, fields)?;
        Ok(handle)
    }

    /// Registers a struct and computes its inline layout.
    ///
    /// Members must be fixed-size (scalars or previously defined structs);
    /// offsets, padding and total size are fixed here, once.
    pub fn struct_type(&mut self, fields: Vec<(String, TypeHandle)>) -> Result<TypeHandle> {
        let mut offset = 0usize;
        let mut alignment = 1usize;
        let mut resolved = Vec::with_capacity(fields.len());

        for (name, ty) in fields {
            let (size, align) = match self.models.get(ty.as_u32() as usize) {
                Some(TypeModel::Scalar(kind)) => (kind.width(), kind.width()),
                Some(TypeModel::Struct(s)) => (s.size, s.alignment),
                Some(_) => {
                    return Err(FlatwireError::TypeMismatch(format!(
                        "struct member '{name}' must be a scalar or struct"
                    )))
                }
                None => {
                    return Err(FlatwireError::AssertionViolation(format!(
                        "struct member '{name}' references unknown type {ty}"
                    )))
                }
            };
            offset = align_up(offset, align);
            resolved.push(StructFieldModel { name, ty, offset });
            offset += size;
            alignment = alignment.max(align);
        }

        let size = align_up(offset.max(1), alignment);
        Ok(self.push(TypeModel::Struct(StructModel {
            fields: resolved,
            size,
            alignment,
        })))
    }

    /// Registers (or returns the memoized handle of) a vector type.
    pub fn vector(&mut self, element: TypeHandle) -> TypeHandle {
        let existing = self
            .models
            .iter()
            .position(|m| matches!(m, TypeModel::Vector(v) if v.element == element));
        match existing {
            Some(i) => TypeHandle::new(i as u32),
            None => self.push(TypeModel::Vector(VectorModel { element })),
        }
    }

    /// Registers a union over the given table members.
    ///
    /// Discriminants are assigned 1-based in member order; 0 is the
    /// reserved "none" state.
    pub fn union_type(&mut self, members: Vec<TypeHandle>) -> Result<TypeHandle> {
        for member in &members {
            match self.models.get(member.as_u32() as usize) {
                Some(TypeModel::Table(_) | TypeModel::Declared) => {}
                Some(_) => {
                    return Err(FlatwireError::TypeMismatch(format!(
                        "union member {member} must be a table"
                    )))
                }
                None => {
                    return Err(FlatwireError::AssertionViolation(format!(
                        "union member {member} references unknown type"
                    )))
                }
            }
        }
        Ok(self.push(TypeModel::Union(UnionModel { members })))
    }

    /// Looks up a model, tolerating `Declared` placeholders.
    pub fn get(&self, handle: TypeHandle) -> Result<&TypeModel> {
        self.models.get(handle.as_u32() as usize).ok_or_else(|| {
            FlatwireError::AssertionViolation(format!("unknown type handle {handle}"))
        })
    }

    /// Looks up a model that must be fully defined.
    ///
    /// Hitting a `Declared` placeholder here means a type was used on the
    /// write or parse path before its definition was registered.
    pub fn resolved(&self, handle: TypeHandle) -> Result<&TypeModel> {
        match self.get(handle)? {
            TypeModel::Declared => Err(FlatwireError::AssertionViolation(format!(
                "type {handle} was accessed before it was defined"
            ))),
            model => Ok(model),
        }
    }

    /// Inline size and alignment of a type when embedded as a table field
    /// or vector element.
    ///
    /// Reference types (strings, tables, vectors) occupy one offset of the
    /// configured width. Unions are not a single inline cell and are laid
    /// out by the table machinery; asking for their layout here is an
    /// assertion violation.
    pub fn inline_layout(&self, handle: TypeHandle, width: OffsetWidth) -> Result<(usize, usize)> {
        match self.resolved(handle)? {
            TypeModel::Scalar(kind) => Ok((kind.width(), kind.width())),
            TypeModel::Struct(s) => Ok((s.size, s.alignment)),
            TypeModel::Str | TypeModel::Table(_) | TypeModel::Vector(_) => {
                Ok((width.bytes(), width.bytes()))
            }
            TypeModel::Union(_) => Err(FlatwireError::AssertionViolation(
                "a union has no single inline cell; it is laid out by its enclosing table".into(),
            )),
            TypeModel::Declared => unreachable_declared(handle),
        }
    }

    /// True if the type is stored entirely inline (no offset indirection).
    pub fn is_fixed_size(&self, handle: TypeHandle) -> Result<bool> {
        Ok(matches!(
            self.resolved(handle)?,
            TypeModel::Scalar(_) | TypeModel::Struct(_)
        ))
    }
}

fn unreachable_declared(handle: TypeHandle) -> Result<(usize, usize)> {
    // resolved() already rejects Declared; this arm exists only to satisfy
    // the exhaustive match.
    Err(FlatwireError::AssertionViolation(format!(
        "type {handle} was accessed before it was defined"
    )))
}
