//! Byte-level checks of the wire layout: header, vtable encoding, offset
//! directions, alignment, string termination, narrow offsets, corruption
//! handling, and memory-mapped parsing.

use flatwire::{
    FieldDef, FlatwireError, LazyValue, MappedBuffer, OffsetWidth, ScalarKind, ScalarValue,
    Serializer, SerializerOptions, TypeHandle, TypeRegistry, Value,
};

fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

fn read_i32(bytes: &[u8], pos: usize) -> i32 {
    i32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

fn scalar_and_string_schema() -> flatwire::Result<(TypeRegistry, TypeHandle)> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let str_ty = registry.string();
    let table = registry.table(vec![
        FieldDef::new("a", i32_ty).with_default(ScalarValue::I32(7)),
        FieldDef::new("name", str_ty),
    ])?;
    Ok((registry, table))
}

/// Full byte-level walk of a table with one absent defaulted scalar and
/// one string: header, soffset, vtable, uoffset, string body.
#[test]
fn table_layout_with_absent_default_and_string() -> flatwire::Result<()> {
    let (registry, table) = scalar_and_string_schema()?;
    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![None, Some("abc".into())]);
    let bytes = serializer.write(table, &value)?;

    // Root uoffset resolves forward to the table.
    let root = read_u32(&bytes, 0) as usize;
    assert!(root >= 4);

    // The soffset is negative: the vtable was written after the body.
    let soffset = read_i32(&bytes, root);
    assert!(soffset < 0);
    let vtable = (root as i64 - i64::from(soffset)) as usize;

    // VTable header: size covers 2 slots; body is soffset + one uoffset.
    assert_eq!(read_u16(&bytes, vtable), 8);
    assert_eq!(read_u16(&bytes, vtable + 2), 8);
    // Slot 0 (absent scalar) is zero; slot 1 holds the string cell.
    assert_eq!(read_u16(&bytes, vtable + 4), 0);
    let name_rel = read_u16(&bytes, vtable + 6) as usize;
    assert_ne!(name_rel, 0);

    // The string uoffset points strictly forward.
    let name_cell = root + name_rel;
    let string_pos = name_cell + read_u32(&bytes, name_cell) as usize;
    assert!(string_pos > name_cell);

    // Length prefix, bytes, and the uncounted trailing NUL.
    assert_eq!(read_u32(&bytes, string_pos), 3);
    assert_eq!(&bytes[string_pos + 4..string_pos + 7], b"abc");
    assert_eq!(bytes[string_pos + 7], 0);

    // The absent scalar reads back as its declared default.
    let parsed = serializer.parse(bytes.as_slice(), table)?;
    assert_eq!(parsed.field(0)?, Some(7i32.into()));
    assert_eq!(parsed.field(1)?, Some("abc".into()));
    Ok(())
}

#[test]
fn scalar_vector_payload_is_contiguous_and_aligned() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let vec_ty = registry.vector(i32_ty);
    let table = registry.table(vec![FieldDef::new("v", vec_ty)])?;

    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![Some(Value::Vector(vec![
        1i32.into(),
        2i32.into(),
        3i32.into(),
    ]))]);
    let bytes = serializer.write(table, &value)?;

    let root = read_u32(&bytes, 0) as usize;
    let soffset = read_i32(&bytes, root);
    let vtable = (root as i64 - i64::from(soffset)) as usize;
    let v_rel = read_u16(&bytes, vtable + 4) as usize;
    let v_cell = root + v_rel;
    let vec_pos = v_cell + read_u32(&bytes, v_cell) as usize;

    // u32 count, then 12 bytes of little-endian elements: 16 bytes total.
    assert_eq!(read_u32(&bytes, vec_pos), 3);
    assert_eq!((vec_pos + 4) % 4, 0);
    assert_eq!(read_u32(&bytes, vec_pos + 4), 1);
    assert_eq!(read_u32(&bytes, vec_pos + 8), 2);
    assert_eq!(read_u32(&bytes, vec_pos + 12), 3);
    assert_eq!(bytes.len(), vec_pos + 16);
    Ok(())
}

#[test]
fn eight_byte_elements_are_payload_aligned() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let f64_ty = registry.scalar(ScalarKind::F64);
    let vec_ty = registry.vector(f64_ty);
    let table = registry.table(vec![FieldDef::new("v", vec_ty)])?;

    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![Some(Value::Vector(vec![1.5f64.into(), 2.5f64.into()]))]);
    let bytes = serializer.write(table, &value)?;

    let root = read_u32(&bytes, 0) as usize;
    let soffset = read_i32(&bytes, root);
    let vtable = (root as i64 - i64::from(soffset)) as usize;
    let v_cell = root + read_u16(&bytes, vtable + 4) as usize;
    let vec_pos = v_cell + read_u32(&bytes, v_cell) as usize;

    // The count prefix may sit off 8-byte alignment, but the payload after
    // it must not.
    assert_eq!((vec_pos + 4) % 8, 0);
    assert_eq!(
        f64::from_le_bytes(bytes[vec_pos + 4..vec_pos + 12].try_into().unwrap()),
        1.5
    );
    Ok(())
}

#[test]
fn identical_tables_share_one_vtable() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let i16_ty = registry.scalar(ScalarKind::I16);
    let weapon = registry.table(vec![FieldDef::new("damage", i16_ty)])?;
    let pair = registry.table(vec![
        FieldDef::new("a", weapon),
        FieldDef::new("b", weapon),
    ])?;

    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![
        Some(Value::Table(vec![Some(3i16.into())])),
        Some(Value::Table(vec![Some(4i16.into())])),
    ]);
    let bytes = serializer.write(pair, &value)?;

    let parsed = serializer.parse(bytes.as_slice(), pair)?;
    let view = parsed.as_view().expect("lazy parse returns a view");

    let mut vtables = Vec::new();
    for index in 0..2 {
        match view.field(index)? {
            Some(LazyValue::Table(child)) => {
                let pos = child.position();
                let soffset = read_i32(&bytes, pos);
                vtables.push(pos as i64 - i64::from(soffset));
            }
            other => panic!("unexpected field: {other:?}"),
        }
    }
    assert_eq!(vtables[0], vtables[1]);
    Ok(())
}

#[test]
fn narrow_offsets_shrink_a_reference_heavy_buffer() -> flatwire::Result<()> {
    // Every string field costs one offset cell, so halving the offset
    // width must show up in the total.
    let mut registry = TypeRegistry::new();
    let str_ty = registry.string();
    let table = registry.table(vec![
        FieldDef::new("a", str_ty),
        FieldDef::new("b", str_ty),
        FieldDef::new("c", str_ty),
        FieldDef::new("d", str_ty),
    ])?;
    let value = Value::Table(vec![
        Some("aa".into()),
        Some("bb".into()),
        Some("cc".into()),
        Some("dd".into()),
    ]);

    let wide = Serializer::new(&registry);
    let narrow = Serializer::with_options(
        &registry,
        SerializerOptions::default().with_offset_width(OffsetWidth::Two),
    );

    let wide_bytes = wide.write(table, &value)?;
    let narrow_bytes = narrow.write(table, &value)?;
    assert!(
        narrow_bytes.len() < wide_bytes.len(),
        "narrow {} vs wide {}",
        narrow_bytes.len(),
        wide_bytes.len()
    );

    // The root offset header is a u16 now.
    let root = read_u16(&narrow_bytes, 0) as usize;
    assert!(root >= 2);
    // The table body shrank too: soffset + 4 offset cells at 2 bytes each.
    let soffset = i16::from_le_bytes([narrow_bytes[root], narrow_bytes[root + 1]]);
    let vtable = (root as i64 - i64::from(soffset)) as usize;
    assert_eq!(read_u16(&narrow_bytes, vtable + 2), 2 + 4 * 2);

    // Same configuration parses it back; vector counts and vtable entries
    // keep their fixed widths regardless.
    let parsed = narrow.parse(narrow_bytes.as_slice(), table)?;
    assert_eq!(parsed.materialize()?, value);
    Ok(())
}

#[test]
fn file_identifier_is_written_and_enforced() -> flatwire::Result<()> {
    let (registry, table) = scalar_and_string_schema()?;
    let value = Value::Table(vec![Some(42i32.into()), None]);

    let strict = Serializer::with_options(
        &registry,
        SerializerOptions::default().with_file_identifier(*b"MONS", true),
    );
    let bytes = strict.write(table, &value)?;
    assert_eq!(&bytes[4..8], b"MONS");
    assert_eq!(strict.parse(bytes.as_slice(), table)?.field(0)?, Some(42i32.into()));

    let mut corrupted = bytes.clone();
    corrupted[4] = b'X';
    let err = strict.parse(corrupted.as_slice(), table).unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // Without strict checking, the identifier is ignored on parse.
    let relaxed = Serializer::with_options(
        &registry,
        SerializerOptions::default().with_file_identifier(*b"MONS", false),
    );
    assert_eq!(relaxed.parse(corrupted.as_slice(), table)?.field(0)?, Some(42i32.into()));
    Ok(())
}

#[test]
fn corrupt_buffers_fail_without_panicking() -> flatwire::Result<()> {
    let (registry, table) = scalar_and_string_schema()?;
    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![Some(42i32.into()), Some("abc".into())]);
    let bytes = serializer.write(table, &value)?;

    // Zeroed root offset: a required reference of zero is invalid.
    let mut zeroed = bytes.clone();
    zeroed[..4].fill(0);
    let err = serializer.parse(zeroed.as_slice(), table).unwrap_err();
    assert!(matches!(err, FlatwireError::InvalidOffset(_)), "{err}");

    // Root offset pointing past the end.
    let mut wild = bytes.clone();
    wild[..4].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = serializer.parse(wild.as_slice(), table).unwrap_err();
    assert!(matches!(err, FlatwireError::InvalidOffset(_)), "{err}");

    // Truncated buffers fail on whatever access first runs off the end.
    for len in 0..bytes.len() {
        if let Ok(parsed) = serializer.parse(&bytes[..len], table) {
            let _ = parsed.materialize().unwrap_err();
        }
    }

    // The intact buffer still parses.
    assert_eq!(serializer.parse(bytes.as_slice(), table)?.materialize()?, value);
    Ok(())
}

#[test]
fn corrupt_string_payloads_are_rejected() -> flatwire::Result<()> {
    let (registry, table) = scalar_and_string_schema()?;
    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![None, Some("abc".into())]);
    let bytes = serializer.write(table, &value)?;

    let root = read_u32(&bytes, 0) as usize;
    let soffset = read_i32(&bytes, root);
    let vtable = (root as i64 - i64::from(soffset)) as usize;
    let name_cell = root + read_u16(&bytes, vtable + 6) as usize;
    let string_pos = name_cell + read_u32(&bytes, name_cell) as usize;

    // A wild length prefix fails the bounds check up front; nothing that
    // size is ever allocated for the copy.
    let mut oversized = bytes.clone();
    oversized[string_pos..string_pos + 4].copy_from_slice(&0x4000_0000u32.to_le_bytes());
    let err = serializer
        .parse(oversized.as_slice(), table)?
        .field(1)
        .unwrap_err();
    assert!(matches!(err, FlatwireError::OutOfBounds { .. }), "{err}");

    // Non-UTF-8 payload bytes are a type mismatch, not a panic.
    let mut garbled = bytes.clone();
    garbled[string_pos + 4..string_pos + 7].copy_from_slice(&[0xFF, 0xFE, 0xFF]);
    let err = serializer
        .parse(garbled.as_slice(), table)?
        .field(1)
        .unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");
    Ok(())
}

#[test]
fn parses_from_a_memory_mapped_file() -> flatwire::Result<()> {
    let (registry, table) = scalar_and_string_schema()?;
    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![Some(42i32.into()), Some("abc".into())]);
    let bytes = serializer.write(table, &value)?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("creature.bin");
    std::fs::write(&path, &bytes)?;

    let mapped = MappedBuffer::open(&path)?;
    let parsed = serializer.parse(&mapped, table)?;
    assert_eq!(parsed.materialize()?, value);
    Ok(())
}
