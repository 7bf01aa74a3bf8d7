//! End-to-end round-trips: write a value graph, parse it back under every
//! strategy, and compare semantic equality.

use flatwire::{
    DeserializationMode, FieldDef, FlatwireError, LazyValue, ScalarKind, ScalarValue, Serializer,
    SerializerOptions, TypeHandle, TypeRegistry, Value,
};

struct Schema {
    registry: TypeRegistry,
    monster: TypeHandle,
}

/// A game-flavored schema touching every type family: scalars with
/// defaults, strings, an inline struct, byte and table vectors, a union.
fn monster_schema() -> flatwire::Result<Schema> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let i16_ty = registry.scalar(ScalarKind::I16);
    let u8_ty = registry.scalar(ScalarKind::U8);
    let f32_ty = registry.scalar(ScalarKind::F32);
    let str_ty = registry.string();

    let vec3 = registry.struct_type(vec![
        ("x".into(), f32_ty),
        ("y".into(), f32_ty),
        ("z".into(), f32_ty),
    ])?;
    let weapon = registry.table(vec![
        FieldDef::new("damage", i16_ty),
        FieldDef::new("name", str_ty),
    ])?;
    let equipped = registry.union_type(vec![weapon])?;
    let inventory = registry.vector(u8_ty);
    let weapons = registry.vector(weapon);

    let monster = registry.table(vec![
        FieldDef::new("hp", i32_ty).with_default(ScalarValue::I32(100)),
        FieldDef::new("name", str_ty),
        FieldDef::new("pos", vec3),
        FieldDef::new("inventory", inventory),
        FieldDef::new("weapons", weapons),
        FieldDef::new("equipped", equipped),
    ])?;

    Ok(Schema { registry, monster })
}

fn sword() -> Value {
    Value::Table(vec![Some(12i16.into()), Some("sword".into())])
}

fn axe() -> Value {
    Value::Table(vec![Some(30i16.into()), Some("axe".into())])
}

fn full_monster() -> Value {
    Value::Table(vec![
        Some(80i32.into()),
        Some("orc".into()),
        Some(Value::Struct(vec![
            1.0f32.into(),
            2.0f32.into(),
            3.0f32.into(),
        ])),
        Some(Value::Vector(vec![1u8.into(), 2u8.into(), 3u8.into()])),
        Some(Value::Vector(vec![sword(), axe()])),
        Some(Value::Union(Some((1, Box::new(sword()))))),
    ])
}

const ALL_MODES: [DeserializationMode; 6] = [
    DeserializationMode::Lazy,
    DeserializationMode::PropertyCache,
    DeserializationMode::Greedy,
    DeserializationMode::GreedyMutable,
    DeserializationMode::VectorCache,
    DeserializationMode::VectorCacheMutable,
];

#[test]
fn roundtrip_under_every_strategy() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let value = full_monster();

    for mode in ALL_MODES {
        let serializer =
            Serializer::with_options(&schema.registry, SerializerOptions::new(mode));
        let bytes = serializer.write(schema.monster, &value)?;
        let parsed = serializer.parse(bytes.as_slice(), schema.monster)?;
        assert_eq!(parsed.materialize()?, value, "mode {mode:?}");
    }
    Ok(())
}

#[test]
fn every_scalar_kind_roundtrips() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let kinds = [
        ScalarKind::Bool,
        ScalarKind::U8,
        ScalarKind::I8,
        ScalarKind::U16,
        ScalarKind::I16,
        ScalarKind::U32,
        ScalarKind::I32,
        ScalarKind::U64,
        ScalarKind::I64,
        ScalarKind::F32,
        ScalarKind::F64,
    ];
    let fields = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| FieldDef::new(format!("f{i}"), registry.scalar(*kind)))
        .collect();
    let table = registry.table(fields)?;

    let value = Value::Table(vec![
        Some(true.into()),
        Some(0xABu8.into()),
        Some((-5i8).into()),
        Some(0x1234u16.into()),
        Some((-2i16).into()),
        Some(0xDEAD_BEEFu32.into()),
        Some((-3i32).into()),
        Some(u64::MAX.into()),
        Some(i64::MIN.into()),
        Some(1.5f32.into()),
        Some((-2.75f64).into()),
    ]);

    let serializer = Serializer::new(&registry);
    let bytes = serializer.write(table, &value)?;
    let parsed = serializer.parse(bytes.as_slice(), table)?;
    assert_eq!(parsed.materialize()?, value);

    // Multi-byte scalars land little-endian.
    assert!(bytes.windows(2).any(|w| w == [0x34, 0x12]));
    assert!(bytes.windows(4).any(|w| w == 0xDEAD_BEEFu32.to_le_bytes()));
    Ok(())
}

#[test]
fn absent_scalar_reads_back_as_its_default() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let serializer = Serializer::new(&schema.registry);

    let mut value = full_monster();
    if let Some(fields) = value.as_table_mut() {
        fields[0] = None; // omit hp
    }
    let bytes = serializer.write(schema.monster, &value)?;
    let parsed = serializer.parse(bytes.as_slice(), schema.monster)?;
    assert_eq!(parsed.field(0)?, Some(100i32.into()));

    // Omitting the field also drops its body bytes.
    let full = serializer.write(schema.monster, &full_monster())?;
    assert!(bytes.len() < full.len());
    Ok(())
}

#[test]
fn reserializing_a_parsed_graph_is_equivalent() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let greedy = Serializer::with_options(
        &schema.registry,
        SerializerOptions::new(DeserializationMode::Greedy),
    );
    let value = full_monster();

    let bytes = greedy.write(schema.monster, &value)?;
    let first = greedy.parse(bytes.as_slice(), schema.monster)?.materialize()?;
    let bytes2 = greedy.write(schema.monster, &first)?;
    let second = greedy.parse(bytes2.as_slice(), schema.monster)?.materialize()?;
    assert_eq!(first, second);
    assert_eq!(second, value);
    Ok(())
}

#[test]
fn max_size_never_underestimates() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let serializer = Serializer::new(&schema.registry);

    for value in [
        full_monster(),
        Value::Table(vec![None, None, None, None, None, None]),
        Value::Table(vec![
            None,
            Some("x".repeat(1000).into()),
            None,
            Some(Value::Vector((0..255u8).map(Value::from).collect())),
            None,
            Some(Value::Union(None)),
        ]),
    ] {
        let bound = serializer.compute_max_size(schema.monster, &value)?;
        let bytes = serializer.write(schema.monster, &value)?;
        assert!(bytes.len() <= bound, "{} > {bound}", bytes.len());
    }
    Ok(())
}

#[test]
fn self_referential_schema_via_declare_then_define() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let node = registry.declare();
    registry.define_table(
        node,
        vec![FieldDef::new("value", i32_ty), FieldDef::new("next", node)],
    )?;

    // value: 1 -> 2 -> 3
    let list = Value::Table(vec![
        Some(1i32.into()),
        Some(Value::Table(vec![
            Some(2i32.into()),
            Some(Value::Table(vec![Some(3i32.into()), None])),
        ])),
    ]);

    let serializer = Serializer::new(&registry);
    let bytes = serializer.write(node, &list)?;
    let parsed = serializer.parse(bytes.as_slice(), node)?;

    let view = match parsed.as_view() {
        Some(view) => view.clone(),
        None => panic!("lazy parse must return a view"),
    };
    let mut current = view;
    let mut values = Vec::new();
    loop {
        match current.field_by_name("value")? {
            Some(LazyValue::Scalar(ScalarValue::I32(v))) => values.push(v),
            other => panic!("unexpected value field: {other:?}"),
        }
        match current.field_by_name("next")? {
            Some(LazyValue::Table(next)) => current = next,
            None => break,
            other => panic!("unexpected next field: {other:?}"),
        }
    }
    assert_eq!(values, [1, 2, 3]);
    Ok(())
}

#[test]
fn union_none_state_roundtrips() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let serializer = Serializer::new(&schema.registry);

    let mut value = full_monster();
    if let Some(fields) = value.as_table_mut() {
        fields[5] = Some(Value::Union(None));
    }
    let bytes = serializer.write(schema.monster, &value)?;
    let parsed = serializer.parse(bytes.as_slice(), schema.monster)?;
    assert_eq!(parsed.field(5)?, Some(Value::Union(None)));
    Ok(())
}

#[test]
fn vectors_of_structs_stay_inline() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let f32_ty = registry.scalar(ScalarKind::F32);
    let vec3 = registry.struct_type(vec![
        ("x".into(), f32_ty),
        ("y".into(), f32_ty),
        ("z".into(), f32_ty),
    ])?;
    let points = registry.vector(vec3);
    let path = registry.table(vec![FieldDef::new("points", points)])?;

    let point = |x: f32| Value::Struct(vec![x.into(), (x + 1.0).into(), (x + 2.0).into()]);
    let value = Value::Table(vec![Some(Value::Vector(vec![
        point(0.0),
        point(10.0),
        point(20.0),
    ]))]);

    let serializer = Serializer::new(&registry);
    let bytes = serializer.write(path, &value)?;
    let parsed = serializer.parse(bytes.as_slice(), path)?;
    assert_eq!(parsed.materialize()?, value);
    Ok(())
}

#[test]
fn devirtualization_changes_no_observable_result() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let value = full_monster();

    for mode in ALL_MODES {
        let fast = Serializer::with_options(&schema.registry, SerializerOptions::new(mode));
        let slow = Serializer::with_options(
            &schema.registry,
            SerializerOptions::new(mode).without_devirtualization(),
        );
        let bytes = fast.write(schema.monster, &value)?;
        assert_eq!(bytes, slow.write(schema.monster, &value)?);

        let a = fast.parse(bytes.as_slice(), schema.monster)?.materialize()?;
        let b = slow.parse(bytes.as_slice(), schema.monster)?.materialize()?;
        assert_eq!(a, b, "mode {mode:?}");
    }
    Ok(())
}

#[test]
fn write_rejects_mismatched_values() -> flatwire::Result<()> {
    let schema = monster_schema()?;
    let serializer = Serializer::new(&schema.registry);

    // Wrong arity.
    let err = serializer
        .write(schema.monster, &Value::Table(vec![None]))
        .unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // Wrong scalar kind in a declared i32 field.
    let mut value = full_monster();
    if let Some(fields) = value.as_table_mut() {
        fields[0] = Some(80i16.into());
    }
    let err = serializer.write(schema.monster, &value).unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // Non-table root.
    let err = serializer.write(schema.monster, &Value::str("nope")).unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // Union discriminant outside the member set.
    let mut value = full_monster();
    if let Some(fields) = value.as_table_mut() {
        fields[5] = Some(Value::Union(Some((2, Box::new(sword())))));
    }
    let err = serializer.write(schema.monster, &value).unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");
    Ok(())
}

#[test]
fn struct_members_must_be_fixed_size() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let str_ty = registry.string();
    let err = registry
        .struct_type(vec![("name".into(), str_ty)])
        .unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");
    Ok(())
}

#[test]
fn defaults_are_validated_at_definition_time() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let str_ty = registry.string();

    // Default kind must match the declared field kind.
    let err = registry
        .table(vec![
            FieldDef::new("hp", i32_ty).with_default(ScalarValue::I16(5))
        ])
        .unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // Non-scalar fields cannot carry a default at all.
    let err = registry
        .table(vec![
            FieldDef::new("name", str_ty).with_default(ScalarValue::I32(0))
        ])
        .unwrap_err();
    assert!(matches!(err, FlatwireError::TypeMismatch(_)), "{err}");

    // A matching default still registers and applies.
    let table = registry.table(vec![
        FieldDef::new("hp", i32_ty).with_default(ScalarValue::I32(9))
    ])?;
    let serializer = Serializer::new(&registry);
    let bytes = serializer.write(table, &Value::Table(vec![None]))?;
    let parsed = serializer.parse(bytes.as_slice(), table)?;
    assert_eq!(parsed.field(0)?, Some(9i32.into()));
    Ok(())
}

#[test]
fn registry_misuse_is_an_assertion_violation() -> flatwire::Result<()> {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);

    // Defining the same handle twice.
    let node = registry.declare();
    registry.define_table(node, vec![FieldDef::new("value", i32_ty)])?;
    let err = registry
        .define_table(node, vec![FieldDef::new("value", i32_ty)])
        .unwrap_err();
    assert!(matches!(err, FlatwireError::AssertionViolation(_)), "{err}");

    // Writing through a declared-but-undefined handle.
    let orphan = registry.declare();
    let parent = registry.table(vec![FieldDef::new("child", orphan)])?;
    let serializer = Serializer::new(&registry);
    let value = Value::Table(vec![Some(Value::Table(vec![]))]);
    let err = serializer.write(parent, &value).unwrap_err();
    assert!(matches!(err, FlatwireError::AssertionViolation(_)), "{err}");
    Ok(())
}
