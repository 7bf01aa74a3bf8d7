use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flatwire::{
    DeserializationMode, FieldDef, ScalarKind, Serializer, SerializerOptions, TypeHandle,
    TypeRegistry, Value,
};

fn schema() -> (TypeRegistry, TypeHandle) {
    let mut registry = TypeRegistry::new();
    let i32_ty = registry.scalar(ScalarKind::I32);
    let f64_ty = registry.scalar(ScalarKind::F64);
    let str_ty = registry.string();
    let samples = registry.vector(f64_ty);
    let record = registry
        .table(vec![
            FieldDef::new("id", i32_ty),
            FieldDef::new("label", str_ty),
            FieldDef::new("samples", samples),
        ])
        .expect("schema registration");
    let records = registry.vector(record);
    let batch = registry
        .table(vec![FieldDef::new("records", records)])
        .expect("schema registration");
    (registry, batch)
}

fn batch_value(records: usize, samples: usize) -> Value {
    let record = |id: i32| {
        Value::Table(vec![
            Some(id.into()),
            Some(format!("record-{id}").into()),
            Some(Value::Vector(
                (0..samples).map(|i| Value::from(i as f64 * 0.5)).collect(),
            )),
        ])
    };
    Value::Table(vec![Some(Value::Vector(
        (0..records as i32).map(record).collect(),
    ))])
}

fn bench_write(c: &mut Criterion) {
    let (registry, batch) = schema();
    let serializer = Serializer::new(&registry);
    let value = batch_value(100, 64);

    c.bench_function("write_100x64", |b| {
        b.iter(|| serializer.write(batch, black_box(&value)).expect("write"))
    });
}

fn bench_parse(c: &mut Criterion) {
    let (registry, batch) = schema();
    let lazy = Serializer::new(&registry);
    let greedy = Serializer::with_options(
        &registry,
        SerializerOptions::new(DeserializationMode::Greedy),
    );
    let bytes = lazy.write(batch, &batch_value(100, 64)).expect("write");

    c.bench_function("parse_lazy_first_field", |b| {
        b.iter(|| {
            let parsed = lazy.parse(black_box(bytes.as_slice()), batch).expect("parse");
            parsed.field(0).expect("field")
        })
    });

    c.bench_function("parse_greedy_materialize", |b| {
        b.iter(|| {
            greedy
                .parse(black_box(bytes.as_slice()), batch)
                .expect("parse")
                .materialize()
                .expect("materialize")
        })
    });
}

criterion_group!(benches, bench_write, bench_parse);
criterion_main!(benches);
