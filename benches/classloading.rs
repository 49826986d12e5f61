//! Benchmarks for class loading.
//!
//! Measures the cost of the main loader paths on synthetic images:
//! - resolving and initializing a deep class hierarchy
//! - generic instantiation, cold and cached
//! - parallel `load_all` over a wide image

extern crate dotclass;

use criterion::{criterion_group, criterion_main, Criterion};
use dotclass::prelude::*;
use std::hint::black_box;

fn virtual_new() -> MethodAttributes {
    MethodAttributes::PUBLIC
        | MethodAttributes::VIRTUAL
        | MethodAttributes::HIDE_BY_SIG
        | MethodAttributes::NEW_SLOT
}

/// `count` classes; each derives from the previous one when `chained` is set
fn image(count: usize, chained: bool) -> (MetadataBuilder, Vec<Token>) {
    let mut b = MetadataBuilder::new("Bench");
    let corlib = b.add_assembly_ref("mscorlib");
    let object = b.reference_type(corlib, "System", "Object");

    let mut parent = object;
    let mut tokens = Vec::with_capacity(count);
    for index in 0..count {
        let token = TypeDefBuilder::new()
            .namespace("Bench")
            .name(format!("Type{index}"))
            .public_class()
            .extends(parent)
            .build(&mut b);
        b.add_field(format!("a{index}"), FieldAttributes::PUBLIC, TypeSig::I4);
        b.add_field(format!("b{index}"), FieldAttributes::PUBLIC, TypeSig::Object);
        b.add_method(
            format!("Run{index}"),
            virtual_new(),
            MethodSig::instance(TypeSig::Void, vec![]),
        );
        b.add_method(
            "ToString",
            MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG,
            MethodSig::instance(TypeSig::String, vec![]),
        );
        tokens.push(token);
        if chained {
            parent = token;
        }
    }
    (b, tokens)
}

fn fresh_system(app: &MetadataBuilder) -> (TypeSystem, ImageId) {
    let ts = TypeSystem::new(LoaderConfig::default());
    ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    let app = ts.load_metadata(app.clone().build());
    (ts, app)
}

fn bench_deep_hierarchy(c: &mut Criterion) {
    let (b, tokens) = image(64, true);
    let deepest = tokens[tokens.len() - 1];

    c.bench_function("init_deep_hierarchy_64", |bench| {
        bench.iter(|| {
            let (ts, app) = fresh_system(&b);
            let class = ts.resolve(app, black_box(deepest)).unwrap();
            assert!(ts.init(class));
            black_box(ts.class(class).unwrap().vtable_size())
        });
    });
}

fn bench_generic_instantiation(c: &mut Criterion) {
    let (ts, corlib) = fresh_system(&MetadataBuilder::new("Empty"));
    let int32 = ts.class_from_name(corlib, "System", "Int32").unwrap();
    let array = ts.array_class(int32, 1).unwrap();
    let element = ts.class(array).unwrap().byval().unwrap();

    c.bench_function("array_class_cached", |bench| {
        bench.iter(|| black_box(ts.array_class(black_box(int32), 1).unwrap()));
    });

    c.bench_function("inflate_type_nested", |bench| {
        let var = ts.intern(RuntimeType::Var(GenericParam {
            owner: GenericOwner::Unbound,
            number: 0,
        }));
        let nested = ts.intern(RuntimeType::SzArray(ts.intern(RuntimeType::SzArray(var))));
        let context = GenericContext::for_class(ts.types().intern_inst(&[element]));
        bench.iter(|| black_box(ts.inflate_type(black_box(nested), &context)));
    });
}

fn bench_load_all(c: &mut Criterion) {
    let (b, _) = image(256, false);

    c.bench_function("load_all_wide_256", |bench| {
        bench.iter(|| {
            let (ts, app) = fresh_system(&b);
            black_box(ts.load_all(app).unwrap().len())
        });
    });
}

criterion_group!(
    benches,
    bench_deep_hierarchy,
    bench_generic_instantiation,
    bench_load_all
);
criterion_main!(benches);
