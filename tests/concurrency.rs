//! Concurrent loading from many threads observes one descriptor per class and fully
//! initialized state.

mod common;

use std::{sync::Arc, thread};

use common::{app_image, virtual_new};
use dotclass::{metadata::flags::GenericParamAttributes, prelude::*};

fn hierarchy(depth: usize) -> (MetadataBuilder, Vec<Token>) {
    let (mut b, object, _) = app_image("Deep");
    let mut parent = object;
    let mut tokens = Vec::with_capacity(depth);
    for level in 0..depth {
        let token = TypeDefBuilder::new()
            .namespace("Deep")
            .name(format!("Level{level}"))
            .public_class()
            .extends(parent)
            .build(&mut b);
        b.add_field(format!("f{level}"), FieldAttributes::PUBLIC, TypeSig::I8);
        b.add_method(
            format!("M{level}"),
            virtual_new(),
            MethodSig::instance(TypeSig::Void, vec![]),
        );
        tokens.push(token);
        parent = token;
    }
    (b, tokens)
}

/// `Chain.L0[T] : Object` and `Chain.L{n}[T] : Chain.L{n-1}[T]`
fn generic_chain(depth: usize) -> (MetadataBuilder, Vec<Token>) {
    let (mut b, object, _) = app_image("Chain");
    let mut parent = object;
    let mut tokens = Vec::with_capacity(depth);
    for level in 0..depth {
        let token = TypeDefBuilder::new()
            .namespace("Chain")
            .name(format!("L{level}"))
            .public_class()
            .extends(parent)
            .build(&mut b);
        b.add_generic_param(token, 0, "T", GenericParamAttributes::empty(), vec![]);
        b.add_field(format!("f{level}"), FieldAttributes::PUBLIC, TypeSig::Var(0));
        parent = b.add_type_spec(TypeSig::GenericInst {
            definition: token,
            is_value_type: false,
            args: vec![TypeSig::Var(0)],
        });
        tokens.push(token);
    }
    (b, tokens)
}

#[test]
fn test_parallel_init_agrees() -> Result<()> {
    let (b, tokens) = hierarchy(12);
    let ts = Arc::new(TypeSystem::new(LoaderConfig::testing()));
    ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    let app = ts.load_metadata(b.build());
    let tokens = Arc::new(tokens);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let ts = Arc::clone(&ts);
            let tokens = Arc::clone(&tokens);
            thread::spawn(move || -> Result<Vec<(ClassId, u32, u32)>> {
                let mut seen = Vec::new();
                for index in 0..tokens.len() {
                    let token = tokens[(index + worker) % tokens.len()];
                    let class = ts.resolve(app, token)?;
                    ts.ensure_initialized(class)?;
                    let descriptor = ts.class(class).unwrap();
                    seen.push((
                        class,
                        descriptor.instance_size().unwrap(),
                        descriptor.vtable_size().unwrap(),
                    ));
                }
                seen.sort();
                Ok(seen)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .collect::<Result<_>>()?;
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }

    let deepest = ts.resolve(app, tokens[11])?;
    assert_eq!(ts.instance_size(deepest)?, 16 + 12 * 8);
    assert_eq!(ts.class(deepest).unwrap().vtable_size(), Some(4 + 12));
    assert_eq!(ts.stats().vtables_built, ts.stats().inits_completed);
    Ok(())
}

#[test]
fn test_parallel_instantiation_is_canonical() -> Result<()> {
    let ts = Arc::new(TypeSystem::new(LoaderConfig::testing()));
    let corlib = ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    let int32 = ts.class_from_name(corlib, "System", "Int32")?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ts = Arc::clone(&ts);
            thread::spawn(move || ts.array_class(int32, 2))
        })
        .collect();
    let arrays: Vec<ClassId> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .collect::<Result<_>>()?;

    assert!(arrays.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(ts.class(arrays[0]).unwrap().rank(), 2);
    Ok(())
}

#[test]
fn test_parallel_generic_instantiation_is_linked() -> Result<()> {
    let (b, tokens) = generic_chain(12);
    let ts = Arc::new(TypeSystem::new(LoaderConfig::testing()));
    ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    let app = ts.load_metadata(b.build());
    let deepest = ts.resolve(app, tokens[11])?;

    let int32 = ts.intern(RuntimeType::I4);
    let args: Arc<Vec<TypeId>> = Arc::new(
        (1..=48)
            .map(|rank| ts.intern(RuntimeType::Array { element: int32, rank }))
            .collect(),
    );

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let ts = Arc::clone(&ts);
            let args = Arc::clone(&args);
            thread::spawn(move || -> Result<Vec<ClassId>> {
                let mut seen = vec![None; args.len()];
                for index in 0..args.len() {
                    let slot = (index * 7 + worker * 5) % args.len();
                    let class = ts.instantiate(deepest, &[args[slot]])?;
                    let descriptor = ts.class(class).unwrap();
                    assert!(descriptor.is_settled());
                    assert!(descriptor.parent().is_some());
                    assert_eq!(descriptor.supertypes().len(), 13);
                    seen[slot] = Some(class);
                }
                Ok(seen.into_iter().flatten().collect())
            })
        })
        .collect();

    let results: Vec<Vec<ClassId>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .collect::<Result<_>>()?;
    for result in &results {
        assert_eq!(result.len(), args.len());
        assert_eq!(result, &results[0]);
    }

    let first = ts.class(results[0][0]).unwrap();
    let parent = ts.class(first.parent().unwrap()).unwrap();
    assert_eq!(parent.generic_class().unwrap().definition, ts.resolve(app, tokens[10])?);
    Ok(())
}
