//! Integration tests for interface offsets and vtable construction over realistic class
//! hierarchies.

mod common;

use common::{app_image, interface_method, load, method, virtual_new, virtual_override};
use dotclass::{metadata::flags::GenericParamAttributes, prelude::*};

/// `IShape` implemented by `Shape`, overridden again in `Circle : Shape`
#[test]
fn test_interface_implementation_is_inherited_and_overridden() -> Result<()> {
    let (mut b, object, _) = app_image("Shapes");
    let ishape = TypeDefBuilder::new()
        .namespace("Shapes")
        .name("IShape")
        .public_interface()
        .build(&mut b);
    b.add_method("Area", interface_method(), MethodSig::instance(TypeSig::R8, vec![]));

    let shape = TypeDefBuilder::new()
        .namespace("Shapes")
        .name("Shape")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(shape, ishape);
    b.add_method("Area", virtual_new(), MethodSig::instance(TypeSig::R8, vec![]));

    let circle = TypeDefBuilder::new()
        .namespace("Shapes")
        .name("Circle")
        .public_class()
        .extends(shape)
        .build(&mut b);
    b.add_method("Area", virtual_override(), MethodSig::instance(TypeSig::R8, vec![]));

    let (ts, app) = load(LoaderConfig::testing(), b);
    let ishape = ts.resolve(app, ishape)?;
    let shape = ts.resolve(app, shape)?;
    let circle = ts.resolve(app, circle)?;
    assert!(ts.init(circle));

    let shape_area = method(&ts, shape, "Area")?;
    let circle_area = method(&ts, circle, "Area")?;

    assert_eq!(ts.interface_offset(shape, ishape), Some(4));
    assert_eq!(ts.interface_offset(circle, ishape), Some(4));
    assert_eq!(ts.vtable_method(shape, 4)?, Some(shape_area));
    assert_eq!(ts.vtable_method(circle, 4)?, Some(circle_area));
    assert_eq!(ts.class(circle).unwrap().vtable_size(), Some(5));

    assert!(ts.implements_interface(circle, ishape));
    assert!(ts.is_assignable_from(ishape, circle));
    Ok(())
}

/// `Derived : Base, IJob` re-implements `IJob` with its own `newslot` method; `Plain : Base,
/// IJob` re-declares the interface without one and falls back to `Base.Run`
#[test]
fn test_reimplemented_interface_gets_own_slots() -> Result<()> {
    let (mut b, object, _) = app_image("Jobs");
    let ijob = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("IJob")
        .public_interface()
        .build(&mut b);
    b.add_method("Run", interface_method(), MethodSig::instance(TypeSig::Void, vec![]));

    let sealed_new = virtual_new() | MethodAttributes::FINAL;
    let base = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("Base")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(base, ijob);
    b.add_method("Run", sealed_new, MethodSig::instance(TypeSig::Void, vec![]));

    let derived = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("Derived")
        .public_class()
        .extends(base)
        .build(&mut b);
    b.add_interface_impl(derived, ijob);
    b.add_method("Run", sealed_new, MethodSig::instance(TypeSig::Void, vec![]));

    let plain = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("Plain")
        .public_class()
        .extends(base)
        .build(&mut b);
    b.add_interface_impl(plain, ijob);

    let (ts, app) = load(LoaderConfig::testing(), b);
    let ijob = ts.resolve(app, ijob)?;
    let base = ts.resolve(app, base)?;
    let derived = ts.resolve(app, derived)?;
    let plain = ts.resolve(app, plain)?;
    ts.ensure_initialized(derived)?;
    ts.ensure_initialized(plain)?;

    let base_run = method(&ts, base, "Run")?;
    let derived_run = method(&ts, derived, "Run")?;

    assert_eq!(ts.interface_offset(base, ijob), Some(4));
    assert_eq!(ts.interface_offset(derived, ijob), Some(5));
    assert_eq!(ts.vtable_method(derived, 5)?, Some(derived_run));
    assert_eq!(ts.vtable_method(derived, 4)?, Some(base_run));
    assert_eq!(ts.method(derived_run).unwrap().slot(), Some(5));
    assert_eq!(ts.class(derived).unwrap().vtable_size(), Some(6));

    assert_eq!(ts.interface_offset(plain, ijob), Some(5));
    assert_eq!(ts.vtable_method(plain, 5)?, Some(base_run));
    Ok(())
}

/// `Logger` implements `ILog.Write` through an explicitly named private method
#[test]
fn test_explicit_implementation_by_name() -> Result<()> {
    let (mut b, object, _) = app_image("Logging");
    let ilog = TypeDefBuilder::new()
        .namespace("Logging")
        .name("ILog")
        .public_interface()
        .build(&mut b);
    b.add_method(
        "Write",
        interface_method(),
        MethodSig::instance(TypeSig::Void, vec![TypeSig::String]),
    );

    let logger = TypeDefBuilder::new()
        .namespace("Logging")
        .name("Logger")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(logger, ilog);
    b.add_method(
        "Logging.ILog.Write",
        MethodAttributes::PRIVATE
            | MethodAttributes::VIRTUAL
            | MethodAttributes::FINAL
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::NEW_SLOT,
        MethodSig::instance(TypeSig::Void, vec![TypeSig::String]),
    );

    let (ts, app) = load(LoaderConfig::testing(), b);
    let logger = ts.resolve(app, logger)?;
    let ilog = ts.resolve(app, ilog)?;
    ts.ensure_initialized(logger)?;

    let write = method(&ts, logger, "Logging.ILog.Write")?;
    let base = ts.interface_offset(logger, ilog).unwrap();
    assert_eq!(ts.vtable_method(logger, base)?, Some(write));
    assert_eq!(ts.method(write).unwrap().slot(), Some(base));
    Ok(())
}

/// `IntComparer : IComparer<int32>` matches the inflated interface signature
#[test]
fn test_generic_interface_instance() -> Result<()> {
    let (mut b, object, _) = app_image("Sorting");
    let icomparer = TypeDefBuilder::new()
        .namespace("Sorting")
        .name("IComparer")
        .public_interface()
        .build(&mut b);
    b.add_generic_param(icomparer, 0, "T", GenericParamAttributes::empty(), vec![]);
    b.add_method(
        "Compare",
        interface_method(),
        MethodSig::instance(TypeSig::I4, vec![TypeSig::Var(0), TypeSig::Var(0)]),
    );
    let comparer_of_int = b.add_type_spec(TypeSig::GenericInst {
        definition: icomparer,
        is_value_type: false,
        args: vec![TypeSig::I4],
    });

    let int_comparer = TypeDefBuilder::new()
        .namespace("Sorting")
        .name("IntComparer")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(int_comparer, comparer_of_int);
    b.add_method(
        "Compare",
        virtual_new(),
        MethodSig::instance(TypeSig::I4, vec![TypeSig::I4, TypeSig::I4]),
    );

    let (ts, app) = load(LoaderConfig::testing(), b);
    let int_comparer = ts.resolve(app, int_comparer)?;
    assert!(ts.init(int_comparer));

    let interface = ts.class_interfaces(int_comparer)?[0];
    let class = ts.class(interface).unwrap();
    assert_eq!(class.kind(), ClassKind::GenericInstance);
    assert!(class.is_interface());
    assert_eq!(class.vtable_size(), Some(1));

    let compare = method(&ts, int_comparer, "Compare")?;
    assert_eq!(ts.interface_offset(int_comparer, interface), Some(4));
    assert_eq!(ts.vtable_method(int_comparer, 4)?, Some(compare));
    Ok(())
}

/// An abstract class may leave interface methods unimplemented
#[test]
fn test_abstract_class_leaves_slot_empty() -> Result<()> {
    let (mut b, object, _) = app_image("Tasks");
    let irunnable = TypeDefBuilder::new()
        .namespace("Tasks")
        .name("IRunnable")
        .public_interface()
        .build(&mut b);
    b.add_method("Run", interface_method(), MethodSig::instance(TypeSig::Void, vec![]));

    let task = TypeDefBuilder::new()
        .namespace("Tasks")
        .name("TaskBase")
        .flags(TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(task, irunnable);

    let (ts, app) = load(LoaderConfig::testing(), b);
    let task = ts.resolve(app, task)?;
    assert!(ts.init(task));
    assert_eq!(ts.vtable_method(task, 4)?, None);
    assert_eq!(ts.class(task).unwrap().vtable_size(), Some(5));
    Ok(())
}

/// A `newslot` method hides the inherited one instead of overriding it
#[test]
fn test_new_slot_hides_inherited_method() -> Result<()> {
    let (mut b, object, _) = app_image("App");
    let quiet = TypeDefBuilder::new()
        .namespace("App")
        .name("Quiet")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_method("ToString", virtual_new(), MethodSig::instance(TypeSig::String, vec![]));

    let (ts, app) = load(LoaderConfig::testing(), b);
    let quiet = ts.resolve(app, quiet)?;
    let object = ts.well_known(WellKnownClass::Object)?;
    assert!(ts.init(quiet));

    let hidden = method(&ts, object, "ToString")?;
    let hiding = method(&ts, quiet, "ToString")?;
    assert_eq!(ts.vtable_method(quiet, 3)?, Some(hidden));
    assert_eq!(ts.vtable_method(quiet, 4)?, Some(hiding));
    Ok(())
}

/// Members of generic instantiations dispatch through inflated methods in the same slots
#[test]
fn test_generic_class_instance_vtable() -> Result<()> {
    let (mut b, object, _) = app_image("App");
    let holder = TypeDefBuilder::new()
        .namespace("App")
        .name("Holder")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_generic_param(holder, 0, "T", GenericParamAttributes::empty(), vec![]);
    b.add_method("Take", virtual_new(), MethodSig::instance(TypeSig::Var(0), vec![]));

    let (ts, app) = load(LoaderConfig::testing(), b);
    let holder = ts.resolve(app, holder)?;
    let string = ts.intern(RuntimeType::String);
    let strings = ts.instantiate(holder, &[string])?;
    assert!(ts.init(strings));

    let take = method(&ts, strings, "Take")?;
    assert_ne!(take, method(&ts, holder, "Take")?);
    assert_eq!(ts.vtable_method(strings, 4)?, Some(take));
    assert_eq!(
        ts.class(strings).unwrap().vtable_size(),
        ts.class(holder).unwrap().vtable_size()
    );
    Ok(())
}

/// A `MethodImpl` row wins over a public method with the interface method's name
#[test]
fn test_method_impl_beats_implicit_match() -> Result<()> {
    let (mut b, object, _) = app_image("Jobs");
    let ijob = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("IJob")
        .public_interface()
        .build(&mut b);
    let run = b.add_method("Run", interface_method(), MethodSig::instance(TypeSig::Void, vec![]));

    let job = TypeDefBuilder::new()
        .namespace("Jobs")
        .name("Job")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_interface_impl(job, ijob);
    b.add_method("Run", virtual_new(), MethodSig::instance(TypeSig::Void, vec![]));
    let execute = b.add_method(
        "Execute",
        MethodAttributes::PRIVATE
            | MethodAttributes::VIRTUAL
            | MethodAttributes::FINAL
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::NEW_SLOT,
        MethodSig::instance(TypeSig::Void, vec![]),
    );
    b.add_method_impl(job, execute, run);

    let (ts, app) = load(LoaderConfig::testing(), b);
    let job = ts.resolve(app, job)?;
    let ijob = ts.resolve(app, ijob)?;
    assert!(ts.init(job));

    let base = ts.interface_offset(job, ijob).unwrap();
    assert_eq!(ts.vtable_method(job, base)?, Some(method(&ts, job, "Execute")?));
    assert_eq!(ts.class_overrides(job)?.len(), 1);
    Ok(())
}

/// Array classes add no virtual methods and share `System.Array`'s vtable
#[test]
fn test_array_class_shares_vtable() -> Result<()> {
    let (b, _, _) = app_image("App");
    let (ts, _) = load(LoaderConfig::testing(), b);
    let int32 = ts.well_known(WellKnownClass::Int32)?;
    let vector = ts.array_class(int32, 1)?;
    let array = ts.well_known(WellKnownClass::Array)?;
    assert!(ts.init(vector));

    let parent = ts.ensure_vtable(array)?.clone();
    assert!(std::sync::Arc::ptr_eq(&parent, ts.ensure_vtable(vector)?));
    assert_eq!(ts.array_class(int32, 1)?, vector);
    Ok(())
}
