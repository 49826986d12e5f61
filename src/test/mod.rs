use crate::{
    metadata::{
        builder::{MetadataBuilder, TypeDefBuilder},
        flags::{FieldAttributes, GenericParamAttributes, MethodAttributes},
        signatures::{MemberSig, MethodSig, TypeSig},
        token::Token,
    },
    typesystem::{ClassId, ImageId, TypeSystem},
    LoaderConfig,
};

/// A type system with only the minimal core library loaded
pub fn corlib_system() -> (TypeSystem, ImageId) {
    let ts = TypeSystem::new(LoaderConfig::testing());
    let corlib = ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    (ts, corlib)
}

/// Loads the core library and then the image built by `app`
pub fn app_with_corlib(app: MetadataBuilder) -> (TypeSystem, ImageId) {
    let (ts, _) = corlib_system();
    let app = ts.load_metadata(app.build());
    (ts, app)
}

/// `App.Box[T]` with a `value` field, `Get`/`Set` accessors and a `Value` property, plus a
/// `MemberRef` to `Box[int32]::Get`
pub struct GenericFixture {
    pub ts: TypeSystem,
    pub app: ImageId,
    pub box_token: Token,
    pub box_def: ClassId,
    pub get_ref: Token,
}

pub fn generic_fixture() -> GenericFixture {
    let accessor = MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG;

    let mut b = MetadataBuilder::new("App");
    let corlib = b.add_assembly_ref("mscorlib");
    let object = b.reference_type(corlib, "System", "Object");

    let box_token = TypeDefBuilder::new()
        .namespace("App")
        .name("Box")
        .public_class()
        .extends(object)
        .build(&mut b);
    b.add_generic_param(box_token, 0, "T", GenericParamAttributes::empty(), vec![]);
    b.add_field("value", FieldAttributes::PRIVATE, TypeSig::Var(0));
    b.add_method(
        ".ctor",
        accessor | MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
        MethodSig::instance(TypeSig::Void, vec![]),
    );
    let get = b.add_method("Get", accessor, MethodSig::instance(TypeSig::Var(0), vec![]));
    let set = b.add_method(
        "Set",
        accessor,
        MethodSig::instance(TypeSig::Void, vec![TypeSig::Var(0)]),
    );
    b.add_property(box_token, "Value", Some(get), Some(set));

    let box_of_int = b.add_type_spec(TypeSig::GenericInst {
        definition: box_token,
        is_value_type: false,
        args: vec![TypeSig::I4],
    });
    let get_ref = b.add_member_ref(
        box_of_int,
        "Get",
        MemberSig::Method(MethodSig::instance(TypeSig::Var(0), vec![])),
    );

    let (ts, app) = app_with_corlib(b);
    let box_def = ts
        .resolve(app, box_token)
        .expect("App.Box resolves in the fixture image");

    GenericFixture {
        ts,
        app,
        box_token,
        box_def,
        get_ref,
    }
}
