//! Shared helpers for the integration tests.

#![allow(dead_code)]

use dotclass::prelude::*;

/// Flags of a virtual method introducing a new slot
pub fn virtual_new() -> MethodAttributes {
    MethodAttributes::PUBLIC
        | MethodAttributes::VIRTUAL
        | MethodAttributes::HIDE_BY_SIG
        | MethodAttributes::NEW_SLOT
}

/// Flags of a virtual method reusing the slot it overrides
pub fn virtual_override() -> MethodAttributes {
    MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG
}

/// Flags of an interface method
pub fn interface_method() -> MethodAttributes {
    virtual_new() | MethodAttributes::ABSTRACT
}

/// A fresh image named `name` with an `mscorlib` reference; returns the builder and the
/// `TypeRef` tokens of `System.Object` and `System.ValueType`
pub fn app_image(name: &str) -> (MetadataBuilder, Token, Token) {
    let mut b = MetadataBuilder::new(name);
    let corlib = b.add_assembly_ref("mscorlib");
    let object = b.reference_type(corlib, "System", "Object");
    let value_type = b.reference_type(corlib, "System", "ValueType");
    (b, object, value_type)
}

/// Loads the core library and `app` into a type system configured with `config`
pub fn load(config: LoaderConfig, app: MetadataBuilder) -> (TypeSystem, ImageId) {
    let ts = TypeSystem::new(config);
    ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
    let app = ts.load_metadata(app.build());
    (ts, app)
}

/// The method named `name` declared by `class`
pub fn method(ts: &TypeSystem, class: ClassId, name: &str) -> Result<MethodId> {
    ts.method_from_name(class, name, None)?
        .ok_or_else(|| Error::TypeNameNotFound {
            namespace: ts.class_name(class),
            name: name.to_string(),
        })
}

/// Offsets of the fields of `class` in declaration order
pub fn field_offsets(ts: &TypeSystem, class: ClassId) -> Result<Vec<Option<u32>>> {
    let count = ts.class_fields(class)?.len();
    (0..count)
        .map(|index| {
            ts.field_offset(FieldId {
                class,
                index: index as u32,
            })
        })
        .collect()
}
