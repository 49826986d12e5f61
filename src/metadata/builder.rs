//! In-memory metadata images.
//!
//! [`MetadataBuilder`] assembles metadata rows in memory and produces an
//! [`InMemoryMetadata`] image implementing [`MetadataReader`]. It is used by hosts that
//! synthesize types at runtime and by the test-suite. [`MetadataBuilder::core_library`]
//! creates a minimal core library with the well-known `System` types the loader depends on.
//!
//! Fields and methods always belong to the most recently added type definition, matching the
//! contiguous `FieldList`/`MethodList` ranges of ECMA-335.
//!
//! # Examples
//!
//! ```rust
//! use dotclass::metadata::builder::{MetadataBuilder, TypeDefBuilder};
//! use dotclass::metadata::flags::{FieldAttributes, TypeAttributes};
//! use dotclass::metadata::signatures::TypeSig;
//!
//! let mut builder = MetadataBuilder::new("App");
//! let corlib = builder.add_assembly_ref("mscorlib");
//! let object = builder.reference_type(corlib, "System", "Object");
//!
//! let point = TypeDefBuilder::new()
//!     .namespace("Geometry")
//!     .name("Point")
//!     .public_class()
//!     .extends(object)
//!     .build(&mut builder);
//! builder.add_field("x", FieldAttributes::PUBLIC, TypeSig::I4);
//! builder.add_field("y", FieldAttributes::PUBLIC, TypeSig::I4);
//!
//! let image = builder.build();
//! assert_eq!(image.type_count(), 1);
//! # let _ = point;
//! ```

use crate::metadata::{
    flags::{
        FieldAttributes, GenericParamAttributes, MethodAttributes, MethodImplAttributes,
        TypeAttributes,
    },
    reader::MetadataReader,
    rows::{
        AssemblyRefRow, ClassLayoutRow, EventRow, FieldRow, GenericParamRow, MemberRefRow,
        MethodDefRow, MethodImplRow, ModuleRefRow, PropertyRow, ResolutionScope, TypeDefRow,
        TypeRefRow,
    },
    signatures::{MemberSig, MethodSig, TypeSig},
    token::{table, Token},
};

/// Builder for `TypeDef` rows.
///
/// ```rust
/// use dotclass::metadata::builder::{MetadataBuilder, TypeDefBuilder};
///
/// let mut builder = MetadataBuilder::new("App");
/// let token = TypeDefBuilder::new()
///     .namespace("App")
///     .name("IRunnable")
///     .public_interface()
///     .build(&mut builder);
/// assert_eq!(token.row(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeDefBuilder {
    name: Option<String>,
    namespace: Option<String>,
    extends: Option<Token>,
    flags: Option<TypeAttributes>,
}

impl TypeDefBuilder {
    /// Creates a new `TypeDefBuilder`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simple name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the namespace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the base type
    #[must_use]
    pub fn extends(mut self, extends: Token) -> Self {
        self.extends = Some(extends);
        self
    }

    /// Sets the raw type attributes
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Public, auto-layout class
    #[must_use]
    pub fn public_class(mut self) -> Self {
        self.flags = Some(TypeAttributes::PUBLIC | TypeAttributes::BEFORE_FIELD_INIT);
        self
    }

    /// Public interface
    #[must_use]
    pub fn public_interface(mut self) -> Self {
        self.flags = Some(
            TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        );
        self
    }

    /// Public, sealed, sequential-layout value type
    #[must_use]
    pub fn public_value_type(mut self) -> Self {
        self.flags = Some(
            TypeAttributes::PUBLIC
                | TypeAttributes::SEQUENTIAL_LAYOUT
                | TypeAttributes::SEALED
                | TypeAttributes::BEFORE_FIELD_INIT,
        );
        self
    }

    /// Adds the row to `builder` and returns its `TypeDef` token
    pub fn build(self, builder: &mut MetadataBuilder) -> Token {
        builder.push_type_def(TypeDefRow {
            flags: self.flags.unwrap_or(TypeAttributes::PUBLIC),
            name: self.name.unwrap_or_default(),
            namespace: self.namespace.unwrap_or_default(),
            extends: self.extends.unwrap_or(Token(0)),
            field_list: 0,
            method_list: 0,
        })
    }
}

/// Accumulates metadata rows for one image
#[derive(Debug, Clone, Default)]
pub struct MetadataBuilder {
    name: String,
    type_defs: Vec<TypeDefRow>,
    type_refs: Vec<TypeRefRow>,
    type_specs: Vec<TypeSig>,
    fields: Vec<FieldRow>,
    methods: Vec<MethodDefRow>,
    member_refs: Vec<MemberRefRow>,
    interface_impls: Vec<(Token, Token)>,
    method_impls: Vec<MethodImplRow>,
    nested: Vec<(Token, Token)>,
    class_layouts: Vec<(Token, ClassLayoutRow)>,
    generic_params: Vec<GenericParamRow>,
    properties: Vec<(Token, PropertyRow)>,
    events: Vec<(Token, EventRow)>,
    assembly_refs: Vec<AssemblyRefRow>,
    module_refs: Vec<ModuleRefRow>,
}

impl MetadataBuilder {
    /// Creates an empty image for the assembly `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        MetadataBuilder {
            name: name.into(),
            ..MetadataBuilder::default()
        }
    }

    fn push_type_def(&mut self, mut row: TypeDefRow) -> Token {
        row.field_list = self.fields.len() as u32 + 1;
        row.method_list = self.methods.len() as u32 + 1;
        self.type_defs.push(row);
        Token::from_parts(table::TYPE_DEF, self.type_defs.len() as u32)
    }

    /// Changes the base type of an existing type definition
    pub fn set_extends(&mut self, type_def: Token, extends: Token) {
        if let Some(row) = self.type_defs.get_mut(row_index(type_def)) {
            row.extends = extends;
        }
    }

    /// Adds a field to the most recently added type definition
    pub fn add_field(
        &mut self,
        name: impl Into<String>,
        flags: FieldAttributes,
        signature: TypeSig,
    ) -> Token {
        self.fields.push(FieldRow {
            flags,
            name: name.into(),
            signature,
            offset: None,
            rva: None,
            constant: None,
        });
        Token::from_parts(table::FIELD, self.fields.len() as u32)
    }

    /// Records an explicit field offset (`FieldLayout` row)
    pub fn set_field_offset(&mut self, field: Token, offset: u32) {
        if let Some(row) = self.fields.get_mut(row_index(field)) {
            row.offset = Some(offset);
        }
    }

    /// Records initial data for a field (`FieldRVA` row)
    pub fn set_field_rva(&mut self, field: Token, rva: u32) {
        if let Some(row) = self.fields.get_mut(row_index(field)) {
            row.flags |= FieldAttributes::HAS_FIELD_RVA;
            row.rva = Some(rva);
        }
    }

    /// Records a constant value for a field (`Constant` row)
    pub fn set_field_constant(&mut self, field: Token, value: Vec<u8>) {
        if let Some(row) = self.fields.get_mut(row_index(field)) {
            row.flags |= FieldAttributes::HAS_DEFAULT;
            row.constant = Some(value);
        }
    }

    /// Adds a method to the most recently added type definition
    pub fn add_method(
        &mut self,
        name: impl Into<String>,
        flags: MethodAttributes,
        signature: MethodSig,
    ) -> Token {
        self.methods.push(MethodDefRow {
            flags,
            impl_flags: MethodImplAttributes::empty(),
            name: name.into(),
            signature,
        });
        Token::from_parts(table::METHOD_DEF, self.methods.len() as u32)
    }

    /// Changes the implementation flags of a method
    pub fn set_method_impl_flags(&mut self, method: Token, impl_flags: MethodImplAttributes) {
        if let Some(row) = self.methods.get_mut(row_index(method)) {
            row.impl_flags = impl_flags;
        }
    }

    /// Adds an `AssemblyRef` row
    pub fn add_assembly_ref(&mut self, name: impl Into<String>) -> Token {
        self.assembly_refs.push(AssemblyRefRow { name: name.into() });
        Token::from_parts(table::ASSEMBLY_REF, self.assembly_refs.len() as u32)
    }

    /// Adds a `ModuleRef` row
    pub fn add_module_ref(&mut self, name: impl Into<String>) -> Token {
        self.module_refs.push(ModuleRefRow { name: name.into() });
        Token::from_parts(table::MODULE_REF, self.module_refs.len() as u32)
    }

    /// Adds a `TypeRef` row
    pub fn add_type_ref(
        &mut self,
        scope: ResolutionScope,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Token {
        self.type_refs.push(TypeRefRow {
            scope,
            name: name.into(),
            namespace: namespace.into(),
        });
        Token::from_parts(table::TYPE_REF, self.type_refs.len() as u32)
    }

    /// Adds a `TypeRef` to a type of the assembly referenced by `assembly`
    pub fn reference_type(
        &mut self,
        assembly: Token,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Token {
        self.add_type_ref(ResolutionScope::AssemblyRef(assembly.row()), namespace, name)
    }

    /// Adds a `TypeSpec` row
    pub fn add_type_spec(&mut self, signature: TypeSig) -> Token {
        self.type_specs.push(signature);
        Token::from_parts(table::TYPE_SPEC, self.type_specs.len() as u32)
    }

    /// Adds a `MemberRef` row
    pub fn add_member_ref(
        &mut self,
        parent: Token,
        name: impl Into<String>,
        signature: MemberSig,
    ) -> Token {
        self.member_refs.push(MemberRefRow {
            parent,
            name: name.into(),
            signature,
        });
        Token::from_parts(table::MEMBER_REF, self.member_refs.len() as u32)
    }

    /// Adds an `InterfaceImpl` row
    pub fn add_interface_impl(&mut self, class: Token, interface: Token) {
        self.interface_impls.push((class, interface));
    }

    /// Adds a `MethodImpl` row
    pub fn add_method_impl(&mut self, class: Token, body: Token, declaration: Token) {
        self.method_impls.push(MethodImplRow {
            class,
            body,
            declaration,
        });
    }

    /// Adds a `NestedClass` row
    pub fn add_nested(&mut self, enclosing: Token, nested: Token) {
        self.nested.push((nested, enclosing));
    }

    /// Adds a `ClassLayout` row
    pub fn set_class_layout(&mut self, class: Token, packing_size: u16, class_size: u32) {
        self.class_layouts.retain(|(owner, _)| *owner != class);
        self.class_layouts.push((
            class,
            ClassLayoutRow {
                packing_size,
                class_size,
            },
        ));
    }

    /// Adds a `GenericParam` row with its constraints
    pub fn add_generic_param(
        &mut self,
        owner: Token,
        number: u16,
        name: impl Into<String>,
        flags: GenericParamAttributes,
        constraints: Vec<Token>,
    ) {
        self.generic_params.push(GenericParamRow {
            number,
            flags,
            owner,
            name: name.into(),
            constraints,
        });
    }

    /// Adds a property with its accessors
    pub fn add_property(
        &mut self,
        class: Token,
        name: impl Into<String>,
        getter: Option<Token>,
        setter: Option<Token>,
    ) {
        self.properties.push((
            class,
            PropertyRow {
                name: name.into(),
                flags: 0,
                getter,
                setter,
            },
        ));
    }

    /// Adds an event with its accessors
    pub fn add_event(
        &mut self,
        class: Token,
        name: impl Into<String>,
        add: Option<Token>,
        remove: Option<Token>,
        raise: Option<Token>,
    ) {
        self.events.push((
            class,
            EventRow {
                name: name.into(),
                flags: 0,
                add,
                remove,
                raise,
            },
        ));
    }

    /// Finishes the image
    #[must_use]
    pub fn build(self) -> InMemoryMetadata {
        InMemoryMetadata { rows: self }
    }

    /// Creates a minimal core library named `name`.
    ///
    /// It defines `<Module>`, `System.Object` (with the virtual `Equals`, `Finalize`,
    /// `GetHashCode` and `ToString`), `System.ValueType`, `System.Enum`, every primitive value
    /// type, `System.String`, `System.Array`, `System.TypedReference`, `System.Delegate`,
    /// `System.MulticastDelegate`, `System.MarshalByRefObject` and
    /// `System.ContextBoundObject`. Callers may keep adding types before building.
    #[must_use]
    pub fn core_library(name: impl Into<String>) -> Self {
        let mut b = MetadataBuilder::new(name);
        let public_abstract =
            TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SERIALIZABLE;
        let virtual_new = MethodAttributes::PUBLIC
            | MethodAttributes::VIRTUAL
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::NEW_SLOT;
        let virtual_override =
            MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG;
        let ctor_flags = MethodAttributes::PUBLIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME
            | MethodAttributes::RT_SPECIAL_NAME;

        TypeDefBuilder::new()
            .name("<Module>")
            .flags(TypeAttributes::NOT_PUBLIC)
            .build(&mut b);

        let object = TypeDefBuilder::new()
            .namespace("System")
            .name("Object")
            .flags(TypeAttributes::PUBLIC | TypeAttributes::SERIALIZABLE)
            .build(&mut b);
        b.add_method(
            ".ctor",
            ctor_flags,
            MethodSig::instance(TypeSig::Void, vec![]),
        );
        b.add_method(
            "Equals",
            virtual_new,
            MethodSig::instance(TypeSig::Boolean, vec![TypeSig::Object]),
        );
        b.add_method(
            "Finalize",
            MethodAttributes::FAMILY
                | MethodAttributes::VIRTUAL
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::NEW_SLOT,
            MethodSig::instance(TypeSig::Void, vec![]),
        );
        b.add_method(
            "GetHashCode",
            virtual_new,
            MethodSig::instance(TypeSig::I4, vec![]),
        );
        b.add_method(
            "GetType",
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
            MethodSig::instance(TypeSig::Object, vec![]),
        );
        b.add_method(
            "ToString",
            virtual_new,
            MethodSig::instance(TypeSig::String, vec![]),
        );

        let value_type = TypeDefBuilder::new()
            .namespace("System")
            .name("ValueType")
            .flags(public_abstract)
            .extends(object)
            .build(&mut b);
        b.add_method(
            "Equals",
            virtual_override,
            MethodSig::instance(TypeSig::Boolean, vec![TypeSig::Object]),
        );
        b.add_method(
            "GetHashCode",
            virtual_override,
            MethodSig::instance(TypeSig::I4, vec![]),
        );
        b.add_method(
            "ToString",
            virtual_override,
            MethodSig::instance(TypeSig::String, vec![]),
        );

        TypeDefBuilder::new()
            .namespace("System")
            .name("Enum")
            .flags(public_abstract)
            .extends(value_type)
            .build(&mut b);

        let primitives = [
            ("Void", None),
            ("Boolean", Some(TypeSig::Boolean)),
            ("Char", Some(TypeSig::Char)),
            ("SByte", Some(TypeSig::I1)),
            ("Byte", Some(TypeSig::U1)),
            ("Int16", Some(TypeSig::I2)),
            ("UInt16", Some(TypeSig::U2)),
            ("Int32", Some(TypeSig::I4)),
            ("UInt32", Some(TypeSig::U4)),
            ("Int64", Some(TypeSig::I8)),
            ("UInt64", Some(TypeSig::U8)),
            ("Single", Some(TypeSig::R4)),
            ("Double", Some(TypeSig::R8)),
            ("IntPtr", Some(TypeSig::I)),
            ("UIntPtr", Some(TypeSig::U)),
        ];
        for (name, field) in primitives {
            TypeDefBuilder::new()
                .namespace("System")
                .name(name)
                .public_value_type()
                .extends(value_type)
                .build(&mut b);
            if let Some(sig) = field {
                b.add_field("m_value", FieldAttributes::PRIVATE, sig);
            }
        }

        let string = TypeDefBuilder::new()
            .namespace("System")
            .name("String")
            .flags(TypeAttributes::PUBLIC | TypeAttributes::SEALED | TypeAttributes::SERIALIZABLE)
            .extends(object)
            .build(&mut b);
        b.add_field("m_stringLength", FieldAttributes::PRIVATE, TypeSig::I4);
        b.add_field("m_firstChar", FieldAttributes::PRIVATE, TypeSig::Char);
        b.add_field(
            "Empty",
            FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::INIT_ONLY,
            TypeSig::String,
        );
        let string_length = b.add_method(
            "get_Length",
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::SPECIAL_NAME,
            MethodSig::instance(TypeSig::I4, vec![]),
        );
        b.add_method(
            "ToString",
            virtual_override,
            MethodSig::instance(TypeSig::String, vec![]),
        );
        b.add_property(string, "Length", Some(string_length), None);

        let array = TypeDefBuilder::new()
            .namespace("System")
            .name("Array")
            .flags(public_abstract)
            .extends(object)
            .build(&mut b);
        let array_length = b.add_method(
            "get_Length",
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::SPECIAL_NAME,
            MethodSig::instance(TypeSig::I4, vec![]),
        );
        b.add_method(
            "GetLength",
            MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
            MethodSig::instance(TypeSig::I4, vec![TypeSig::I4]),
        );
        b.add_property(array, "Length", Some(array_length), None);

        TypeDefBuilder::new()
            .namespace("System")
            .name("TypedReference")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("Value", FieldAttributes::PRIVATE, TypeSig::I);
        b.add_field("Type", FieldAttributes::PRIVATE, TypeSig::I);

        let delegate = TypeDefBuilder::new()
            .namespace("System")
            .name("Delegate")
            .flags(public_abstract)
            .extends(object)
            .build(&mut b);
        b.add_field("_target", FieldAttributes::PRIVATE, TypeSig::Object);
        b.add_field("_methodPtr", FieldAttributes::PRIVATE, TypeSig::I);

        TypeDefBuilder::new()
            .namespace("System")
            .name("MulticastDelegate")
            .flags(public_abstract)
            .extends(delegate)
            .build(&mut b);
        b.add_field("_invocationList", FieldAttributes::PRIVATE, TypeSig::Object);

        let marshal_by_ref = TypeDefBuilder::new()
            .namespace("System")
            .name("MarshalByRefObject")
            .flags(public_abstract)
            .extends(object)
            .build(&mut b);
        b.add_field("_identity", FieldAttributes::PRIVATE, TypeSig::Object);

        TypeDefBuilder::new()
            .namespace("System")
            .name("ContextBoundObject")
            .flags(public_abstract)
            .extends(marshal_by_ref)
            .build(&mut b);

        b
    }
}

/// A metadata image held entirely in memory
#[derive(Debug, Clone)]
pub struct InMemoryMetadata {
    rows: MetadataBuilder,
}

impl InMemoryMetadata {
    /// Number of type definitions
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.rows.type_defs.len()
    }
}

fn row_index(token: Token) -> usize {
    (token.row() as usize).wrapping_sub(1)
}

fn row_at<T: Clone>(rows: &[T], rid: u32) -> Option<T> {
    if rid == 0 {
        return None;
    }
    rows.get(rid as usize - 1).cloned()
}

impl MetadataReader for InMemoryMetadata {
    fn name(&self) -> &str {
        &self.rows.name
    }

    fn row_count(&self, table_id: u8) -> u32 {
        let count = match table_id {
            table::MODULE => 1,
            table::TYPE_REF => self.rows.type_refs.len(),
            table::TYPE_DEF => self.rows.type_defs.len(),
            table::FIELD => self.rows.fields.len(),
            table::METHOD_DEF => self.rows.methods.len(),
            table::INTERFACE_IMPL => self.rows.interface_impls.len(),
            table::MEMBER_REF => self.rows.member_refs.len(),
            table::CLASS_LAYOUT => self.rows.class_layouts.len(),
            table::EVENT => self.rows.events.len(),
            table::PROPERTY => self.rows.properties.len(),
            table::METHOD_IMPL => self.rows.method_impls.len(),
            table::MODULE_REF => self.rows.module_refs.len(),
            table::TYPE_SPEC => self.rows.type_specs.len(),
            table::ASSEMBLY_REF => self.rows.assembly_refs.len(),
            table::NESTED_CLASS => self.rows.nested.len(),
            table::GENERIC_PARAM => self.rows.generic_params.len(),
            _ => 0,
        };
        count as u32
    }

    fn type_def(&self, rid: u32) -> Option<TypeDefRow> {
        row_at(&self.rows.type_defs, rid)
    }

    fn type_ref(&self, rid: u32) -> Option<TypeRefRow> {
        row_at(&self.rows.type_refs, rid)
    }

    fn type_spec(&self, rid: u32) -> Option<TypeSig> {
        row_at(&self.rows.type_specs, rid)
    }

    fn field(&self, rid: u32) -> Option<FieldRow> {
        row_at(&self.rows.fields, rid)
    }

    fn method_def(&self, rid: u32) -> Option<MethodDefRow> {
        row_at(&self.rows.methods, rid)
    }

    fn member_ref(&self, rid: u32) -> Option<MemberRefRow> {
        row_at(&self.rows.member_refs, rid)
    }

    fn interfaces_of(&self, type_def: Token) -> Vec<Token> {
        self.rows
            .interface_impls
            .iter()
            .filter(|(class, _)| *class == type_def)
            .map(|(_, interface)| *interface)
            .collect()
    }

    fn method_impls_of(&self, type_def: Token) -> Vec<MethodImplRow> {
        self.rows
            .method_impls
            .iter()
            .filter(|row| row.class == type_def)
            .copied()
            .collect()
    }

    fn enclosing_type(&self, type_def: Token) -> Option<Token> {
        self.rows
            .nested
            .iter()
            .find(|(nested, _)| *nested == type_def)
            .map(|(_, enclosing)| *enclosing)
    }

    fn nested_types_of(&self, type_def: Token) -> Vec<Token> {
        self.rows
            .nested
            .iter()
            .filter(|(_, enclosing)| *enclosing == type_def)
            .map(|(nested, _)| *nested)
            .collect()
    }

    fn class_layout(&self, type_def: Token) -> Option<ClassLayoutRow> {
        self.rows
            .class_layouts
            .iter()
            .find(|(owner, _)| *owner == type_def)
            .map(|(_, row)| *row)
    }

    fn generic_params_of(&self, owner: Token) -> Vec<GenericParamRow> {
        let mut params: Vec<GenericParamRow> = self
            .rows
            .generic_params
            .iter()
            .filter(|row| row.owner == owner)
            .cloned()
            .collect();
        params.sort_by_key(|row| row.number);
        params
    }

    fn properties_of(&self, type_def: Token) -> Vec<PropertyRow> {
        self.rows
            .properties
            .iter()
            .filter(|(owner, _)| *owner == type_def)
            .map(|(_, row)| row.clone())
            .collect()
    }

    fn events_of(&self, type_def: Token) -> Vec<EventRow> {
        self.rows
            .events
            .iter()
            .filter(|(owner, _)| *owner == type_def)
            .map(|(_, row)| row.clone())
            .collect()
    }

    fn assembly_ref(&self, rid: u32) -> Option<AssemblyRefRow> {
        row_at(&self.rows.assembly_refs, rid)
    }

    fn module_ref(&self, rid: u32) -> Option<ModuleRefRow> {
        row_at(&self.rows.module_refs, rid)
    }
}
