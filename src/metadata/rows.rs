//! Owned metadata rows returned by a [`crate::metadata::reader::MetadataReader`].
//!
//! Rows carry decoded heap values (names, signatures) rather than heap offsets, so the
//! loader never touches the raw streams.

use crate::metadata::{
    flags::{
        FieldAttributes, GenericParamAttributes, MethodAttributes, MethodImplAttributes,
        TypeAttributes,
    },
    signatures::{MemberSig, MethodSig, TypeSig},
    token::Token,
};

/// A row of the `TypeDef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefRow {
    /// Type attributes
    pub flags: TypeAttributes,
    /// Simple name
    pub name: String,
    /// Namespace, empty for the global namespace and for nested types
    pub namespace: String,
    /// Base type (`TypeDef`, `TypeRef` or `TypeSpec`), null for roots and interfaces
    pub extends: Token,
    /// 1-based index of the first field owned by this type
    pub field_list: u32,
    /// 1-based index of the first method owned by this type
    pub method_list: u32,
}

/// Scope a `TypeRef` is resolved in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionScope {
    /// Defined in the referencing module itself
    Module,
    /// Defined in another module of the same assembly (`ModuleRef` row)
    ModuleRef(u32),
    /// Defined in another assembly (`AssemblyRef` row)
    AssemblyRef(u32),
    /// Nested in the type named by this `TypeRef` token
    TypeRef(Token),
}

/// A row of the `TypeRef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRefRow {
    /// Where the referenced type lives
    pub scope: ResolutionScope,
    /// Simple name
    pub name: String,
    /// Namespace
    pub namespace: String,
}

/// A row of the `Field` table, joined with its `FieldLayout`, `FieldRVA` and `Constant` rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    /// Field attributes
    pub flags: FieldAttributes,
    /// Field name
    pub name: String,
    /// Field type
    pub signature: TypeSig,
    /// Explicit offset from the `FieldLayout` table
    pub offset: Option<u32>,
    /// Relative virtual address of the initial data from the `FieldRVA` table
    pub rva: Option<u32>,
    /// Raw value blob from the `Constant` table
    pub constant: Option<Vec<u8>>,
}

/// A row of the `MethodDef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefRow {
    /// Method attributes
    pub flags: MethodAttributes,
    /// Implementation attributes
    pub impl_flags: MethodImplAttributes,
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: MethodSig,
}

/// A row of the `MemberRef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefRow {
    /// Class (`TypeDef`, `TypeRef`, `TypeSpec`) declaring the member
    pub parent: Token,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberSig,
}

/// A row of the `MethodImpl` table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodImplRow {
    /// The class providing the override
    pub class: Token,
    /// The method that runs (`MethodDef` or `MemberRef`)
    pub body: Token,
    /// The overridden declaration (`MethodDef` or `MemberRef`)
    pub declaration: Token,
}

/// A row of the `ClassLayout` table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayoutRow {
    /// Field alignment cap, 0 for the default
    pub packing_size: u16,
    /// Requested instance data size, 0 for none
    pub class_size: u32,
}

/// A row of the `GenericParam` table with its constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParamRow {
    /// Position of the parameter
    pub number: u16,
    /// Variance and special constraints
    pub flags: GenericParamAttributes,
    /// Owning `TypeDef` or `MethodDef`
    pub owner: Token,
    /// Declared name
    pub name: String,
    /// Constraint types (`TypeDef`, `TypeRef`, `TypeSpec`)
    pub constraints: Vec<Token>,
}

/// A row of the `Property` table joined with its `MethodSemantics`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRow {
    /// Property name
    pub name: String,
    /// Property attributes
    pub flags: u16,
    /// Getter `MethodDef`
    pub getter: Option<Token>,
    /// Setter `MethodDef`
    pub setter: Option<Token>,
}

/// A row of the `Event` table joined with its `MethodSemantics`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    /// Event name
    pub name: String,
    /// Event attributes
    pub flags: u16,
    /// `add_` accessor `MethodDef`
    pub add: Option<Token>,
    /// `remove_` accessor `MethodDef`
    pub remove: Option<Token>,
    /// `raise_` accessor `MethodDef`
    pub raise: Option<Token>,
}

/// A row of the `AssemblyRef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRefRow {
    /// Simple assembly name
    pub name: String,
}

/// A row of the `ModuleRef` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRefRow {
    /// Module name
    pub name: String,
}
