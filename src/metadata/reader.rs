//! The metadata decoding seam.
//!
//! The class loader never parses PE files or metadata streams itself. Every image is backed
//! by a [`MetadataReader`] that answers row queries with decoded, owned values. Row indices
//! are 1-based as in ECMA-335; a reader returns `None` for rows it does not have.

use crate::metadata::{
    rows::{
        AssemblyRefRow, ClassLayoutRow, EventRow, FieldRow, GenericParamRow, MemberRefRow,
        MethodDefRow, MethodImplRow, ModuleRefRow, PropertyRow, TypeDefRow, TypeRefRow,
    },
    signatures::TypeSig,
    token::Token,
};

/// Row-level access to the metadata of one image.
///
/// # Thread Safety
///
/// Readers are shared between all threads using a [`crate::TypeSystem`] and must be
/// [`Send`] + [`Sync`]. All methods take `&self` and must not block on the loader.
pub trait MetadataReader: Send + Sync {
    /// Simple name of the assembly this image belongs to (used to satisfy `AssemblyRef` rows)
    fn name(&self) -> &str;

    /// Number of rows in the given table (see [`crate::metadata::token::table`])
    fn row_count(&self, table: u8) -> u32;

    /// `TypeDef` row
    fn type_def(&self, rid: u32) -> Option<TypeDefRow>;

    /// `TypeRef` row
    fn type_ref(&self, rid: u32) -> Option<TypeRefRow>;

    /// Decoded `TypeSpec` blob
    fn type_spec(&self, rid: u32) -> Option<TypeSig>;

    /// `Field` row
    fn field(&self, rid: u32) -> Option<FieldRow>;

    /// `MethodDef` row
    fn method_def(&self, rid: u32) -> Option<MethodDefRow>;

    /// `MemberRef` row
    fn member_ref(&self, rid: u32) -> Option<MemberRefRow>;

    /// Interfaces directly implemented by the given `TypeDef`, in `InterfaceImpl` order
    fn interfaces_of(&self, type_def: Token) -> Vec<Token>;

    /// `MethodImpl` rows owned by the given `TypeDef`
    fn method_impls_of(&self, type_def: Token) -> Vec<MethodImplRow>;

    /// Enclosing `TypeDef` of a nested type
    fn enclosing_type(&self, type_def: Token) -> Option<Token>;

    /// Types nested directly in the given `TypeDef`
    fn nested_types_of(&self, type_def: Token) -> Vec<Token>;

    /// `ClassLayout` row of the given `TypeDef`
    fn class_layout(&self, type_def: Token) -> Option<ClassLayoutRow>;

    /// Generic parameters of a `TypeDef` or `MethodDef`, ordered by number
    fn generic_params_of(&self, owner: Token) -> Vec<GenericParamRow>;

    /// Properties of the given `TypeDef`
    fn properties_of(&self, type_def: Token) -> Vec<PropertyRow>;

    /// Events of the given `TypeDef`
    fn events_of(&self, type_def: Token) -> Vec<EventRow>;

    /// `AssemblyRef` row
    fn assembly_ref(&self, rid: u32) -> Option<AssemblyRefRow>;

    /// `ModuleRef` row
    fn module_ref(&self, rid: u32) -> Option<ModuleRefRow>;
}
