//! ECMA-335 attribute flag sets consumed by the class loader.
//!
//! Multi-bit fields (visibility, layout, member access) are exposed through mask constants
//! and small accessor methods, because a zero-valued member such as `AUTO_LAYOUT` can not be
//! tested with `contains`.
//!
//! # Key Types
//! - [`TypeAttributes`]: flags of a `TypeDef` row
//! - [`FieldAttributes`], [`MethodAttributes`], [`MethodImplAttributes`]: member flags
//! - [`GenericParamAttributes`]: variance and constraint flags of a generic parameter
//! - [`TypeLayout`], [`MemberAccess`]: decoded multi-bit fields

use bitflags::bitflags;

/// Bitmask for type visibility extraction
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;
/// Bitmask for type layout extraction
pub const TYPE_LAYOUT_MASK: u32 = 0x0000_0018;
/// Bitmask for member access extraction
pub const MEMBER_ACCESS_MASK: u16 = 0x0007;
/// Bitmask for method vtable layout extraction
pub const METHOD_VTABLE_LAYOUT_MASK: u16 = 0x0100;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Flags of a type definition
    pub struct TypeAttributes: u32 {
        /// Class is not public scope
        const NOT_PUBLIC = 0x0000_0000;
        /// Class is public scope
        const PUBLIC = 0x0000_0001;
        /// Class is nested with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Class is nested with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Class is nested with family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Class is nested with assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Class is nested with family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Class is nested with family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Class fields are auto-laid out
        const AUTO_LAYOUT = 0x0000_0000;
        /// Class fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Layout is supplied explicitly
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Type is a class
        const CLASS = 0x0000_0000;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Class/interface is imported
        const IMPORT = 0x0000_1000;
        /// Class is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// LPSTR is interpreted as Unicode
        const UNICODE_CLASS = 0x0001_0000;
        /// LPSTR is interpreted automatically
        const AUTO_CLASS = 0x0002_0000;
        /// Initialize the class before first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
        /// The runtime should check name encoding
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// Class has security associated with it
        const HAS_SECURITY = 0x0004_0000;
    }
}

/// Field layout policy of a type definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeLayout {
    /// The runtime picks the field order
    Auto,
    /// Fields are placed in declaration order
    Sequential,
    /// Field offsets come from the `FieldLayout` table
    Explicit,
}

impl TypeAttributes {
    /// Extract the layout policy
    #[must_use]
    pub fn layout(&self) -> TypeLayout {
        match self.bits() & TYPE_LAYOUT_MASK {
            0x08 => TypeLayout::Sequential,
            0x10 => TypeLayout::Explicit,
            _ => TypeLayout::Auto,
        }
    }

    /// Extract only the visibility bits
    #[must_use]
    pub fn visibility(&self) -> TypeAttributes {
        TypeAttributes::from_bits_truncate(self.bits() & TYPE_VISIBILITY_MASK)
    }

    /// Returns true for interface definitions
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.contains(TypeAttributes::INTERFACE)
    }

    /// Returns true for abstract definitions (interfaces included)
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.contains(TypeAttributes::ABSTRACT)
    }

    /// Returns true if the visibility denotes a nested type
    #[must_use]
    pub fn is_nested(&self) -> bool {
        (self.bits() & TYPE_VISIBILITY_MASK) > 1
    }
}

/// Accessibility of a field or method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberAccess {
    /// Member not referenceable
    CompilerControlled,
    /// Accessible only by the parent type
    Private,
    /// Accessible by sub-types only in this assembly
    FamAndAssem,
    /// Accessible by anyone in the assembly
    Assembly,
    /// Accessible only by type and sub-types
    Family,
    /// Accessible by sub-types anywhere, plus anyone in the assembly
    FamOrAssem,
    /// Accessible by anyone who has visibility to this scope
    Public,
}

impl MemberAccess {
    fn from_bits(bits: u16) -> Self {
        match bits & MEMBER_ACCESS_MASK {
            1 => MemberAccess::Private,
            2 => MemberAccess::FamAndAssem,
            3 => MemberAccess::Assembly,
            4 => MemberAccess::Family,
            5 => MemberAccess::FamOrAssem,
            6 => MemberAccess::Public,
            _ => MemberAccess::CompilerControlled,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Flags of a field definition
    pub struct FieldAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized, not written to after init
        const INIT_ONLY = 0x0020;
        /// Value is compile time constant
        const LITERAL = 0x0040;
        /// Reserved (to indicate this field should not be serialized when type is remoted)
        const NOT_SERIALIZED = 0x0080;
        /// Field has RVA
        const HAS_FIELD_RVA = 0x0100;
        /// Field is special
        const SPECIAL_NAME = 0x0200;
        /// CLI provides 'special' behavior, depending upon the name of the field
        const RT_SPECIAL_NAME = 0x0400;
        /// Field has marshalling information
        const HAS_FIELD_MARSHAL = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
        /// Field has default
        const HAS_DEFAULT = 0x8000;
    }
}

impl FieldAttributes {
    /// Extract the accessibility of the field
    #[must_use]
    pub fn access(&self) -> MemberAccess {
        MemberAccess::from_bits(self.bits())
    }

    /// Returns true for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.contains(FieldAttributes::STATIC)
    }

    /// Returns true for compile-time constants
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.contains(FieldAttributes::LITERAL)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Flags of a method definition
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method can only be overridden if also accessible
        const STRICT = 0x0200;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, depending upon the name of the method
        const RT_SPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
        /// Method has security associated with it
        const HAS_SECURITY = 0x4000;
        /// Method calls another method containing security code
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

impl MethodAttributes {
    /// Extract the accessibility of the method
    #[must_use]
    pub fn access(&self) -> MemberAccess {
        MemberAccess::from_bits(self.bits())
    }

    /// Returns true if the method is accessible by anyone
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access() == MemberAccess::Public
    }

    /// Returns true for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.contains(MethodAttributes::VIRTUAL)
    }

    /// Returns true for abstract methods
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.contains(MethodAttributes::ABSTRACT)
    }

    /// Returns true for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.contains(MethodAttributes::STATIC)
    }

    /// Returns true if the method requests a fresh vtable slot
    #[must_use]
    pub fn is_new_slot(&self) -> bool {
        self.bits() & METHOD_VTABLE_LAYOUT_MASK != 0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Implementation flags of a method definition
    pub struct MethodImplAttributes: u16 {
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is OPTIL
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method impl is unmanaged, otherwise managed
        const UNMANAGED = 0x0004;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is defined; used primarily in merge scenarios
        const FORWARD_REF = 0x0010;
        /// Method is single threaded through the body
        const SYNCHRONIZED = 0x0020;
        /// Method signature is exported exactly as declared
        const PRESERVE_SIG = 0x0080;
        /// Method is implemented by the runtime itself
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Flags of a generic parameter
    pub struct GenericParamAttributes: u16 {
        /// The parameter is covariant
        const COVARIANT = 0x0001;
        /// The parameter is contravariant
        const CONTRAVARIANT = 0x0002;
        /// The parameter is constrained to reference types
        const REFERENCE_TYPE_CONSTRAINT = 0x0004;
        /// The parameter is constrained to non-nullable value types
        const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT = 0x0008;
        /// The parameter must have a public default constructor
        const DEFAULT_CONSTRUCTOR_CONSTRAINT = 0x0010;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_layout() {
        let flags = TypeAttributes::PUBLIC | TypeAttributes::SEQUENTIAL_LAYOUT;
        assert_eq!(flags.layout(), TypeLayout::Sequential);
        assert_eq!(TypeAttributes::PUBLIC.layout(), TypeLayout::Auto);
        assert_eq!(
            TypeAttributes::EXPLICIT_LAYOUT.layout(),
            TypeLayout::Explicit
        );
    }

    #[test]
    fn test_type_nested_visibility() {
        assert!(TypeAttributes::NESTED_PRIVATE.is_nested());
        assert!(!TypeAttributes::PUBLIC.is_nested());
        assert_eq!(
            (TypeAttributes::NESTED_FAMILY | TypeAttributes::SEALED).visibility(),
            TypeAttributes::NESTED_FAMILY
        );
    }

    #[test]
    fn test_method_access() {
        let flags = MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL;
        assert!(flags.is_public());
        assert!(flags.is_virtual());
        assert!(!flags.is_new_slot());

        let family = MethodAttributes::FAMILY | MethodAttributes::NEW_SLOT;
        assert_eq!(family.access(), MemberAccess::Family);
        assert!(family.is_new_slot());
    }

    #[test]
    fn test_field_access() {
        let flags = FieldAttributes::PRIVATE | FieldAttributes::STATIC;
        assert_eq!(flags.access(), MemberAccess::Private);
        assert!(flags.is_static());
        assert!(!flags.is_literal());
    }
}
