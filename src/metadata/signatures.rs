//! Decoded metadata signatures.
//!
//! These are the token-based shapes a [`crate::metadata::reader::MetadataReader`] hands to
//! the loader. They still reference other rows by [`Token`]; the loader converts them into
//! interned runtime types once the referenced classes are resolved.

use crate::metadata::token::Token;

/// A type as encoded in a metadata signature blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// `void`, only valid as a return type or pointer target
    Void,
    /// `bool`
    Boolean,
    /// `char` (UTF-16 code unit)
    Char,
    /// `int8`
    I1,
    /// `uint8`
    U1,
    /// `int16`
    I2,
    /// `uint16`
    U2,
    /// `int32`
    I4,
    /// `uint32`
    U4,
    /// `int64`
    I8,
    /// `uint64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
    /// Native sized signed integer
    I,
    /// Native sized unsigned integer
    U,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.TypedReference`
    TypedByRef,
    /// A reference type named by a `TypeDef`, `TypeRef` or `TypeSpec` token
    Class(Token),
    /// A value type named by a `TypeDef`, `TypeRef` or `TypeSpec` token
    ValueType(Token),
    /// Generic parameter of the enclosing type
    Var(u16),
    /// Generic parameter of the enclosing method
    MVar(u16),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Managed reference
    ByRef(Box<TypeSig>),
    /// Single-dimensional, zero-based array
    SzArray(Box<TypeSig>),
    /// General array
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Rank and bounds
        shape: ArrayShape,
    },
    /// Instantiation of a generic type definition
    GenericInst {
        /// The generic definition (`TypeDef` or `TypeRef`)
        definition: Token,
        /// Whether the definition is a value type
        is_value_type: bool,
        /// Type arguments in declaration order
        args: Vec<TypeSig>,
    },
    /// Function pointer
    FnPtr(Box<MethodSig>),
}

/// Rank and bounds of a general array
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArrayShape {
    /// Number of dimensions
    pub rank: u32,
    /// Declared sizes, possibly fewer than `rank`
    pub sizes: Vec<u32>,
    /// Declared lower bounds, possibly fewer than `rank`
    pub lower_bounds: Vec<i32>,
}

impl ArrayShape {
    /// Creates a shape without explicit sizes or bounds
    #[must_use]
    pub fn with_rank(rank: u32) -> Self {
        ArrayShape {
            rank,
            sizes: Vec::new(),
            lower_bounds: Vec::new(),
        }
    }
}

/// A method signature as encoded in a `MethodDef`, `MemberRef` or `StandAloneSig` blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MethodSig {
    /// Instance method, receives `this`
    pub has_this: bool,
    /// `this` is passed explicitly as the first parameter
    pub explicit_this: bool,
    /// Variable argument list
    pub vararg: bool,
    /// Number of generic parameters of a generic method
    pub generic_param_count: u16,
    /// Return type
    pub ret: TypeSig,
    /// Parameter types
    pub params: Vec<TypeSig>,
}

impl Default for TypeSig {
    fn default() -> Self {
        TypeSig::Void
    }
}

impl MethodSig {
    /// Creates an instance method signature
    #[must_use]
    pub fn instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            ret,
            params,
            ..MethodSig::default()
        }
    }

    /// Creates a static method signature
    #[must_use]
    pub fn static_method(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: false,
            ret,
            params,
            ..MethodSig::default()
        }
    }

    /// Marks the signature as a generic method with `count` type parameters
    #[must_use]
    pub fn generic(mut self, count: u16) -> Self {
        self.generic_param_count = count;
        self
    }
}

/// Signature of a `MemberRef` row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSig {
    /// The member is a method
    Method(MethodSig),
    /// The member is a field
    Field(TypeSig),
}
