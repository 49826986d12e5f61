//! Well-known core library classes and primitive type properties.

use strum::{EnumCount, EnumIter, IntoStaticStr};

use crate::{config::LoaderConfig, typesystem::RuntimeType};

/// Classes of the core library the loader treats specially.
///
/// The variant name is the simple name of the class in the `System` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
pub enum WellKnownClass {
    /// `System.Object`, the root of the class hierarchy
    Object,
    /// `System.ValueType`, the base of all value types
    ValueType,
    /// `System.Enum`, the base of all enumerations
    Enum,
    /// `System.Void`
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    SByte,
    /// `System.Byte`
    Byte,
    /// `System.Int16`
    Int16,
    /// `System.UInt16`
    UInt16,
    /// `System.Int32`
    Int32,
    /// `System.UInt32`
    UInt32,
    /// `System.Int64`
    Int64,
    /// `System.UInt64`
    UInt64,
    /// `System.Single`
    Single,
    /// `System.Double`
    Double,
    /// `System.IntPtr`
    IntPtr,
    /// `System.UIntPtr`
    UIntPtr,
    /// `System.String`
    String,
    /// `System.Array`, the base of all array classes
    Array,
    /// `System.TypedReference`
    TypedReference,
    /// `System.Delegate`
    Delegate,
    /// `System.MulticastDelegate`
    MulticastDelegate,
    /// `System.MarshalByRefObject`
    MarshalByRefObject,
    /// `System.ContextBoundObject`
    ContextBoundObject,
}

impl WellKnownClass {
    /// Simple name of the class
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Namespace of the class
    #[must_use]
    pub fn namespace(self) -> &'static str {
        "System"
    }

    /// The class servicing a primitive runtime type
    #[must_use]
    pub fn for_primitive(ty: RuntimeType) -> Option<Self> {
        let class = match ty {
            RuntimeType::Void => WellKnownClass::Void,
            RuntimeType::Boolean => WellKnownClass::Boolean,
            RuntimeType::Char => WellKnownClass::Char,
            RuntimeType::I1 => WellKnownClass::SByte,
            RuntimeType::U1 => WellKnownClass::Byte,
            RuntimeType::I2 => WellKnownClass::Int16,
            RuntimeType::U2 => WellKnownClass::UInt16,
            RuntimeType::I4 => WellKnownClass::Int32,
            RuntimeType::U4 => WellKnownClass::UInt32,
            RuntimeType::I8 => WellKnownClass::Int64,
            RuntimeType::U8 => WellKnownClass::UInt64,
            RuntimeType::R4 => WellKnownClass::Single,
            RuntimeType::R8 => WellKnownClass::Double,
            RuntimeType::I => WellKnownClass::IntPtr,
            RuntimeType::U => WellKnownClass::UIntPtr,
            RuntimeType::String => WellKnownClass::String,
            RuntimeType::Object => WellKnownClass::Object,
            RuntimeType::TypedByRef => WellKnownClass::TypedReference,
            _ => return None,
        };
        Some(class)
    }
}

/// How a core library class maps onto a built-in runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveInfo {
    /// The canonical runtime type of the class
    pub byval: RuntimeType,
    /// The native representation is byte-identical to the managed one
    pub blittable: bool,
}

/// Classifies a `System` class of the core library by its simple name
#[must_use]
pub fn classify_core_type(name: &str) -> Option<PrimitiveInfo> {
    let (byval, blittable) = match name {
        "Object" => (RuntimeType::Object, false),
        "String" => (RuntimeType::String, false),
        "TypedReference" => (RuntimeType::TypedByRef, true),
        "Void" => (RuntimeType::Void, false),
        "Boolean" => (RuntimeType::Boolean, false),
        "Char" => (RuntimeType::Char, false),
        "SByte" => (RuntimeType::I1, true),
        "Byte" => (RuntimeType::U1, true),
        "Int16" => (RuntimeType::I2, true),
        "UInt16" => (RuntimeType::U2, true),
        "Int32" => (RuntimeType::I4, true),
        "UInt32" => (RuntimeType::U4, true),
        "Int64" => (RuntimeType::I8, true),
        "UInt64" => (RuntimeType::U8, true),
        "Single" => (RuntimeType::R4, true),
        "Double" => (RuntimeType::R8, true),
        "IntPtr" => (RuntimeType::I, true),
        "UIntPtr" => (RuntimeType::U, true),
        _ => return None,
    };
    Some(PrimitiveInfo { byval, blittable })
}

/// Size and alignment of a primitive, pointer-like or reference type, `None` for value types
/// whose size depends on a class layout
#[must_use]
pub fn fixed_size(ty: RuntimeType, config: &LoaderConfig) -> Option<(u32, u32)> {
    let ptr = config.pointer_size;
    let size = match ty {
        RuntimeType::Void => (0, 1),
        RuntimeType::Boolean | RuntimeType::I1 | RuntimeType::U1 => (1, 1),
        RuntimeType::Char | RuntimeType::I2 | RuntimeType::U2 => (2, 2),
        RuntimeType::I4 | RuntimeType::U4 | RuntimeType::R4 => (4, 4),
        RuntimeType::I8 | RuntimeType::U8 | RuntimeType::R8 => (8, config.int64_alignment),
        RuntimeType::I
        | RuntimeType::U
        | RuntimeType::Ptr(_)
        | RuntimeType::ByRef(_)
        | RuntimeType::FnPtr(_)
        | RuntimeType::String
        | RuntimeType::Object
        | RuntimeType::Class(_)
        | RuntimeType::SzArray(_)
        | RuntimeType::Array { .. }
        | RuntimeType::Var(_)
        | RuntimeType::MVar(_) => (ptr, ptr),
        RuntimeType::GenericInst { is_value_type, .. } if !is_value_type => (ptr, ptr),
        _ => return None,
    };
    Some(size)
}
