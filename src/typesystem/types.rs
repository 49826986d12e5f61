//! Interned runtime types.
//!
//! Every structural type the loader works with (`int32`, `Foo*`, `List<string>[]`, a generic
//! parameter, ...) is represented by a [`RuntimeType`] value and interned into a compact
//! [`TypeId`]. Structurally equal types always intern to the same id, so type identity is
//! plain integer comparison. Type-argument lists ([`InstId`]) and method signatures
//! ([`SigId`]) are interned the same way.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::typesystem::{ClassId, MethodId};

/// Compactly represents an interned type.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeId(u32);

/// Compactly represents an interned type-argument list.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct InstId(u32);

/// Compactly represents an interned method signature.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Debug)]
pub struct SigId(u32);

/// The declaration a generic parameter belongs to
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum GenericOwner {
    /// Type parameter of a generic class definition
    Class(ClassId),
    /// Type parameter of a generic method definition
    Method(MethodId),
    /// Parameter appearing in a standalone signature (`MemberRef`, `TypeSpec`) without context
    Unbound,
}

/// A generic parameter: its owner and position
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct GenericParam {
    /// Declaring class or method
    pub owner: GenericOwner,
    /// Zero-based position in the owner's parameter list
    pub number: u16,
}

/// The value representation of a runtime type
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum RuntimeType {
    /// `void`
    Void,
    /// `bool`
    Boolean,
    /// `char`
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
    /// `native int`
    I,
    /// `native unsigned int`
    U,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// `System.TypedReference`
    TypedByRef,
    /// A reference type
    Class(ClassId),
    /// A value type
    ValueType(ClassId),
    /// Type parameter of a generic class
    Var(GenericParam),
    /// Type parameter of a generic method
    MVar(GenericParam),
    /// Unmanaged pointer
    Ptr(TypeId),
    /// Managed reference
    ByRef(TypeId),
    /// Function pointer
    FnPtr(SigId),
    /// Single-dimensional zero-based array (vector)
    SzArray(TypeId),
    /// General (bounded) array
    Array {
        /// Element type
        element: TypeId,
        /// Number of dimensions
        rank: u32,
    },
    /// Instantiated generic type
    GenericInst {
        /// The open generic definition
        definition: ClassId,
        /// Type arguments
        args: InstId,
        /// The definition is a value type
        is_value_type: bool,
    },
}

impl RuntimeType {
    /// Returns true for the primitive leaves that never contain generic parameters
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            RuntimeType::Void
                | RuntimeType::Boolean
                | RuntimeType::Char
                | RuntimeType::I1
                | RuntimeType::U1
                | RuntimeType::I2
                | RuntimeType::U2
                | RuntimeType::I4
                | RuntimeType::U4
                | RuntimeType::I8
                | RuntimeType::U8
                | RuntimeType::R4
                | RuntimeType::R8
                | RuntimeType::I
                | RuntimeType::U
        )
    }
}

/// An interned type-argument list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericInst {
    /// Type arguments in declaration order
    pub args: Arc<[TypeId]>,
    /// At least one argument mentions an unbound generic parameter
    pub is_open: bool,
    /// Per argument: the argument is a managed reference type
    pub is_reference: Arc<[bool]>,
}

/// The type-argument lists used to substitute generic parameters
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct GenericContext {
    /// Arguments for `Var` parameters
    pub class_inst: Option<InstId>,
    /// Arguments for `MVar` parameters
    pub method_inst: Option<InstId>,
}

impl GenericContext {
    /// A context substituting class parameters only
    #[must_use]
    pub fn for_class(inst: InstId) -> Self {
        GenericContext {
            class_inst: Some(inst),
            method_inst: None,
        }
    }

    /// Returns true if the context substitutes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.class_inst.is_none() && self.method_inst.is_none()
    }
}

/// An interned method signature
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Instance method
    pub has_this: bool,
    /// `this` is passed explicitly
    pub explicit_this: bool,
    /// Variable argument list
    pub vararg: bool,
    /// Number of method type parameters
    pub generic_param_count: u16,
    /// Return type
    pub ret: TypeId,
    /// Parameter types
    pub params: Arc<[TypeId]>,
}

struct InternMap<T, I> {
    interned: HashMap<T, I>,
    data: Vec<T>,
}

impl<T, I> Default for InternMap<T, I> {
    fn default() -> Self {
        Self {
            interned: HashMap::new(),
            data: Vec::with_capacity(64),
        }
    }
}

#[derive(Copy, Clone)]
struct TypeEntry {
    ty: RuntimeType,
    open: bool,
}

/// Interner for types, type-argument lists and signatures.
///
/// # Thread Safety
///
/// Lookups take a shared lock; a miss upgrades to the exclusive lock and checks again before
/// inserting, so concurrent interning of the same value yields one id.
pub struct TypeCache {
    types: RwLock<(InternMap<RuntimeType, TypeId>, Vec<TypeEntry>)>,
    insts: RwLock<InternMap<Arc<[TypeId]>, InstId>>,
    inst_data: RwLock<Vec<GenericInst>>,
    sigs: RwLock<InternMap<MethodSignature, SigId>>,
    sig_open: RwLock<Vec<bool>>,
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCache {
    /// Creates an empty interner
    #[must_use]
    pub fn new() -> Self {
        TypeCache {
            types: RwLock::new((InternMap::default(), Vec::with_capacity(64))),
            insts: RwLock::new(InternMap::default()),
            inst_data: RwLock::new(Vec::new()),
            sigs: RwLock::new(InternMap::default()),
            sig_open: RwLock::new(Vec::new()),
        }
    }

    /// Interns a type
    pub fn intern(&self, ty: RuntimeType) -> TypeId {
        if let Some(id) = self.types.read().0.interned.get(&ty) {
            return *id;
        }

        let open = self.compute_open(&ty);
        let mut guard = self.types.write();
        let (map, entries) = &mut *guard;
        if let Some(id) = map.interned.get(&ty) {
            return *id;
        }

        let id = TypeId(entries.len() as u32);
        entries.push(TypeEntry { ty, open });
        map.data.push(ty);
        map.interned.insert(ty, id);
        id
    }

    fn compute_open(&self, ty: &RuntimeType) -> bool {
        match ty {
            RuntimeType::Var(_) | RuntimeType::MVar(_) => true,
            RuntimeType::Ptr(inner)
            | RuntimeType::ByRef(inner)
            | RuntimeType::SzArray(inner)
            | RuntimeType::Array { element: inner, .. } => self.is_open(*inner),
            RuntimeType::FnPtr(sig) => self.is_sig_open(*sig),
            RuntimeType::GenericInst { args, .. } => self.inst(*args).is_open,
            _ => false,
        }
    }

    /// Looks up an interned type
    #[must_use]
    pub fn get(&self, id: TypeId) -> RuntimeType {
        self.types.read().1[id.0 as usize].ty
    }

    /// Returns true if the type mentions an unbound generic parameter
    #[must_use]
    pub fn is_open(&self, id: TypeId) -> bool {
        self.types.read().1[id.0 as usize].open
    }

    /// Returns true if values of the type are managed object references
    #[must_use]
    pub fn is_reference(&self, id: TypeId) -> bool {
        match self.get(id) {
            RuntimeType::String
            | RuntimeType::Object
            | RuntimeType::Class(_)
            | RuntimeType::SzArray(_)
            | RuntimeType::Array { .. } => true,
            RuntimeType::GenericInst { is_value_type, .. } => !is_value_type,
            _ => false,
        }
    }

    /// Interns a type-argument list
    pub fn intern_inst(&self, args: &[TypeId]) -> InstId {
        if let Some(id) = self.insts.read().interned.get(args) {
            return *id;
        }

        let is_open = args.iter().any(|arg| self.is_open(*arg));
        let is_reference: Arc<[bool]> = args.iter().map(|arg| self.is_reference(*arg)).collect();
        let key: Arc<[TypeId]> = Arc::from(args);

        let mut map = self.insts.write();
        if let Some(id) = map.interned.get(args) {
            return *id;
        }

        let id = InstId(map.data.len() as u32);
        map.data.push(key.clone());
        map.interned.insert(key.clone(), id);
        self.inst_data.write().push(GenericInst {
            args: key,
            is_open,
            is_reference,
        });
        id
    }

    /// Looks up an interned type-argument list
    #[must_use]
    pub fn inst(&self, id: InstId) -> GenericInst {
        self.inst_data.read()[id.0 as usize].clone()
    }

    /// Interns a method signature
    pub fn intern_sig(&self, sig: MethodSignature) -> SigId {
        if let Some(id) = self.sigs.read().interned.get(&sig) {
            return *id;
        }

        let open = self.is_open(sig.ret) || sig.params.iter().any(|p| self.is_open(*p));
        let mut map = self.sigs.write();
        if let Some(id) = map.interned.get(&sig) {
            return *id;
        }

        let id = SigId(map.data.len() as u32);
        map.data.push(sig.clone());
        map.interned.insert(sig, id);
        self.sig_open.write().push(open);
        id
    }

    /// Looks up an interned method signature
    #[must_use]
    pub fn sig(&self, id: SigId) -> MethodSignature {
        self.sigs.read().data[id.0 as usize].clone()
    }

    fn is_sig_open(&self, id: SigId) -> bool {
        self.sig_open.read()[id.0 as usize]
    }

    /// Number of distinct interned types
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.read().1.len()
    }
}
