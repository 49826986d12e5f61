//! The class descriptor.
//!
//! A [`ClassDescriptor`] is created by the loader with its identity (name, flags, kind) and
//! then filled in stage by stage: linking publishes the parent, supertypes and classification;
//! field layout publishes sizes; initialization publishes interface offsets and the vtable.
//! Every stage publishes through write-once cells, so a reader either sees a final value or
//! nothing at all.

use std::{
    ops::Range,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
        Arc, OnceLock,
    },
};

use bitflags::bitflags;

use crate::{
    error::LoadError,
    interfaces::InterfaceOffsets,
    layout::{InstanceLayout, StaticLayout},
    metadata::{
        flags::{GenericParamAttributes, TypeAttributes},
        token::Token,
    },
    typesystem::{
        ClassId, EventDescriptor, FieldDescriptor, GenericContext, ImageId, InstId, Memo,
        MethodId, PropertyDescriptor, TypeId,
    },
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Classification bits derived while linking and initializing a class
    pub struct ClassFlags: u32 {
        /// Instances are stored inline (value type)
        const VALUETYPE = 0x0001;
        /// The class is an enumeration
        const ENUMTYPE = 0x0002;
        /// The class derives from `System.Delegate`
        const DELEGATE = 0x0004;
        /// The class derives from `System.MarshalByRefObject`
        const MARSHALBYREF = 0x0008;
        /// The class derives from `System.ContextBoundObject`
        const CONTEXTBOUND = 0x0010;
        /// A built-in primitive with identical managed and native representation
        const BLITTABLE_PRIMITIVE = 0x0020;
        /// The `<Module>` pseudo type
        const MODULE_TYPE = 0x0040;
        /// The vtable's `Finalize` slot differs from `System.Object`'s
        const HAS_FINALIZER = 0x0100;
        /// The vtable's `GetHashCode` slot differs from `System.Object`'s
        const GHCIMPL = 0x0200;
        /// The class declares a type initializer
        const HAS_CCTOR = 0x0400;
        /// Sizes were taken from the ahead-of-time cache
        const AOT_LAYOUT = 0x0800;
        /// The class declares nested types
        const HAS_NESTED_TYPES = 0x1000;
    }
}

/// How the descriptor came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Loaded from a `TypeDef` row (open generic definitions included)
    Definition,
    /// Instantiation of a generic definition
    GenericInstance,
    /// Array class synthesized for an element type
    Array,
    /// Unmanaged pointer class
    Pointer,
    /// Function pointer class
    FnPtr,
    /// Class standing in for a generic parameter
    GenericParameter,
}

/// Initialization state of a class
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitState {
    /// `init` has not run
    Uninitialized = 0,
    /// `init` is running on the thread holding the loader lock
    InitPending = 1,
    /// `init` finished and the class is usable
    InitedOk = 2,
    /// `init` failed; the failure is recorded on the class
    InitedFailed = 3,
}

impl InitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => InitState::InitPending,
            2 => InitState::InitedOk,
            3 => InitState::InitedFailed,
            _ => InitState::Uninitialized,
        }
    }
}

/// Coarse pipeline position of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassStage {
    /// Parent, supertypes and classification are known
    Linked,
    /// Instance size and alignment are final
    SizeKnown,
    /// Initialization succeeded
    Usable,
    /// A failure was recorded; terminal
    Failed,
}

/// The generic definition and arguments of an instantiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericClass {
    /// The open definition
    pub definition: ClassId,
    /// Type arguments
    pub inst: InstId,
}

impl GenericClass {
    /// The substitution context of this instantiation
    #[must_use]
    pub fn context(&self) -> GenericContext {
        GenericContext::for_class(self.inst)
    }
}

/// A declared generic parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParamDef {
    /// Position
    pub number: u16,
    /// Declared name
    pub name: String,
    /// Variance and special constraints
    pub flags: GenericParamAttributes,
    /// Constraint type tokens
    pub constraints: Vec<Token>,
}

/// The type parameters of an open generic definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericContainer {
    /// Parameters ordered by position
    pub params: Box<[GenericParamDef]>,
}

/// Descriptor of a loaded class. See the module documentation for the publication stages.
pub struct ClassDescriptor {
    pub(crate) id: ClassId,
    pub(crate) kind: ClassKind,
    pub(crate) token: Token,
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) flags: TypeAttributes,
    pub(crate) rank: u32,
    pub(crate) reserved_size: u32,
    pub(crate) field_range: Range<u32>,
    pub(crate) method_range: Range<u32>,
    pub(crate) generic_class: Option<GenericClass>,
    pub(crate) generic_container: Option<GenericContainer>,
    pub(crate) bits: AtomicU32,

    pub(crate) parent: OnceLock<Option<ClassId>>,
    pub(crate) nested_in: OnceLock<Option<ClassId>>,
    pub(crate) element_class: OnceLock<ClassId>,
    pub(crate) cast_class: OnceLock<ClassId>,
    pub(crate) element_type: OnceLock<TypeId>,
    pub(crate) enum_basetype: OnceLock<TypeId>,
    pub(crate) byval: OnceLock<TypeId>,
    pub(crate) supertypes: OnceLock<Box<[ClassId]>>,
    pub(crate) interface_id: OnceLock<u32>,

    pub(crate) interfaces: Memo<Box<[ClassId]>>,
    pub(crate) fields: Memo<Box<[FieldDescriptor]>>,
    pub(crate) methods: Memo<Box<[MethodId]>>,
    pub(crate) properties: Memo<Box<[PropertyDescriptor]>>,
    pub(crate) events: Memo<Box<[EventDescriptor]>>,
    pub(crate) nested: Memo<Box<[ClassId]>>,

    pub(crate) layout_running: AtomicBool,
    pub(crate) instance_layout: OnceLock<InstanceLayout>,
    pub(crate) static_layout: OnceLock<StaticLayout>,
    pub(crate) interface_offsets: OnceLock<InterfaceOffsets>,
    pub(crate) vtable: OnceLock<Arc<[Option<MethodId>]>>,
    pub(crate) vtable_size: OnceLock<u32>,

    pub(crate) init_state: AtomicU8,
    pub(crate) failure: OnceLock<LoadError>,
    pub(crate) linked: AtomicBool,
    pub(crate) link_failed: AtomicBool,
}

impl ClassDescriptor {
    pub(crate) fn new(
        id: ClassId,
        kind: ClassKind,
        token: Token,
        namespace: String,
        name: String,
        flags: TypeAttributes,
    ) -> Self {
        ClassDescriptor {
            id,
            kind,
            token,
            name,
            namespace,
            flags,
            rank: 0,
            reserved_size: 0,
            field_range: 0..0,
            method_range: 0..0,
            generic_class: None,
            generic_container: None,
            bits: AtomicU32::new(0),
            parent: OnceLock::new(),
            nested_in: OnceLock::new(),
            element_class: OnceLock::new(),
            cast_class: OnceLock::new(),
            element_type: OnceLock::new(),
            enum_basetype: OnceLock::new(),
            byval: OnceLock::new(),
            supertypes: OnceLock::new(),
            interface_id: OnceLock::new(),
            interfaces: Memo::new(),
            fields: Memo::new(),
            methods: Memo::new(),
            properties: Memo::new(),
            events: Memo::new(),
            nested: Memo::new(),
            layout_running: AtomicBool::new(false),
            instance_layout: OnceLock::new(),
            static_layout: OnceLock::new(),
            interface_offsets: OnceLock::new(),
            vtable: OnceLock::new(),
            vtable_size: OnceLock::new(),
            init_state: AtomicU8::new(InitState::Uninitialized as u8),
            failure: OnceLock::new(),
            linked: AtomicBool::new(false),
            link_failed: AtomicBool::new(false),
        }
    }

    /// Handle of this class
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Image whose arena holds this class
    #[must_use]
    pub fn image(&self) -> ImageId {
        self.id.image
    }

    /// How the class was created
    #[must_use]
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// `TypeDef` token, the definition's token for instantiations, null for synthetic classes
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Simple name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Type attributes
    #[must_use]
    pub fn flags(&self) -> TypeAttributes {
        self.flags
    }

    /// Array rank, 0 for non-array classes
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Classification bits
    #[must_use]
    pub fn class_flags(&self) -> ClassFlags {
        ClassFlags::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn set_class_flags(&self, flags: ClassFlags) {
        self.bits.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.is_interface()
    }

    /// Returns true for abstract classes and interfaces
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    /// Returns true for value types
    #[must_use]
    pub fn is_valuetype(&self) -> bool {
        self.class_flags().contains(ClassFlags::VALUETYPE)
    }

    /// Returns true for enumerations
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.class_flags().contains(ClassFlags::ENUMTYPE)
    }

    /// Returns true for delegate classes
    #[must_use]
    pub fn is_delegate(&self) -> bool {
        self.class_flags().contains(ClassFlags::DELEGATE)
    }

    /// Returns true once a finalizer override is known to exist
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.class_flags().contains(ClassFlags::HAS_FINALIZER)
    }

    /// Returns true once a type initializer is known to exist
    #[must_use]
    pub fn has_cctor(&self) -> bool {
        self.class_flags().contains(ClassFlags::HAS_CCTOR)
    }

    /// Instantiation details, set iff the class is a generic instantiation
    #[must_use]
    pub fn generic_class(&self) -> Option<&GenericClass> {
        self.generic_class.as_ref()
    }

    /// Type parameters, set iff the class is an open generic definition
    #[must_use]
    pub fn generic_container(&self) -> Option<&GenericContainer> {
        self.generic_container.as_ref()
    }

    /// Base class, `None` for roots, interfaces and pointer classes
    #[must_use]
    pub fn parent(&self) -> Option<ClassId> {
        self.parent.get().copied().flatten()
    }

    /// Enclosing class of a nested type
    #[must_use]
    pub fn nested_in(&self) -> Option<ClassId> {
        self.nested_in.get().copied().flatten()
    }

    /// Element class of arrays and pointers, underlying class of enums
    #[must_use]
    pub fn element_class(&self) -> Option<ClassId> {
        self.element_class.get().copied()
    }

    /// Class used for array covariance checks
    #[must_use]
    pub fn cast_class(&self) -> Option<ClassId> {
        self.cast_class.get().copied()
    }

    /// Element type of arrays and pointers
    #[must_use]
    pub fn element_type(&self) -> Option<TypeId> {
        self.element_type.get().copied()
    }

    /// Underlying integer type of an enumeration
    #[must_use]
    pub fn enum_basetype(&self) -> Option<TypeId> {
        self.enum_basetype.get().copied()
    }

    /// The runtime type of a value of this class
    #[must_use]
    pub fn byval(&self) -> Option<TypeId> {
        self.byval.get().copied()
    }

    /// Ancestors from the root to this class itself
    #[must_use]
    pub fn supertypes(&self) -> &[ClassId] {
        self.supertypes.get().map_or(&[][..], |s| &s[..])
    }

    /// Length of the ancestor chain including this class
    #[must_use]
    pub fn idepth(&self) -> usize {
        self.supertypes().len()
    }

    /// Interface id, set iff the class is an interface
    #[must_use]
    pub fn interface_id(&self) -> Option<u32> {
        self.interface_id.get().copied()
    }

    /// Directly implemented interfaces, once resolved
    #[must_use]
    pub fn interfaces(&self) -> Option<&[ClassId]> {
        self.interfaces.get().map(|i| &i[..])
    }

    /// Fields, once set up
    #[must_use]
    pub fn fields(&self) -> Option<&[FieldDescriptor]> {
        self.fields.get().map(|f| &f[..])
    }

    /// Methods, once set up
    #[must_use]
    pub fn methods(&self) -> Option<&[MethodId]> {
        self.methods.get().map(|m| &m[..])
    }

    /// Instance layout, once computed
    #[must_use]
    pub fn instance_layout(&self) -> Option<&InstanceLayout> {
        self.instance_layout.get()
    }

    /// Static layout, once computed
    #[must_use]
    pub fn static_layout(&self) -> Option<&StaticLayout> {
        self.static_layout.get()
    }

    /// Returns true once instance size and alignment are final
    #[must_use]
    pub fn size_inited(&self) -> bool {
        self.instance_layout.get().is_some()
    }

    /// Instance size including the object header
    #[must_use]
    pub fn instance_size(&self) -> Option<u32> {
        self.instance_layout.get().map(|l| l.instance_size)
    }

    /// Minimum alignment of instance data
    #[must_use]
    pub fn min_align(&self) -> Option<u32> {
        self.instance_layout.get().map(|l| l.min_align)
    }

    /// Size of the static field area
    #[must_use]
    pub fn class_size(&self) -> Option<u32> {
        self.static_layout.get().map(|l| l.class_size)
    }

    /// Returns true if instances contain managed references
    #[must_use]
    pub fn has_references(&self) -> bool {
        self.instance_layout.get().is_some_and(|l| l.has_references)
    }

    /// Returns true if instances are byte-identical to their native representation
    #[must_use]
    pub fn blittable(&self) -> bool {
        self.instance_layout.get().is_some_and(|l| l.blittable)
    }

    /// Interface offset table, once computed
    #[must_use]
    pub fn interface_offsets(&self) -> Option<&InterfaceOffsets> {
        self.interface_offsets.get()
    }

    /// The vtable, once built
    #[must_use]
    pub fn vtable(&self) -> Option<&Arc<[Option<MethodId>]>> {
        self.vtable.get()
    }

    /// Number of vtable slots
    #[must_use]
    pub fn vtable_size(&self) -> Option<u32> {
        self.vtable_size.get().copied()
    }

    /// Initialization state
    #[must_use]
    pub fn init_state(&self) -> InitState {
        InitState::from_u8(self.init_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_init_state(&self, state: InitState) {
        self.init_state.store(state as u8, Ordering::Release);
    }

    /// Recorded failure, if any
    #[must_use]
    pub fn failure(&self) -> Option<&LoadError> {
        self.failure.get()
    }

    /// Records a failure; the first recorded failure wins
    pub(crate) fn record_failure(&self, error: LoadError) -> &LoadError {
        if self.failure.get().is_none() {
            log::warn!("{}.{}: {}", self.namespace, self.name, error);
        }
        self.failure.get_or_init(|| error)
    }

    /// Returns true if resolving the class itself failed
    #[must_use]
    pub fn link_failed(&self) -> bool {
        self.link_failed.load(Ordering::Acquire)
    }

    pub(crate) fn record_link_failure(&self, error: LoadError) -> &LoadError {
        let recorded = self.record_failure(error);
        self.link_failed.store(true, Ordering::Release);
        recorded
    }

    /// Marks linking as finished; every link-time cell is published before this
    pub(crate) fn mark_linked(&self) {
        self.linked.store(true, Ordering::Release);
    }

    /// Returns true once linking concluded, successfully or not
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.linked.load(Ordering::Acquire) || self.link_failed()
    }

    /// Coarse pipeline position
    #[must_use]
    pub fn stage(&self) -> ClassStage {
        if self.failure.get().is_some() || self.init_state() == InitState::InitedFailed {
            ClassStage::Failed
        } else if self.init_state() == InitState::InitedOk {
            ClassStage::Usable
        } else if self.size_inited() {
            ClassStage::SizeKnown
        } else {
            ClassStage::Linked
        }
    }
}

impl std::fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("token", &self.token)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoadErrorKind;

    fn descriptor() -> ClassDescriptor {
        ClassDescriptor::new(
            ClassId {
                image: ImageId(0),
                index: 0,
            },
            ClassKind::Definition,
            Token(0x02000001),
            "App".to_string(),
            "Widget".to_string(),
            TypeAttributes::PUBLIC,
        )
    }

    #[test]
    fn test_new_descriptor_defaults() {
        let class = descriptor();
        assert_eq!(class.init_state(), InitState::Uninitialized);
        assert_eq!(class.stage(), ClassStage::Linked);
        assert!(class.supertypes().is_empty());
        assert!(class.parent().is_none());
        assert!(!class.is_valuetype());
    }

    #[test]
    fn test_first_failure_wins() {
        let class = descriptor();
        class.record_failure(LoadError::new(LoadErrorKind::TypeLoad, "first"));
        class.record_failure(LoadError::new(LoadErrorKind::MissingMethod, "second"));
        assert_eq!(class.failure().unwrap().message, "first");
        assert_eq!(class.stage(), ClassStage::Failed);
    }

    #[test]
    fn test_class_flags_accumulate() {
        let class = descriptor();
        class.set_class_flags(ClassFlags::VALUETYPE);
        class.set_class_flags(ClassFlags::ENUMTYPE);
        assert!(class.is_valuetype());
        assert!(class.is_enum());
        assert!(!class.is_delegate());
    }
}
