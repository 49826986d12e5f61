use std::sync::{
    atomic::{AtomicI32, Ordering},
    OnceLock,
};

use crate::{
    metadata::{
        flags::{MethodAttributes, MethodImplAttributes},
        signatures::MethodSig,
        token::Token,
    },
    typesystem::{ClassId, GenericContext, MethodId, SigId},
};

/// A method of a loaded class.
///
/// Methods of generic instantiations and instantiated generic methods are *inflated*: they
/// carry the definition they were created from in [`MethodDescriptor::declaring`] and the
/// substitution that produced them in [`MethodDescriptor::context`].
#[derive(Debug)]
pub struct MethodDescriptor {
    pub(crate) id: MethodId,
    pub(crate) token: Token,
    pub(crate) class: ClassId,
    pub(crate) name: String,
    pub(crate) flags: MethodAttributes,
    pub(crate) impl_flags: MethodImplAttributes,
    pub(crate) raw_signature: Option<MethodSig>,
    pub(crate) signature: OnceLock<SigId>,
    pub(crate) slot: AtomicI32,
    pub(crate) declaring: Option<MethodId>,
    pub(crate) context: Option<GenericContext>,
    pub(crate) generic_param_count: u16,
}

impl MethodDescriptor {
    /// Handle of this method
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// `MethodDef` token of the definition, null for synthesized methods
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The class declaring the method
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method attributes
    #[must_use]
    pub fn flags(&self) -> MethodAttributes {
        self.flags
    }

    /// Implementation attributes
    #[must_use]
    pub fn impl_flags(&self) -> MethodImplAttributes {
        self.impl_flags
    }

    /// Interned signature
    #[must_use]
    pub fn signature(&self) -> Option<SigId> {
        self.signature.get().copied()
    }

    /// VTable slot, `None` until the vtable builder assigned one
    #[must_use]
    pub fn slot(&self) -> Option<u32> {
        u32::try_from(self.slot.load(Ordering::Acquire)).ok()
    }

    pub(crate) fn set_slot(&self, slot: u32) {
        self.slot.store(slot as i32, Ordering::Release);
    }

    /// The generic definition this method was inflated from
    #[must_use]
    pub fn declaring(&self) -> Option<MethodId> {
        self.declaring
    }

    /// The substitution that produced this inflated method
    #[must_use]
    pub fn context(&self) -> Option<GenericContext> {
        self.context
    }

    /// Number of method type parameters
    #[must_use]
    pub fn generic_param_count(&self) -> u16 {
        self.generic_param_count
    }

    /// Returns true for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.is_virtual()
    }

    /// Returns true for abstract methods
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.is_abstract()
    }

    /// Returns true for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    /// Returns true for the type initializer (`.cctor`)
    #[must_use]
    pub fn is_type_initializer(&self) -> bool {
        self.name == ".cctor"
            && self
                .flags
                .contains(MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME)
    }
}

/// A property and its accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Declaring class
    pub parent: ClassId,
    /// Property name
    pub name: String,
    /// Property attributes
    pub flags: u16,
    /// Getter
    pub get: Option<MethodId>,
    /// Setter
    pub set: Option<MethodId>,
}

/// An event and its accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    /// Declaring class
    pub parent: ClassId,
    /// Event name
    pub name: String,
    /// Event attributes
    pub flags: u16,
    /// `add_` accessor
    pub add: Option<MethodId>,
    /// `remove_` accessor
    pub remove: Option<MethodId>,
    /// `raise_` accessor
    pub raise: Option<MethodId>,
}
