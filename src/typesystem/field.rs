use std::sync::{Arc, OnceLock};

use crate::{
    metadata::{flags::FieldAttributes, signatures::TypeSig, token::Token},
    typesystem::{ClassId, TypeId},
};

/// Initial data attached to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldData {
    /// No data
    None,
    /// Relative virtual address of the initial value in the image
    Rva(u32),
    /// Raw compile-time constant
    Constant(Arc<[u8]>),
}

/// A field of a loaded class
#[derive(Debug)]
pub struct FieldDescriptor {
    pub(crate) owner: ClassId,
    pub(crate) token: Token,
    pub(crate) name: String,
    pub(crate) flags: FieldAttributes,
    pub(crate) signature: TypeSig,
    pub(crate) explicit_offset: Option<u32>,
    pub(crate) data: FieldData,
    pub(crate) ty: OnceLock<TypeId>,
    pub(crate) definition_type: OnceLock<TypeId>,
    pub(crate) offset: OnceLock<u32>,
}

impl FieldDescriptor {
    pub(crate) fn new(
        owner: ClassId,
        token: Token,
        name: String,
        flags: FieldAttributes,
        signature: TypeSig,
        explicit_offset: Option<u32>,
        data: FieldData,
    ) -> Self {
        FieldDescriptor {
            owner,
            token,
            name,
            flags,
            signature,
            explicit_offset,
            data,
            ty: OnceLock::new(),
            definition_type: OnceLock::new(),
            offset: OnceLock::new(),
        }
    }

    /// The class declaring the field
    #[must_use]
    pub fn owner(&self) -> ClassId {
        self.owner
    }

    /// `Field` token of the definition
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Field name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field attributes
    #[must_use]
    pub fn flags(&self) -> FieldAttributes {
        self.flags
    }

    /// Returns true for static fields
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    /// Resolved field type, once the owner's layout resolved it
    #[must_use]
    pub fn ty(&self) -> Option<TypeId> {
        self.ty.get().copied()
    }

    /// For fields of generic instantiations, the type as declared on the definition
    #[must_use]
    pub fn definition_type(&self) -> Option<TypeId> {
        self.definition_type.get().copied()
    }

    /// Byte offset from the start of the object (instance fields) or of the static area
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset.get().copied()
    }

    /// Constant or RVA data
    #[must_use]
    pub fn data(&self) -> &FieldData {
        &self.data
    }
}
