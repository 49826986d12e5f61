//! # dotclass Prelude
//!
//! The types needed to load metadata, resolve classes and inspect their layout and dispatch
//! tables. Import it with `use dotclass::prelude::*;`.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotclass operations
pub use crate::Error;

/// The result type used throughout dotclass
pub use crate::Result;

/// Class load failures
pub use crate::{LoadError, LoadErrorKind};

/// Loader configuration
pub use crate::{FatalPolicy, LoaderConfig};

// ================================================================================================
// Type System
// ================================================================================================

/// The type system context
pub use crate::typesystem::TypeSystem;

/// Descriptor handles
pub use crate::typesystem::{ClassId, FieldId, ImageId, MethodId};

/// Loaded descriptors
pub use crate::typesystem::{
    ClassDescriptor, ClassFlags, ClassKind, ClassStage, FieldDescriptor, InitState,
    MethodDescriptor,
};

/// Interned runtime types
pub use crate::typesystem::{
    GenericContext, GenericOwner, GenericParam, MethodSignature, RuntimeType, SigId, TypeId,
};

/// Core library classes the loader knows by name
pub use crate::typesystem::WellKnownClass;

// ================================================================================================
// Metadata
// ================================================================================================

/// Metadata tokens
pub use crate::metadata::token::Token;

/// Row-level metadata access
pub use crate::metadata::reader::MetadataReader;

/// In-memory metadata construction
pub use crate::metadata::builder::{InMemoryMetadata, MetadataBuilder, TypeDefBuilder};

/// Signatures in token form
pub use crate::metadata::signatures::{MemberSig, MethodSig, TypeSig};

/// ECMA-335 attribute sets
pub use crate::metadata::flags::{FieldAttributes, MethodAttributes, TypeAttributes};

// ================================================================================================
// Layout and Dispatch
// ================================================================================================

/// Field layout results
pub use crate::layout::{InstanceLayout, StaticLayout};

/// Interface offset tables
pub use crate::interfaces::{InterfaceOffsetEntry, InterfaceOffsets};

/// Signature comparison mode
pub use crate::vtable::SigMatch;

/// Host collaborators
pub use crate::collaborators::{AotCache, CachedClassInfo, SecurityPolicy};
