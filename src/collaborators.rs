//! Services the loader consults but does not implement.
//!
//! A host plugs in an inheritance-security policy and an ahead-of-time class-info cache
//! through [`crate::TypeSystem::with_security_policy`] and
//! [`crate::TypeSystem::with_aot_cache`]. Both are optional.

use crate::{
    metadata::token::Token,
    typesystem::{ClassId, MethodId, TypeSystem},
};

/// Decides whether a class may override or implement a method.
///
/// Called by the vtable builder at every point where a method of `derived` is matched to a
/// declaration (`base_method`) it overrides or implements, but only when
/// [`crate::LoaderConfig::enforce_security`] is set. A rejection marks `derived` failed with
/// [`crate::LoadErrorKind::SecurityInheritanceDemand`].
pub trait SecurityPolicy: Send + Sync {
    /// Checks the inheritance demand of `base_method` against `derived`
    ///
    /// # Errors
    /// Returns a description of the violated demand.
    fn check_inheritance_demand(
        &self,
        ts: &TypeSystem,
        derived: ClassId,
        base_method: MethodId,
    ) -> Result<(), String>;
}

/// Precomputed layout facts of a class.
///
/// The values must be exactly what the general layout and vtable paths would compute for the
/// same class under the same [`crate::LoaderConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CachedClassInfo {
    /// Instance size including the object header
    pub instance_size: u32,
    /// Size of the static field area
    pub class_size: u32,
    /// Number of vtable slots
    pub vtable_size: u32,
    /// `ClassLayout` packing size
    pub packing_size: u32,
    /// Minimum alignment of instance data
    pub min_align: u32,
    /// Native representation equals managed representation
    pub blittable: bool,
    /// Instances contain managed references
    pub has_references: bool,
    /// Static fields contain managed references
    pub has_static_refs: bool,
    /// A `Finalize` override exists
    pub has_finalizer: bool,
    /// A `.cctor` exists
    pub has_cctor: bool,
    /// Token of the `.cctor`, if any
    pub cctor_token: Option<Token>,
    /// Token of the finalizer override, if any
    pub finalizer_token: Option<Token>,
    /// The class declares nested types
    pub has_nested_types: bool,
}

/// Supplies precomputed class information from an ahead-of-time compiled image
pub trait AotCache: Send + Sync {
    /// Cached information for `class`, or `None` to use the general path
    fn try_get_cached_class_info(&self, ts: &TypeSystem, class: ClassId)
        -> Option<CachedClassInfo>;
}
