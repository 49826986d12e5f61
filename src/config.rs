//! Loader configuration
//!
//! This module provides the knobs that influence how classes are laid out and how the loader
//! reacts to unrecoverable conditions. The defaults describe a 64-bit runtime with GC-aware
//! field ordering, mirroring what a production runtime does on that platform.

/// What the loader does when it hits an unrecoverable invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Log the failure and abort the process
    Abort,
    /// Log the failure and panic the current thread
    Panic,
}

/// Configuration of a [`crate::TypeSystem`]
///
/// The layout-related settings must match the runtime that consumes the produced
/// descriptors, since they decide field offsets and object sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct LoaderConfig {
    /// Size of a native pointer and of an object reference in bytes (default: 8)
    pub pointer_size: u32,

    /// Alignment of 64-bit primitives (`int64`, `uint64`, `float64`) in bytes (default: 8)
    /// Some 32-bit ABIs align them to 4
    pub int64_alignment: u32,

    /// Place reference fields before all other fields in auto-layout reference types
    /// so the collector can scan a single contiguous run (default: true)
    pub gc_aware_layout: bool,

    /// Namespace and name of a type exempt from GC-aware ordering because native code
    /// depends on its declaration-order layout
    pub gc_aware_exempt: Option<(String, String)>,

    /// Simple name of the assembly that defines `System.Object` (default: "mscorlib")
    pub core_library: String,

    /// Consult the security policy at every override and interface implementation (default: false)
    pub enforce_security: bool,

    /// Reaction to fatal loader conditions (default: abort)
    pub fatal_policy: FatalPolicy,

    /// Dump every constructed vtable at `trace` level (default: false)
    pub trace_vtables: bool,

    /// Maximum nesting depth of constructed types such as `T[][]...` or `G<G<...>>` (default: 64)
    pub max_type_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            pointer_size: 8,
            int64_alignment: 8,
            gc_aware_layout: true,
            gc_aware_exempt: Some(("System".to_string(), "MonoType".to_string())),
            core_library: "mscorlib".to_string(),
            enforce_security: false,
            fatal_policy: FatalPolicy::Abort,
            trace_vtables: false,
            max_type_depth: 64,
        }
    }
}

impl LoaderConfig {
    /// Creates a configuration for a 32-bit runtime
    ///
    /// Pointers and references are 4 bytes and 64-bit primitives are 4-byte aligned.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            pointer_size: 4,
            int64_alignment: 4,
            ..Self::default()
        }
    }

    /// Creates a configuration that enforces inheritance security demands
    #[must_use]
    pub fn strict() -> Self {
        Self {
            enforce_security: true,
            ..Self::default()
        }
    }

    /// Creates a configuration suited for hosts that must survive fatal loader conditions
    ///
    /// Fatal conditions panic instead of aborting, so test harnesses and embedders can catch
    /// them with [`std::panic::catch_unwind`].
    #[must_use]
    pub fn testing() -> Self {
        Self {
            fatal_policy: FatalPolicy::Panic,
            ..Self::default()
        }
    }

    /// Sets the name of the core library
    #[must_use]
    pub fn with_core_library(mut self, name: impl Into<String>) -> Self {
        self.core_library = name.into();
        self
    }

    /// Enables or disables GC-aware field ordering
    #[must_use]
    pub fn with_gc_aware_layout(mut self, enabled: bool) -> Self {
        self.gc_aware_layout = enabled;
        self
    }

    /// Size of the object header preceding instance fields (vtable pointer + sync word)
    #[must_use]
    pub fn header_size(&self) -> u32 {
        self.pointer_size * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.pointer_size, 8);
        assert_eq!(config.header_size(), 16);
        assert!(config.gc_aware_layout);
        assert!(!config.enforce_security);
        assert_eq!(config.fatal_policy, FatalPolicy::Abort);
        assert_eq!(config.core_library, "mscorlib");
    }

    #[test]
    fn test_compact_config() {
        let config = LoaderConfig::compact();
        assert_eq!(config.pointer_size, 4);
        assert_eq!(config.int64_alignment, 4);
        assert_eq!(config.header_size(), 8);
    }

    #[test]
    fn test_presets() {
        assert!(LoaderConfig::strict().enforce_security);
        assert_eq!(LoaderConfig::testing().fatal_policy, FatalPolicy::Panic);

        let config = LoaderConfig::default()
            .with_core_library("System.Private.CoreLib")
            .with_gc_aware_layout(false);
        assert_eq!(config.core_library, "System.Private.CoreLib");
        assert!(!config.gc_aware_layout);
    }
}
