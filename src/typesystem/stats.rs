use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of loader work, readable at any time
#[derive(Debug, Default)]
pub struct LoaderStats {
    classes_created: AtomicU64,
    generic_instances: AtomicU64,
    inflated_methods: AtomicU64,
    layouts_computed: AtomicU64,
    vtables_built: AtomicU64,
    inits_completed: AtomicU64,
    inits_failed: AtomicU64,
}

/// A point-in-time copy of [`LoaderStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Class descriptors created, synthetic classes included
    pub classes_created: u64,
    /// Generic class instantiations created
    pub generic_instances: u64,
    /// Inflated method descriptors created
    pub inflated_methods: u64,
    /// Field layout runs
    pub layouts_computed: u64,
    /// VTables constructed
    pub vtables_built: u64,
    /// Initializations that reached `InitedOk`
    pub inits_completed: u64,
    /// Initializations that reached `InitedFailed`
    pub inits_failed: u64,
}

macro_rules! counter {
    ($name:ident) => {
        pub(crate) fn $name(&self) {
            self.$name.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl LoaderStats {
    counter!(classes_created);
    counter!(generic_instances);
    counter!(inflated_methods);
    counter!(layouts_computed);
    counter!(vtables_built);
    counter!(inits_completed);
    counter!(inits_failed);

    /// Copies the current counter values
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            classes_created: self.classes_created.load(Ordering::Relaxed),
            generic_instances: self.generic_instances.load(Ordering::Relaxed),
            inflated_methods: self.inflated_methods.load(Ordering::Relaxed),
            layouts_computed: self.layouts_computed.load(Ordering::Relaxed),
            vtables_built: self.vtables_built.load(Ordering::Relaxed),
            inits_completed: self.inits_completed.load(Ordering::Relaxed),
            inits_failed: self.inits_failed.load(Ordering::Relaxed),
        }
    }
}
