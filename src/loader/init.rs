//! Class initialization: layout, interface offsets and vtable, run once per class.

use rayon::prelude::*;

use crate::{
    collaborators::CachedClassInfo,
    metadata::token::{table, Token},
    typesystem::{
        ClassDescriptor, ClassFlags, ClassId, ImageId, InitState, TypeSystem, WellKnownClass,
    },
    Error, Result,
};

impl TypeSystem {
    /// Initializes a class so it is usable: computes its field layout, interface offsets and
    /// vtable, initializing the parent (and for instantiations the definition) first.
    ///
    /// Initialization runs at most once. A failure is recorded on the class and every later
    /// call returns `false` without retrying.
    ///
    /// Re-entering `init` for a class whose initialization is already running on the current
    /// thread is a cyclic initialization and terminates according to
    /// [`crate::LoaderConfig::fatal_policy`].
    ///
    /// ## Arguments
    /// * 'id' - The class to initialize
    ///
    /// Returns `true` if the class is usable.
    pub fn init(&self, id: ClassId) -> bool {
        let Some(class) = self.class(id) else {
            return false;
        };
        match class.init_state() {
            InitState::InitedOk => return true,
            InitState::InitedFailed => return false,
            _ => {}
        }

        let _guard = self.lock.lock();
        match class.init_state() {
            InitState::InitedOk => return true,
            InitState::InitedFailed => return false,
            InitState::InitPending => self.fatal(load_error!(
                FatalCyclicInit,
                "cyclic initialization of {}",
                self.class_name(id)
            )),
            InitState::Uninitialized => {}
        }
        if let Some(failure) = class.failure() {
            log::debug!("{}: not initialized, {}", self.class_name(id), failure);
            class.set_init_state(InitState::InitedFailed);
            self.stats.inits_failed();
            return false;
        }

        class.set_init_state(InitState::InitPending);
        match self.run_init(class) {
            Ok(()) => {
                class.set_init_state(InitState::InitedOk);
                self.stats.inits_completed();
                log::debug!("{}: initialized", self.class_name(id));
                true
            }
            Err(error) => {
                let failure = class.record_failure(error.into_load_error());
                self.note_loader_error(failure);
                class.set_init_state(InitState::InitedFailed);
                self.stats.inits_failed();
                false
            }
        }
    }

    /// Like [`TypeSystem::init`], but returns the recorded failure
    ///
    /// # Errors
    /// Returns [`Error::Load`] with the failure recorded on the class.
    pub fn ensure_initialized(&self, id: ClassId) -> Result<()> {
        if self.init(id) {
            return Ok(());
        }
        let class = class_of!(self, id)?;
        match class.failure() {
            Some(failure) => Err(Error::Load(failure.clone())),
            None => bail_load!(TypeLoad, "{} failed to initialize", self.class_name(id)),
        }
    }

    /// Resolves and initializes every type defined by an image, in parallel.
    ///
    /// Returns the classes that initialized successfully, in `TypeDef` order. Types that fail
    /// keep their recorded failure and are left out.
    ///
    /// # Errors
    /// Returns [`Error::ImageUnloaded`] if the image was unloaded.
    pub fn load_all(&self, image: ImageId) -> Result<Vec<ClassId>> {
        let count = self.live_image(image)?.reader().row_count(table::TYPE_DEF);
        let loaded: Vec<Option<ClassId>> = (1..=count)
            .into_par_iter()
            .map(|rid| {
                let token = Token::from_parts(table::TYPE_DEF, rid);
                match self.resolve(image, token) {
                    Ok(class) => self.init(class).then_some(class),
                    Err(error) => {
                        log::warn!("{}: {}", token, error);
                        None
                    }
                }
            })
            .collect();
        Ok(loaded.into_iter().flatten().collect())
    }

    fn run_init(&self, class: &ClassDescriptor) -> Result<()> {
        let id = class.id;
        if let Some(generic) = class.generic_class {
            if !self.init(generic.definition) {
                bail_load!(
                    TypeLoad,
                    "generic definition {} failed to initialize",
                    self.class_name(generic.definition)
                );
            }
            self.class_methods(id)?;
            self.class_properties(id)?;
        }

        if let Some(parent) = class.parent() {
            if !self.init(parent) {
                bail_load!(
                    TypeLoad,
                    "parent {} of {} failed to initialize",
                    self.class_name(parent),
                    self.class_name(id)
                );
            }
        }

        for interface in self.class_interfaces(id)? {
            if !self.init(*interface) {
                bail_load!(
                    TypeLoad,
                    "interface {} of {} failed to initialize",
                    self.class_name(*interface),
                    self.class_name(id)
                );
            }
        }

        self.layout_fields(id)?;

        match self.cached_class_info(id) {
            Some(info) => self.init_from_cache(class, &info)?,
            None => {
                self.build_vtable(id)?;
                self.classify_overrides(class)?;
            }
        }

        if self
            .class_methods(id)?
            .iter()
            .any(|method| self.method(*method).is_some_and(|m| m.is_type_initializer()))
        {
            class.set_class_flags(ClassFlags::HAS_CCTOR);
        }
        Ok(())
    }

    /// Publishes the cached vtable facts; the vtable itself is built on first request
    fn init_from_cache(&self, class: &ClassDescriptor, info: &CachedClassInfo) -> Result<()> {
        let start = class
            .parent()
            .and_then(|parent| self.class(parent)?.vtable_size())
            .unwrap_or(0);
        if class.is_interface() {
            self.build_vtable(class.id)?;
        } else {
            self.compute_offsets(class.id, start)?;
            let _ = class.vtable_size.set(info.vtable_size);
        }

        let mut flags = ClassFlags::empty();
        flags.set(ClassFlags::HAS_FINALIZER, info.has_finalizer);
        flags.set(ClassFlags::HAS_CCTOR, info.has_cctor);
        flags.set(ClassFlags::HAS_NESTED_TYPES, info.has_nested_types);
        class.set_class_flags(flags);
        Ok(())
    }

    /// Sets `HAS_FINALIZER` and `GHCIMPL` by comparing the vtable with `System.Object`'s
    fn classify_overrides(&self, class: &ClassDescriptor) -> Result<()> {
        if class.is_interface() || class.parent().is_none() {
            return Ok(());
        }
        let Ok(object) = self.well_known(WellKnownClass::Object) else {
            return Ok(());
        };
        let object_vtable = self.ensure_vtable(object)?.clone();
        let vtable = self.ensure_vtable(class.id)?;

        for (name, flag) in [
            ("Finalize", ClassFlags::HAS_FINALIZER),
            ("GetHashCode", ClassFlags::GHCIMPL),
        ] {
            let Some(slot) = self
                .method_from_name(object, name, Some(0))?
                .and_then(|method| self.method(method)?.slot())
            else {
                continue;
            };
            let slot = slot as usize;
            if vtable.get(slot) != object_vtable.get(slot) {
                class.set_class_flags(flag);
            }
        }
        Ok(())
    }
}
