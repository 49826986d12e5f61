//! The runtime type system context.
//!
//! [`TypeSystem`] owns every loaded image, every descriptor arena and every cache the loader
//! uses. All loader operations are methods on it; they are spread over the [`crate::loader`],
//! [`crate::generics`], [`crate::layout`], [`crate::interfaces`] and [`crate::vtable`]
//! modules.
//!
//! # Key Components
//!
//! - [`TypeSystem`] - context object, images and global caches
//! - [`ClassDescriptor`], [`MethodDescriptor`], [`FieldDescriptor`] - loaded members
//! - [`TypeCache`] - interner for [`RuntimeType`] values
//! - [`LoaderLock`] / [`Memo`] - serialisation and publish-once primitives
//!
//! # Thread Safety
//!
//! [`TypeSystem`] is [`Send`] + [`Sync`]. Mutation is serialised by a single reentrant loader
//! lock, while published descriptor state is readable without locking.

mod class;
mod field;
mod handles;
mod image;
mod memo;
mod method;
mod primitives;
mod stats;
mod types;

pub use class::{
    ClassDescriptor, ClassFlags, ClassKind, ClassStage, GenericClass, GenericContainer,
    GenericParamDef, InitState,
};
pub use field::{FieldData, FieldDescriptor};
pub use handles::{ClassId, FieldId, ImageId, MethodId};
pub use image::Image;
pub(crate) use image::MemberOwner;
pub use memo::{LoaderLock, Memo};
pub use method::{EventDescriptor, MethodDescriptor, PropertyDescriptor};
pub use primitives::{classify_core_type, fixed_size, PrimitiveInfo, WellKnownClass};
pub use stats::{LoaderStats, StatsSnapshot};
pub use types::{
    GenericContext, GenericInst, GenericOwner, GenericParam, InstId, MethodSignature,
    RuntimeType, SigId, TypeCache, TypeId,
};

use std::{
    sync::{Arc, OnceLock},
    thread::ThreadId,
};

use dashmap::DashMap;

use crate::{
    collaborators::{AotCache, SecurityPolicy},
    config::{FatalPolicy, LoaderConfig},
    interfaces::InterfaceIdAllocator,
    metadata::{
        reader::MetadataReader,
        rows::{
            AssemblyRefRow, ClassLayoutRow, EventRow, FieldRow, GenericParamRow, MemberRefRow,
            MethodDefRow, MethodImplRow, ModuleRefRow, PropertyRow, TypeDefRow, TypeRefRow,
        },
        signatures::TypeSig,
        token::Token,
    },
    Error, LoadError, Result,
};

/// Metadata of the image hosting classes that belong to no image (function pointers)
struct SyntheticMetadata;

impl MetadataReader for SyntheticMetadata {
    fn name(&self) -> &str {
        "<synthetic>"
    }
    fn row_count(&self, _table: u8) -> u32 {
        0
    }
    fn type_def(&self, _rid: u32) -> Option<TypeDefRow> {
        None
    }
    fn type_ref(&self, _rid: u32) -> Option<TypeRefRow> {
        None
    }
    fn type_spec(&self, _rid: u32) -> Option<TypeSig> {
        None
    }
    fn field(&self, _rid: u32) -> Option<FieldRow> {
        None
    }
    fn method_def(&self, _rid: u32) -> Option<MethodDefRow> {
        None
    }
    fn member_ref(&self, _rid: u32) -> Option<MemberRefRow> {
        None
    }
    fn interfaces_of(&self, _type_def: Token) -> Vec<Token> {
        Vec::new()
    }
    fn method_impls_of(&self, _type_def: Token) -> Vec<MethodImplRow> {
        Vec::new()
    }
    fn enclosing_type(&self, _type_def: Token) -> Option<Token> {
        None
    }
    fn nested_types_of(&self, _type_def: Token) -> Vec<Token> {
        Vec::new()
    }
    fn class_layout(&self, _type_def: Token) -> Option<ClassLayoutRow> {
        None
    }
    fn generic_params_of(&self, _owner: Token) -> Vec<GenericParamRow> {
        Vec::new()
    }
    fn properties_of(&self, _type_def: Token) -> Vec<PropertyRow> {
        Vec::new()
    }
    fn events_of(&self, _type_def: Token) -> Vec<EventRow> {
        Vec::new()
    }
    fn assembly_ref(&self, _rid: u32) -> Option<AssemblyRefRow> {
        None
    }
    fn module_ref(&self, _rid: u32) -> Option<ModuleRefRow> {
        None
    }
}

/// The runtime type system: images, descriptors and the caches that make them canonical.
///
/// # Examples
///
/// ```rust
/// use dotclass::{metadata::builder::MetadataBuilder, TypeSystem, WellKnownClass};
///
/// let ts = TypeSystem::default();
/// ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
///
/// let int32 = ts.well_known(WellKnownClass::Int32)?;
/// assert!(ts.init(int32));
/// assert_eq!(ts.class(int32).unwrap().instance_size(), Some(16 + 4));
/// # Ok::<(), dotclass::Error>(())
/// ```
pub struct TypeSystem {
    pub(crate) config: LoaderConfig,
    pub(crate) images: boxcar::Vec<Image>,
    pub(crate) image_names: DashMap<String, ImageId>,
    pub(crate) corlib: OnceLock<ImageId>,
    pub(crate) synthetic: ImageId,
    pub(crate) types: TypeCache,
    pub(crate) instances: DashMap<(ClassId, InstId), ClassId>,
    pub(crate) inflated_methods: DashMap<(MethodId, GenericContext), MethodId>,
    pub(crate) fnptr_cache: DashMap<SigId, ClassId>,
    pub(crate) well_known: DashMap<WellKnownClass, ClassId>,
    pub(crate) interface_ids: InterfaceIdAllocator,
    pub(crate) lock: LoaderLock,
    pub(crate) loader_errors: DashMap<ThreadId, LoadError>,
    pub(crate) security: Option<Arc<dyn SecurityPolicy>>,
    pub(crate) aot: Option<Arc<dyn AotCache>>,
    pub(crate) stats: LoaderStats,
}

impl Default for TypeSystem {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl TypeSystem {
    /// Creates an empty type system
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        let images = boxcar::Vec::new();
        let synthetic = ImageId(images.count() as u32);
        images.push(Image::new(synthetic, Arc::new(SyntheticMetadata)));

        TypeSystem {
            config,
            images,
            image_names: DashMap::new(),
            corlib: OnceLock::new(),
            synthetic,
            types: TypeCache::new(),
            instances: DashMap::new(),
            inflated_methods: DashMap::new(),
            fnptr_cache: DashMap::new(),
            well_known: DashMap::new(),
            interface_ids: InterfaceIdAllocator::new(),
            lock: LoaderLock::new(),
            loader_errors: DashMap::new(),
            security: None,
            aot: None,
            stats: LoaderStats::default(),
        }
    }

    /// Installs the inheritance-security policy
    #[must_use]
    pub fn with_security_policy(mut self, policy: Arc<dyn SecurityPolicy>) -> Self {
        self.security = Some(policy);
        self
    }

    /// Installs the ahead-of-time class-info cache
    #[must_use]
    pub fn with_aot_cache(mut self, cache: Arc<dyn AotCache>) -> Self {
        self.aot = Some(cache);
        self
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The type interner
    #[must_use]
    pub fn types(&self) -> &TypeCache {
        &self.types
    }

    /// The loader lock; holding it blocks all loading on other threads
    #[must_use]
    pub fn loader_lock(&self) -> &LoaderLock {
        &self.lock
    }

    /// A snapshot of the work counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Registers an image.
    ///
    /// An image whose name equals [`LoaderConfig::core_library`] becomes the core library.
    pub fn load_image(&self, reader: Arc<dyn MetadataReader>) -> ImageId {
        let _guard = self.lock.lock();
        let id = ImageId(self.images.count() as u32);
        let name = reader.name().to_string();
        self.images.push(Image::new(id, reader));

        if name == self.config.core_library {
            let _ = self.corlib.set(id);
        }
        log::debug!("loaded image {} as {}", name, id);
        self.image_names.insert(name, id);
        id
    }

    /// Registers an image from any reader
    pub fn load_metadata<R>(&self, reader: R) -> ImageId
    where
        R: MetadataReader + 'static,
    {
        self.load_image(Arc::new(reader))
    }

    /// Unloads an image.
    ///
    /// Its caches are cleared, its interface ids return to the allocator and later
    /// resolution through the image fails with [`Error::ImageUnloaded`]. Descriptors stay in
    /// the arena so outstanding handles remain readable.
    ///
    /// # Errors
    /// Returns [`Error::ImageUnloaded`] if the image was already unloaded.
    pub fn unload_image(&self, id: ImageId) -> Result<()> {
        let _guard = self.lock.lock();
        let image = self.live_image(id)?;

        image.unloaded.store(true, std::sync::atomic::Ordering::Release);
        self.interface_ids.release_image(image);
        image.clear_caches();

        self.instances.retain(|(definition, _), _| definition.image != id);
        self.inflated_methods.retain(|(method, _), _| method.image != id);
        self.well_known.retain(|_, class| class.image != id);
        self.image_names.retain(|_, image_id| *image_id != id);

        log::debug!("unloaded image {} ({})", image.name(), id);
        Ok(())
    }

    /// The image with the given handle, unloaded images included
    #[must_use]
    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images.get(id.0 as usize)
    }

    pub(crate) fn live_image(&self, id: ImageId) -> Result<&Image> {
        let image = self
            .image(id)
            .ok_or_else(|| malformed_error!("image handle {} does not exist", id))?;
        if image.is_unloaded() {
            return Err(Error::ImageUnloaded(id));
        }
        Ok(image)
    }

    /// Looks up a loaded image by assembly name
    #[must_use]
    pub fn image_by_name(&self, name: &str) -> Option<ImageId> {
        self.image_names.get(name).map(|entry| *entry.value())
    }

    /// The core library image, once loaded
    #[must_use]
    pub fn core_library(&self) -> Option<ImageId> {
        self.corlib.get().copied()
    }

    /// The class descriptor behind a handle
    #[must_use]
    pub fn class(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.image(id.image)?.classes.get(id.index as usize)
    }

    /// The method descriptor behind a handle
    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&MethodDescriptor> {
        self.image(id.image)?.methods.get(id.index as usize)
    }

    /// The field descriptor behind a handle, once the class's fields were set up
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.class(id.class)?.fields()?.get(id.index as usize)
    }

    /// Records the calling thread's last loader error
    pub(crate) fn set_loader_error(&self, error: LoadError) {
        self.loader_errors.insert(std::thread::current().id(), error);
    }

    /// Takes and clears the calling thread's last loader error
    pub fn take_loader_error(&self) -> Option<LoadError> {
        self.loader_errors
            .remove(&std::thread::current().id())
            .map(|(_, error)| error)
    }

    /// The calling thread's last loader error, left in place
    #[must_use]
    pub fn peek_loader_error(&self) -> Option<LoadError> {
        self.loader_errors
            .get(&std::thread::current().id())
            .map(|entry| entry.value().clone())
    }

    /// Terminates on an unrecoverable loader condition according to [`LoaderConfig::fatal_policy`]
    pub(crate) fn fatal(&self, error: LoadError) -> ! {
        log::error!("fatal loader error: {}", error);
        match self.config.fatal_policy {
            FatalPolicy::Abort => std::process::abort(),
            FatalPolicy::Panic => panic!("fatal loader error: {error}"),
        }
    }

    /// Resolves a well-known class of the core library
    ///
    /// # Errors
    /// Returns [`Error::TypeNameNotFound`] if no core library is loaded or it lacks the class.
    pub fn well_known(&self, class: WellKnownClass) -> Result<ClassId> {
        if let Some(id) = self.well_known.get(&class).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let corlib = self.core_library().ok_or_else(|| Error::TypeNameNotFound {
            namespace: class.namespace().to_string(),
            name: class.name().to_string(),
        })?;
        let id = self.class_from_name(corlib, class.namespace(), class.name())?;
        self.well_known.insert(class, id);
        Ok(id)
    }

    /// Returns true if `id` is the given well-known class
    pub(crate) fn is_well_known(&self, id: ClassId, class: WellKnownClass) -> bool {
        match self.well_known.get(&class).map(|entry| *entry.value()) {
            Some(known) => known == id,
            None => self.class(id).is_some_and(|c| {
                Some(c.image()) == self.core_library()
                    && c.namespace() == class.namespace()
                    && c.name() == class.name()
                    && c.kind() == ClassKind::Definition
            }),
        }
    }

    /// Interns a runtime type
    pub fn intern(&self, ty: RuntimeType) -> TypeId {
        self.types.intern(ty)
    }

    /// The runtime type of values of `class`
    #[must_use]
    pub fn class_type(&self, id: ClassId) -> TypeId {
        if let Some(ty) = self.class(id).and_then(ClassDescriptor::byval) {
            return ty;
        }
        let is_value = self.class(id).is_some_and(ClassDescriptor::is_valuetype);
        if is_value {
            self.intern(RuntimeType::ValueType(id))
        } else {
            self.intern(RuntimeType::Class(id))
        }
    }

    /// Runs `f` with the loader lock held
    pub fn with_loader_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock();
        f()
    }
}

impl std::fmt::Debug for TypeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeSystem")
            .field("images", &self.images.count())
            .field("types", &self.types.type_count())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}
