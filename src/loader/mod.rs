//! The class loader.
//!
//! Classes are materialized lazily from `TypeDef` rows the first time a token or name refers
//! to them. Creating a class happens in two steps under the loader lock: the descriptor is
//! pushed into the image arena and inserted into the token cache, and only then linked
//! (enclosing class, parent, classification, supertypes). Inserting before linking is what
//! terminates cyclic references such as a nested class deriving from its enclosing class.
//!
//! # Key Components
//!
//! - [`TypeSystem::resolve`] - `TypeDef` / `TypeRef` / `TypeSpec` token to class
//! - [`TypeSystem::class_from_name`] - namespace + name lookup with `Outer/Inner` syntax
//! - [`TypeSystem::class_of_type`] - the class servicing a runtime type
//! - `init` - initialization pipeline (layout, interface offsets, vtable)
//! - `members` - lazily populated fields, methods, properties, events and nested classes
//! - `synthetic` - array, pointer, function-pointer and generic-parameter classes
//! - `query` - subtype tests, names and sizes
//!
//! # Thread Safety
//!
//! Lookups hit lock-free caches. A class found in a cache but not yet linked is only
//! returned after taking the loader lock, which blocks until the loading thread is done.

mod init;
mod members;
mod query;
mod resolver;
mod synthetic;

pub(crate) use resolver::SignatureResolver;

use std::collections::HashMap;

use crate::{
    metadata::{
        rows::{ResolutionScope, TypeDefRow},
        token::{table, Token},
    },
    typesystem::{
        classify_core_type, ClassDescriptor, ClassFlags, ClassId, ClassKind, GenericContainer,
        GenericContext, GenericParamDef, Image, ImageId, RuntimeType, TypeId, TypeSystem,
        WellKnownClass,
    },
    Error::{self, InvalidToken, TypeNameNotFound, TypeNotFound},
    LoadError, Result,
};

impl TypeSystem {
    /// Resolves a `TypeDef`, `TypeRef` or `TypeSpec` token of `image` to a class.
    ///
    /// Resolution is idempotent: the same token always yields the same [`ClassId`]. A class
    /// whose linking failed keeps failing with the recorded error.
    ///
    /// ## Arguments
    /// * 'image' - The image the token belongs to
    /// * 'token' - The type token
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for tokens without a row, [`Error::InvalidToken`] for
    /// tokens of other tables, and [`Error::Load`] if the class or a dependency failed to load.
    pub fn resolve(&self, image: ImageId, token: Token) -> Result<ClassId> {
        let img = self.live_image(image)?;
        match token.table() {
            table::TYPE_DEF => self.resolve_type_def(img, token),
            table::TYPE_REF => self.resolve_type_ref(img, token),
            table::TYPE_SPEC => {
                let ty = SignatureResolver::new(self, image).resolve_token(token)?;
                self.class_of_type(ty)
            }
            _ => Err(InvalidToken(token)),
        }
    }

    /// Resolves a type token and substitutes the generic parameters it mentions.
    ///
    /// Only `TypeSpec` tokens can mention generic parameters; other tokens resolve exactly
    /// like [`TypeSystem::resolve`].
    ///
    /// # Errors
    /// See [`TypeSystem::resolve`].
    pub fn resolve_in_context(
        &self,
        image: ImageId,
        token: Token,
        context: &GenericContext,
    ) -> Result<ClassId> {
        if !token.is_table(table::TYPE_SPEC) || context.is_empty() {
            return self.resolve(image, token);
        }

        let ty = SignatureResolver::new(self, image).resolve_token(token)?;
        let inflated = self.inflate_type(ty, context);
        self.class_of_type(inflated)
    }

    /// Resolves a type token to its runtime type without creating its class.
    ///
    /// # Errors
    /// See [`TypeSystem::resolve`].
    pub fn resolve_type(&self, image: ImageId, token: Token) -> Result<TypeId> {
        self.live_image(image)?;
        SignatureResolver::new(self, image).resolve_token(token)
    }

    /// Looks up a class by namespace and name.
    ///
    /// Nested classes are addressed as `Outer/Inner` (any depth); their namespace is the one
    /// of the outermost class.
    ///
    /// ## Arguments
    /// * 'image'     - The image to search
    /// * 'namespace' - Namespace, empty for the global namespace
    /// * 'name'      - Simple name, or a `/` separated nesting path
    ///
    /// # Errors
    /// Returns [`Error::TypeNameNotFound`] if no such class exists.
    pub fn class_from_name(&self, image: ImageId, namespace: &str, name: &str) -> Result<ClassId> {
        if let Some((outer, inner)) = name.split_once('/') {
            let outer = self.class_from_name(image, namespace, outer)?;
            return self.nested_class_by_path(outer, inner);
        }

        let img = self.live_image(image)?;
        let names = img.name_cache.get_or_compute(&self.lock, || {
            let reader = img.reader();
            let mut names = HashMap::new();
            for rid in 1..=reader.row_count(table::TYPE_DEF) {
                let Some(row) = reader.type_def(rid) else {
                    continue;
                };
                if row.flags.is_nested() {
                    continue;
                }
                names
                    .entry((row.namespace, row.name))
                    .or_insert(Token::from_parts(table::TYPE_DEF, rid));
            }
            names
        });

        match names.get(&(namespace.to_string(), name.to_string())) {
            Some(token) => self.resolve_type_def(img, *token),
            None => Err(TypeNameNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// The class servicing values of a runtime type.
    ///
    /// Primitive types map to their core library classes, constructed types to the
    /// corresponding synthetic or instantiated classes, and byrefs to the class of the
    /// referenced type.
    ///
    /// # Errors
    /// Returns an error if the class can not be created.
    pub fn class_of_type(&self, ty: TypeId) -> Result<ClassId> {
        let runtime = self.types.get(ty);
        match runtime {
            RuntimeType::Class(id) | RuntimeType::ValueType(id) => Ok(id),
            RuntimeType::ByRef(inner) => self.class_of_type(inner),
            RuntimeType::Ptr(inner) => {
                let element = self.class_of_type(inner)?;
                self.pointer_class(element)
            }
            RuntimeType::FnPtr(sig) => self.fnptr_class(sig),
            RuntimeType::SzArray(element) => {
                let element = self.class_of_type(element)?;
                self.array_class(element, 1)
            }
            RuntimeType::Array { element, rank } => {
                let element = self.class_of_type(element)?;
                self.bounded_array_class(element, rank, rank == 1)
            }
            RuntimeType::GenericInst {
                definition, args, ..
            } => {
                let args = self.types.inst(args).args;
                self.instantiate(definition, &args)
            }
            RuntimeType::Var(param) => self.generic_param_class(param, false),
            RuntimeType::MVar(param) => self.generic_param_class(param, true),
            other => {
                let class = WellKnownClass::for_primitive(other)
                    .ok_or_else(|| malformed_error!("type {:?} has no class", other))?;
                self.well_known(class)
            }
        }
    }

    fn resolve_type_def(&self, image: &Image, token: Token) -> Result<ClassId> {
        if let Some(id) = image.cached_class(token) {
            if self.is_settled(id) {
                return self.checked(id);
            }
        }

        let _guard = self.lock.lock();
        if let Some(id) = image.cached_class(token) {
            return self.checked(id);
        }

        let row = image
            .reader()
            .type_def(token.row())
            .ok_or(TypeNotFound(token))?;
        let id = self.create_from_type_def(image, token, row)?;
        self.checked(id)
    }

    /// A cached class may be handed out without the lock once linking concluded
    pub(crate) fn is_settled(&self, id: ClassId) -> bool {
        self.class(id).is_some_and(ClassDescriptor::is_settled)
    }

    fn checked(&self, id: ClassId) -> Result<ClassId> {
        let class = class_of!(self, id)?;
        if class.link_failed() {
            if let Some(error) = class.failure() {
                return Err(Error::Load(error.clone()));
            }
        }
        Ok(id)
    }

    fn create_from_type_def(&self, image: &Image, token: Token, row: TypeDefRow) -> Result<ClassId> {
        let reader = image.reader();
        let next = reader.type_def(token.row() + 1);
        let field_end = next
            .as_ref()
            .map_or(reader.row_count(table::FIELD) + 1, |next| next.field_list);
        let method_end = next
            .as_ref()
            .map_or(reader.row_count(table::METHOD_DEF) + 1, |next| next.method_list);

        let mut class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::Definition,
            token,
            row.namespace,
            row.name,
            row.flags,
        );
        class.field_range = row.field_list..field_end.max(row.field_list);
        class.method_range = row.method_list..method_end.max(row.method_list);

        let params = reader.generic_params_of(token);
        if !params.is_empty() {
            class.generic_container = Some(GenericContainer {
                params: params
                    .into_iter()
                    .map(|param| GenericParamDef {
                        number: param.number,
                        name: param.name,
                        flags: param.flags,
                        constraints: param.constraints,
                    })
                    .collect(),
            });
        }

        let in_corlib = Some(image.id()) == self.core_library();
        if in_corlib && class.namespace == "System" && class.name == "Array" {
            class.reserved_size = self.config.pointer_size * 2;
        }

        let id = image.push_class(class);
        image.class_cache.insert(token, id);
        self.stats.classes_created();
        log::debug!("created class {} for {} in {}", id, token, image.name());

        if let Err(error) = self.link_definition(image, id, row.extends) {
            let class = class_of!(self, id)?;
            let recorded = class.record_link_failure(error.into_load_error()).clone();
            return Err(Error::Load(recorded));
        }
        class_of!(self, id)?.mark_linked();
        Ok(id)
    }

    fn link_definition(&self, image: &Image, id: ClassId, extends: Token) -> Result<()> {
        let class = class_of!(self, id)?;
        let reader = image.reader();

        let enclosing = match reader.enclosing_type(class.token) {
            Some(enclosing) => Some(self.resolve(image.id(), enclosing)?),
            None => None,
        };
        let _ = class.nested_in.set(enclosing);

        let parent = if extends.is_null() || class.is_interface() {
            None
        } else {
            let ty = SignatureResolver::new(self, image.id())
                .with_class(id)
                .resolve_token(extends)?;
            let parent = self.class_of_type(ty)?;
            let parent_class = class_of!(self, parent)?;
            if parent_class.supertypes().is_empty() {
                bail_load!(
                    TypeLoad,
                    "circular inheritance between {} and {}",
                    self.class_name(id),
                    self.class_name(parent)
                );
            }
            if parent_class.is_interface() {
                bail_load!(
                    TypeLoad,
                    "{} extends the interface {}",
                    self.class_name(id),
                    self.class_name(parent)
                );
            }
            Some(parent)
        };

        self.setup_parent(class, parent)?;
        self.classify_definition(image, class);

        if class.is_interface() {
            self.assign_interface_id(class)?;
        }
        if class.is_enum() {
            self.setup_enum_basetype(image, class)?;
        }
        Ok(())
    }

    /// Publishes the parent, inherited classification bits and the supertypes array
    pub(crate) fn setup_parent(&self, class: &ClassDescriptor, parent: Option<ClassId>) -> Result<()> {
        let _ = class.parent.set(parent);
        let mut supertypes = Vec::new();

        if let Some(parent_id) = parent {
            let parent = class_of!(self, parent_id)?;
            class.set_class_flags(
                parent.class_flags()
                    & (ClassFlags::MARSHALBYREF | ClassFlags::CONTEXTBOUND | ClassFlags::DELEGATE),
            );

            if self.is_well_known(parent_id, WellKnownClass::Enum) {
                class.set_class_flags(ClassFlags::VALUETYPE | ClassFlags::ENUMTYPE);
            } else if parent.is_enum()
                || (self.is_well_known(parent_id, WellKnownClass::ValueType)
                    && !self.is_well_known(class.id, WellKnownClass::Enum))
            {
                class.set_class_flags(ClassFlags::VALUETYPE);
            }
            supertypes.extend_from_slice(parent.supertypes());
        }

        if class.kind == ClassKind::Definition
            && class.namespace == "System"
            && Some(class.image()) == self.core_library()
        {
            match class.name.as_str() {
                "MarshalByRefObject" => class.set_class_flags(ClassFlags::MARSHALBYREF),
                "ContextBoundObject" => class.set_class_flags(ClassFlags::CONTEXTBOUND),
                "Delegate" => class.set_class_flags(ClassFlags::DELEGATE),
                _ => {}
            }
        }

        supertypes.push(class.id);
        let _ = class.supertypes.set(supertypes.into_boxed_slice());
        Ok(())
    }

    /// Sets the canonical runtime type and the core library specific bits
    fn classify_definition(&self, image: &Image, class: &ClassDescriptor) {
        if class.name == "<Module>" && class.namespace.is_empty() {
            class.set_class_flags(ClassFlags::MODULE_TYPE);
        }

        let core = (Some(image.id()) == self.core_library() && class.namespace == "System")
            .then(|| classify_core_type(&class.name))
            .flatten();

        let byval = match core {
            Some(info) => {
                if info.blittable {
                    class.set_class_flags(ClassFlags::BLITTABLE_PRIMITIVE);
                }
                info.byval
            }
            None if class.is_valuetype() => RuntimeType::ValueType(class.id),
            None => RuntimeType::Class(class.id),
        };
        let _ = class.byval.set(self.intern(byval));
    }

    /// Reads the underlying type of an enumeration from its first instance field
    fn setup_enum_basetype(&self, image: &Image, class: &ClassDescriptor) -> Result<()> {
        let reader = image.reader();
        let basetype = class
            .field_range
            .clone()
            .filter_map(|rid| reader.field(rid))
            .find(|field| !field.flags.is_static());

        let Some(field) = basetype else {
            bail_load!(
                TypeLoad,
                "enumeration {} has no instance field",
                self.class_name(class.id)
            );
        };

        let ty = SignatureResolver::new(self, image.id())
            .with_class(class.id)
            .resolve(&field.signature)?;
        let element = self.class_of_type(ty)?;
        let _ = class.enum_basetype.set(ty);
        let _ = class.element_class.set(element);
        let _ = class.cast_class.set(element);
        Ok(())
    }

    fn resolve_type_ref(&self, image: &Image, token: Token) -> Result<ClassId> {
        if let Some(id) = image.typeref_cache.get(&token).map(|entry| *entry.value()) {
            return self.checked(id);
        }

        let reader = image.reader();
        let row = reader.type_ref(token.row()).ok_or(TypeNotFound(token))?;
        let resolved = match row.scope {
            ResolutionScope::Module => self.class_from_name(image.id(), &row.namespace, &row.name),
            ResolutionScope::TypeRef(enclosing) => {
                let outer = self.resolve_type_ref(image, enclosing)?;
                self.nested_class_by_path(outer, &row.name)
            }
            ResolutionScope::ModuleRef(rid) => {
                let module = reader
                    .module_ref(rid)
                    .ok_or_else(|| malformed_error!("ModuleRef {} is missing", rid))?;
                let target = self.dependency(image, &module.name)?;
                self.class_from_name(target, &row.namespace, &row.name)
            }
            ResolutionScope::AssemblyRef(rid) => {
                let assembly = reader
                    .assembly_ref(rid)
                    .ok_or_else(|| malformed_error!("AssemblyRef {} is missing", rid))?;
                let target = self.dependency(image, &assembly.name)?;
                self.class_from_name(target, &row.namespace, &row.name)
            }
        }?;

        image.typeref_cache.insert(token, resolved);
        Ok(resolved)
    }

    /// The loaded image named `name`, recording an `AssemblyLoad` failure when it is missing
    fn dependency(&self, image: &Image, name: &str) -> Result<ImageId> {
        if let Some(target) = self.image_by_name(name) {
            return Ok(target);
        }

        let error = load_error!(
            AssemblyLoad,
            "could not load '{}' referenced by '{}'",
            name,
            image.name()
        );
        self.set_loader_error(error.clone());
        Err(Error::Load(error))
    }

    /// Finds a class nested in `outer` by a `/` separated path of simple names
    fn nested_class_by_path(&self, outer: ClassId, path: &str) -> Result<ClassId> {
        let (name, rest) = match path.split_once('/') {
            Some((name, rest)) => (name, Some(rest)),
            None => (path, None),
        };

        let found = self
            .nested_classes(outer)?
            .iter()
            .copied()
            .find(|nested| self.class(*nested).is_some_and(|class| class.name() == name));

        match (found, rest) {
            (Some(nested), Some(rest)) => self.nested_class_by_path(nested, rest),
            (Some(nested), None) => Ok(nested),
            (None, _) => {
                let outer = class_of!(self, outer)?;
                Err(TypeNameNotFound {
                    namespace: outer.namespace().to_string(),
                    name: format!("{}/{}", outer.name(), path),
                })
            }
        }
    }

    /// Assigns the interface id of an interface class
    pub(crate) fn assign_interface_id(&self, class: &ClassDescriptor) -> Result<u32> {
        if let Some(id) = class.interface_id() {
            return Ok(id);
        }
        let image = self.live_image(class.image())?;
        let id = self.interface_ids.assign(image);
        let _ = class.interface_id.set(id);
        Ok(id)
    }

    /// Records a failed load on the calling thread unless a more specific error is pending
    pub(crate) fn note_loader_error(&self, error: &LoadError) {
        if self.peek_loader_error().is_none() {
            self.set_loader_error(error.clone());
        }
    }
}
