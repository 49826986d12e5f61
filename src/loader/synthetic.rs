//! Classes without a `TypeDef` row of their own.
//!
//! Array and pointer classes live in the image of their element class, generic parameter
//! classes in the image of their owner, function pointer classes in the synthetic image.
//! Each kind has its own cache so that a request for the same shape always yields the same
//! class.

use crate::{
    metadata::{flags::TypeAttributes, token::Token},
    typesystem::{
        ClassDescriptor, ClassId, ClassKind, GenericOwner, GenericParam, Image, ImageId,
        RuntimeType, SigId, TypeSystem, WellKnownClass,
    },
    Result,
};

use super::SignatureResolver;

impl TypeSystem {
    /// The single-dimensional, zero-based array class of `element` for rank 1, or the
    /// multi-dimensional array class of the given rank.
    ///
    /// # Errors
    /// Returns an error if `System.Array` can not be loaded.
    pub fn array_class(&self, element: ClassId, rank: u32) -> Result<ClassId> {
        self.bounded_array_class(element, rank, false)
    }

    /// The array class of `element` with the given rank.
    ///
    /// `bounded` distinguishes a rank-1 array with explicit bounds (`T[*]`) from the vector
    /// `T[]`; it is ignored for higher ranks.
    ///
    /// ## Arguments
    /// * 'element' - The element class
    /// * 'rank'    - Number of dimensions, at least 1
    /// * 'bounded' - Rank-1 array with lower bounds
    ///
    /// # Errors
    /// Returns an error if `System.Array` can not be loaded or the rank is 0.
    pub fn bounded_array_class(&self, element: ClassId, rank: u32, bounded: bool) -> Result<ClassId> {
        if rank == 0 {
            return Err(malformed_error!("array rank must be at least 1"));
        }
        let bounded = bounded && rank == 1;
        let key = (element, rank, bounded);

        let elem = class_of!(self, element)?;
        let image = self.live_image(elem.image())?;
        if let Some(id) = image.array_cache.get(&key).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let parent = self.well_known(WellKnownClass::Array)?;
        let _guard = self.lock.lock();
        if let Some(id) = image.array_cache.get(&key).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let suffix = match (rank, bounded) {
            (1, false) => "[]".to_string(),
            (1, true) => "[*]".to_string(),
            _ => format!("[{}]", ",".repeat(rank as usize - 1)),
        };
        let mut class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::Array,
            Token(0),
            elem.namespace.clone(),
            format!("{}{}", elem.name, suffix),
            TypeAttributes::SERIALIZABLE | TypeAttributes::SEALED | elem.flags.visibility(),
        );
        class.rank = rank;

        let element_type = self.class_type(element);
        let byval = if rank == 1 && !bounded {
            RuntimeType::SzArray(element_type)
        } else {
            RuntimeType::Array {
                element: element_type,
                rank,
            }
        };
        let cast_class = if elem.is_enum() {
            elem.element_class().unwrap_or(element)
        } else {
            element
        };

        let _ = class.element_class.set(element);
        let _ = class.cast_class.set(cast_class);
        let _ = class.element_type.set(element_type);
        let _ = class.byval.set(self.intern(byval));

        let id = self.publish_synthetic(image, class, Some(parent))?;
        image.array_cache.insert(key, id);
        Ok(id)
    }

    /// The unmanaged pointer class of `element`
    ///
    /// # Errors
    /// Returns an error if the element class handle is invalid.
    pub fn pointer_class(&self, element: ClassId) -> Result<ClassId> {
        let elem = class_of!(self, element)?;
        let image = self.live_image(elem.image())?;
        if let Some(id) = image.pointer_cache.get(&element).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let _guard = self.lock.lock();
        if let Some(id) = image.pointer_cache.get(&element).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::Pointer,
            Token(0),
            elem.namespace.clone(),
            format!("{}*", elem.name),
            TypeAttributes::PUBLIC | TypeAttributes::SEALED,
        );
        let element_type = self.class_type(element);
        let _ = class.element_class.set(element);
        let _ = class.cast_class.set(element);
        let _ = class.element_type.set(element_type);
        let _ = class.byval.set(self.intern(RuntimeType::Ptr(element_type)));

        let id = self.publish_synthetic(image, class, None)?;
        image.pointer_cache.insert(element, id);
        Ok(id)
    }

    /// The class of a function pointer signature
    ///
    /// # Errors
    /// Returns an error if the synthetic image is unavailable.
    pub fn fnptr_class(&self, signature: SigId) -> Result<ClassId> {
        if let Some(id) = self.fnptr_cache.get(&signature).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let _guard = self.lock.lock();
        if let Some(id) = self.fnptr_cache.get(&signature).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let image = self.live_image(self.synthetic)?;
        let class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::FnPtr,
            Token(0),
            "System".to_string(),
            "MonoFNPtrFakeClass".to_string(),
            TypeAttributes::PUBLIC | TypeAttributes::SEALED,
        );
        let _ = class.byval.set(self.intern(RuntimeType::FnPtr(signature)));

        let id = self.publish_synthetic(image, class, None)?;
        self.fnptr_cache.insert(signature, id);
        Ok(id)
    }

    /// The class standing in for a generic parameter.
    ///
    /// Its parent is the first class constraint (or `System.Object`); the remaining
    /// constraints become its interfaces.
    ///
    /// ## Arguments
    /// * 'param'   - The parameter
    /// * 'is_mvar' - True for method type parameters
    ///
    /// # Errors
    /// Returns an error if a constraint can not be loaded.
    pub fn generic_param_class(&self, param: GenericParam, is_mvar: bool) -> Result<ClassId> {
        let image_id = match param.owner {
            GenericOwner::Class(class) => class.image,
            GenericOwner::Method(method) => method.image,
            GenericOwner::Unbound => self.synthetic,
        };
        let image = self.live_image(image_id)?;
        let key = (param, is_mvar);
        if let Some(id) = image.generic_param_cache.get(&key).map(|entry| *entry.value()) {
            if self.is_settled(id) {
                return Ok(id);
            }
        }

        let _guard = self.lock.lock();
        if let Some(id) = image.generic_param_cache.get(&key).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let declared = self.declared_generic_param(param);
        let name = match &declared {
            Some((name, _, _)) if !name.is_empty() => name.clone(),
            _ if is_mvar => format!("!!{}", param.number),
            _ => format!("!{}", param.number),
        };
        let class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::GenericParameter,
            Token(0),
            String::new(),
            name,
            TypeAttributes::PUBLIC,
        );
        let ty = if is_mvar {
            RuntimeType::MVar(param)
        } else {
            RuntimeType::Var(param)
        };
        let _ = class.byval.set(self.intern(ty));

        let id = image.push_class(class);
        image.generic_param_cache.insert(key, id);
        self.stats.classes_created();

        let mut parent = None;
        let mut interfaces = Vec::new();
        if let Some((_, constraint_image, constraints)) = declared {
            let mut resolver = SignatureResolver::new(self, constraint_image);
            match param.owner {
                GenericOwner::Class(owner) => resolver = resolver.with_class(owner),
                GenericOwner::Method(owner) => {
                    if let Some(method) = self.method(owner) {
                        resolver = resolver.with_class(method.class).with_method(owner);
                    }
                }
                GenericOwner::Unbound => {}
            }
            for token in constraints {
                let constraint = self.class_of_type(resolver.resolve_token(token)?)?;
                let is_interface = class_of!(self, constraint)?.is_interface();
                if parent.is_none() && !is_interface {
                    parent = Some(constraint);
                } else {
                    interfaces.push(constraint);
                }
            }
        }
        let parent = match parent {
            Some(parent) => Some(parent),
            None => self.well_known(WellKnownClass::Object).ok(),
        };

        let class = class_of!(self, id)?;
        self.setup_parent(class, parent)?;
        let _ = class.interfaces.publish(interfaces.into_boxed_slice());
        let _ = class.cast_class.set(id);
        let _ = class.element_class.set(id);
        class.mark_linked();
        Ok(id)
    }

    /// Name, image and constraint tokens of a declared generic parameter
    pub(crate) fn declared_generic_param(
        &self,
        param: GenericParam,
    ) -> Option<(String, ImageId, Vec<Token>)> {
        let (owner_token, image) = match param.owner {
            GenericOwner::Class(class) => {
                let class = self.class(class)?;
                let container = class.generic_container.as_ref()?;
                let declared = container
                    .params
                    .iter()
                    .find(|declared| declared.number == param.number)?;
                return Some((
                    declared.name.clone(),
                    class.image(),
                    declared.constraints.clone(),
                ));
            }
            GenericOwner::Method(method) => {
                let method = self.method(method)?;
                (method.token, method.class.image)
            }
            GenericOwner::Unbound => return None,
        };

        let declared = self
            .live_image(image)
            .ok()?
            .reader()
            .generic_params_of(owner_token)
            .into_iter()
            .find(|declared| declared.number == param.number)?;
        Some((declared.name, image, declared.constraints))
    }

    /// Pushes a synthesized class and links it under `parent`
    fn publish_synthetic(
        &self,
        image: &Image,
        class: ClassDescriptor,
        parent: Option<ClassId>,
    ) -> Result<ClassId> {
        let id = image.push_class(class);
        self.stats.classes_created();
        let class = class_of!(self, id)?;
        self.setup_parent(class, parent)?;
        class.mark_linked();
        log::debug!("created synthetic class {} in {}", self.class_name(id), image.name());
        Ok(id)
    }
}
