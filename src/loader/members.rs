//! Lazily populated class members and member token resolution.
//!
//! Every member list is published once through a [`crate::typesystem::Memo`]. Generic
//! instantiations mirror the lists of their definition: fields are copied and get inflated
//! types on demand, methods are inflated eagerly when the list is first requested.

use std::sync::{atomic::AtomicI32, Arc, OnceLock};

use crate::{
    metadata::{
        flags::{MethodAttributes, MethodImplAttributes},
        rows::MemberRefRow,
        signatures::MemberSig,
        token::{table, Token},
    },
    typesystem::{
        ClassDescriptor, ClassFlags, ClassId, ClassKind, EventDescriptor, FieldData,
        FieldDescriptor, FieldId, GenericContext, Image, ImageId, MemberOwner, MethodDescriptor,
        MethodId, MethodSignature, PropertyDescriptor, RuntimeType, SigId, TypeId, TypeSystem,
    },
    vtable::SigMatch,
    Error::{self, InvalidToken},
    Result,
};

use super::SignatureResolver;

impl TypeSystem {
    /// The fields of a class, in declaration order.
    ///
    /// Field types are resolved separately through [`TypeSystem::field_type`].
    ///
    /// # Errors
    /// Returns an error if the class handle is invalid or a definition row is missing.
    pub fn class_fields(&self, id: ClassId) -> Result<&[FieldDescriptor]> {
        let class = class_of!(self, id)?;
        let fields = class.fields.try_get_or_compute(&self.lock, || {
            match (class.kind, class.generic_class) {
                (ClassKind::Definition, _) => self.definition_fields(class),
                (ClassKind::GenericInstance, Some(generic)) => {
                    let fields = self
                        .class_fields(generic.definition)?
                        .iter()
                        .map(|field| {
                            FieldDescriptor::new(
                                id,
                                field.token,
                                field.name.clone(),
                                field.flags,
                                field.signature.clone(),
                                field.explicit_offset,
                                field.data.clone(),
                            )
                        })
                        .collect();
                    Ok(fields)
                }
                _ => Ok(Box::default()),
            }
        })?;
        Ok(fields)
    }

    fn definition_fields(&self, class: &ClassDescriptor) -> Result<Box<[FieldDescriptor]>> {
        let image = self.live_image(class.image())?;
        let reader = image.reader();

        class
            .field_range
            .clone()
            .map(|rid| {
                let row = reader
                    .field(rid)
                    .ok_or_else(|| malformed_error!("Field row {} is missing", rid))?;
                let data = match (row.rva, row.constant) {
                    (Some(rva), _) => FieldData::Rva(rva),
                    (None, Some(value)) => FieldData::Constant(Arc::from(value)),
                    (None, None) => FieldData::None,
                };
                Ok(FieldDescriptor::new(
                    class.id,
                    Token::from_parts(table::FIELD, rid),
                    row.name,
                    row.flags,
                    row.signature,
                    row.offset,
                    data,
                ))
            })
            .collect()
    }

    /// The resolved type of a field.
    ///
    /// Fields of generic instantiations get the definition's type with the instantiation's
    /// arguments substituted; the unsubstituted type stays available as
    /// [`FieldDescriptor::definition_type`].
    ///
    /// # Errors
    /// Returns an error if the field does not exist or its type fails to load.
    pub fn field_type(&self, field: FieldId) -> Result<TypeId> {
        let class = class_of!(self, field.class)?;
        let descriptor = self
            .class_fields(field.class)?
            .get(field.index as usize)
            .ok_or_else(|| malformed_error!("field {} of {} does not exist", field.index, field.class))?;
        if let Some(ty) = descriptor.ty() {
            return Ok(ty);
        }

        let ty = match class.generic_class {
            Some(generic) => {
                let definition = self.field_type(FieldId {
                    class: generic.definition,
                    index: field.index,
                })?;
                let _ = descriptor.definition_type.set(definition);
                self.inflate_type(definition, &generic.context())
            }
            None => SignatureResolver::new(self, class.image())
                .with_class(field.class)
                .resolve(&descriptor.signature)?,
        };
        Ok(*descriptor.ty.get_or_init(|| ty))
    }

    /// The methods of a class, in declaration order.
    ///
    /// Array classes get their runtime-provided constructors and accessors.
    ///
    /// # Errors
    /// Returns an error if a method of a generic instantiation can not be inflated.
    pub fn class_methods(&self, id: ClassId) -> Result<&[MethodId]> {
        let class = class_of!(self, id)?;
        let methods = class.methods.try_get_or_compute(&self.lock, || {
            match (class.kind, class.generic_class) {
                (ClassKind::Definition, _) => self.definition_methods(class),
                (ClassKind::GenericInstance, Some(generic)) => {
                    let context = generic.context();
                    self.class_methods(generic.definition)?
                        .iter()
                        .map(|method| self.inflate_method(*method, Some(id), &context))
                        .collect()
                }
                (ClassKind::Array, _) => self.array_methods(class),
                _ => Ok(Box::default()),
            }
        })?;
        Ok(methods)
    }

    fn definition_methods(&self, class: &ClassDescriptor) -> Result<Box<[MethodId]>> {
        let image = self.live_image(class.image())?;
        let reader = image.reader();

        class
            .method_range
            .clone()
            .map(|rid| {
                let token = Token::from_parts(table::METHOD_DEF, rid);
                if let Some(existing) = image.method_cache.get(&token) {
                    return Ok(*existing.value());
                }

                let row = reader
                    .method_def(rid)
                    .ok_or_else(|| malformed_error!("MethodDef row {} is missing", rid))?;
                let id = image.push_method(MethodDescriptor {
                    id: image.next_method_id(),
                    token,
                    class: class.id,
                    name: row.name,
                    flags: row.flags,
                    impl_flags: row.impl_flags,
                    generic_param_count: row.signature.generic_param_count,
                    raw_signature: Some(row.signature),
                    signature: OnceLock::new(),
                    slot: AtomicI32::new(-1),
                    declaring: None,
                    context: None,
                });
                image.method_cache.insert(token, id);
                Ok(id)
            })
            .collect()
    }

    /// Constructors and element accessors every array class provides
    fn array_methods(&self, class: &ClassDescriptor) -> Result<Box<[MethodId]>> {
        let image = self.live_image(class.image())?;
        let element = class
            .element_type()
            .ok_or_else(|| malformed_error!("array class {} has no element type", class.id))?;
        let int32 = self.intern(RuntimeType::I4);
        let void = self.intern(RuntimeType::Void);
        let rank = class.rank as usize;
        let indices = vec![int32; rank];

        let ctor_flags = MethodAttributes::PUBLIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME
            | MethodAttributes::RT_SPECIAL_NAME;
        let mut methods = vec![(".ctor", ctor_flags, void, indices.clone())];
        let bounded = class
            .byval()
            .is_some_and(|ty| matches!(self.types.get(ty), RuntimeType::Array { .. }));
        if bounded {
            methods.push((".ctor", ctor_flags, void, vec![int32; rank * 2]));
        }

        let mut set_params = indices.clone();
        set_params.push(element);
        methods.push(("Get", MethodAttributes::PUBLIC, element, indices.clone()));
        methods.push(("Set", MethodAttributes::PUBLIC, void, set_params));
        methods.push((
            "Address",
            MethodAttributes::PUBLIC,
            self.intern(RuntimeType::ByRef(element)),
            indices,
        ));

        let ids = methods
            .into_iter()
            .map(|(name, flags, ret, params)| {
                let signature = self.types.intern_sig(MethodSignature {
                    has_this: true,
                    explicit_this: false,
                    vararg: false,
                    generic_param_count: 0,
                    ret,
                    params: Arc::from(params),
                });
                image.push_method(MethodDescriptor {
                    id: image.next_method_id(),
                    token: Token(0),
                    class: class.id,
                    name: name.to_string(),
                    flags,
                    impl_flags: MethodImplAttributes::INTERNAL_CALL,
                    raw_signature: None,
                    signature: OnceLock::from(signature),
                    slot: AtomicI32::new(-1),
                    declaring: None,
                    context: None,
                    generic_param_count: 0,
                })
            })
            .collect();
        Ok(ids)
    }

    /// The interned signature of a method.
    ///
    /// # Errors
    /// Returns an error if a parameter type fails to load.
    pub fn method_signature(&self, id: MethodId) -> Result<SigId> {
        let method = self
            .method(id)
            .ok_or_else(|| malformed_error!("method handle {} does not exist", id))?;
        if let Some(signature) = method.signature() {
            return Ok(signature);
        }

        let signature = match (method.declaring, method.context) {
            (Some(declaring), Some(context)) => {
                let definition = self.method_signature(declaring)?;
                self.inflate_signature(definition, &context)
            }
            _ => {
                let raw = method
                    .raw_signature
                    .as_ref()
                    .ok_or_else(|| malformed_error!("method {} has no signature", id))?;
                SignatureResolver::new(self, method.class.image)
                    .with_class(method.class)
                    .with_method(id)
                    .resolve_method_sig(raw)?
            }
        };
        Ok(*method.signature.get_or_init(|| signature))
    }

    /// The properties of a class
    ///
    /// # Errors
    /// Returns an error if the accessor methods can not be set up.
    pub fn class_properties(&self, id: ClassId) -> Result<&[PropertyDescriptor]> {
        let class = class_of!(self, id)?;
        let properties = class.properties.try_get_or_compute(&self.lock, || -> Result<_> {
            let methods = self.class_methods(id)?;
            let Some(definition) = self.member_source(class) else {
                return Ok(Box::default());
            };
            let reader = self.live_image(definition.image())?.reader();
            let accessor = |token| self.accessor(definition, methods, token);

            Ok(reader
                .properties_of(definition.token)
                .into_iter()
                .map(|row| PropertyDescriptor {
                    parent: id,
                    name: row.name,
                    flags: row.flags,
                    get: row.getter.and_then(accessor),
                    set: row.setter.and_then(accessor),
                })
                .collect())
        })?;
        Ok(properties)
    }

    /// The events of a class
    ///
    /// # Errors
    /// Returns an error if the accessor methods can not be set up.
    pub fn class_events(&self, id: ClassId) -> Result<&[EventDescriptor]> {
        let class = class_of!(self, id)?;
        let events = class.events.try_get_or_compute(&self.lock, || -> Result<_> {
            let methods = self.class_methods(id)?;
            let Some(definition) = self.member_source(class) else {
                return Ok(Box::default());
            };
            let reader = self.live_image(definition.image())?.reader();
            let accessor = |token| self.accessor(definition, methods, token);

            Ok(reader
                .events_of(definition.token)
                .into_iter()
                .map(|row| EventDescriptor {
                    parent: id,
                    name: row.name,
                    flags: row.flags,
                    add: row.add.and_then(accessor),
                    remove: row.remove.and_then(accessor),
                    raise: row.raise.and_then(accessor),
                })
                .collect())
        })?;
        Ok(events)
    }

    /// The definition whose metadata rows describe the members of `class`
    fn member_source<'a>(&'a self, class: &'a ClassDescriptor) -> Option<&'a ClassDescriptor> {
        match (class.kind, class.generic_class) {
            (ClassKind::Definition, _) => Some(class),
            (ClassKind::GenericInstance, Some(generic)) => self.class(generic.definition),
            _ => None,
        }
    }

    /// Maps an accessor `MethodDef` token to the method at the same position of `methods`
    fn accessor(
        &self,
        definition: &ClassDescriptor,
        methods: &[MethodId],
        token: Token,
    ) -> Option<MethodId> {
        if !definition.method_range.contains(&token.row()) {
            return None;
        }
        methods
            .get((token.row() - definition.method_range.start) as usize)
            .copied()
    }

    /// The classes nested in a class
    ///
    /// # Errors
    /// Returns an error if a nested class fails to load.
    pub fn nested_classes(&self, id: ClassId) -> Result<&[ClassId]> {
        let class = class_of!(self, id)?;
        let nested = class.nested.try_get_or_compute(&self.lock, || -> Result<_> {
            if class.kind != ClassKind::Definition {
                return match class.generic_class {
                    Some(generic) => Ok(self.nested_classes(generic.definition)?.into()),
                    None => Ok(Box::default()),
                };
            }

            let image = self.live_image(class.image())?;
            let nested = image
                .reader()
                .nested_types_of(class.token)
                .into_iter()
                .map(|token| self.resolve(image.id(), token))
                .collect::<Result<Box<[_]>>>()?;
            if !nested.is_empty() {
                class.set_class_flags(ClassFlags::HAS_NESTED_TYPES);
            }
            Ok(nested)
        })?;
        Ok(nested)
    }

    /// The interfaces a class declares directly.
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::TypeLoad`] if a listed type is not an interface.
    pub fn class_interfaces(&self, id: ClassId) -> Result<&[ClassId]> {
        let class = class_of!(self, id)?;
        let interfaces = class.interfaces.try_get_or_compute(&self.lock, || {
            match (class.kind, class.generic_class) {
                (ClassKind::Definition, _) => self.definition_interfaces(class),
                (ClassKind::GenericInstance, Some(generic)) => {
                    let context = generic.context();
                    self.class_interfaces(generic.definition)?
                        .iter()
                        .map(|interface| {
                            let ty = self.inflate_type(self.class_type(*interface), &context);
                            self.class_of_type(ty)
                        })
                        .collect()
                }
                _ => Ok(Box::default()),
            }
        })?;
        Ok(interfaces)
    }

    fn definition_interfaces(&self, class: &ClassDescriptor) -> Result<Box<[ClassId]>> {
        let image = self.live_image(class.image())?;
        let resolver = SignatureResolver::new(self, image.id()).with_class(class.id);

        image
            .reader()
            .interfaces_of(class.token)
            .into_iter()
            .map(|token| {
                let interface = self.class_of_type(resolver.resolve_token(token)?)?;
                if !class_of!(self, interface)?.is_interface() {
                    bail_load!(
                        TypeLoad,
                        "{} implements {} which is not an interface",
                        self.class_name(class.id),
                        self.class_name(interface)
                    );
                }
                Ok(interface)
            })
            .collect()
    }

    /// Resolves a `MethodDef` or `MemberRef` token.
    ///
    /// A non-empty `context` inflates the result: the parent class of a `MemberRef` is
    /// instantiated with it and a `MethodDef` is inflated into it.
    ///
    /// ## Arguments
    /// * 'image'   - The image the token belongs to
    /// * 'token'   - The method token
    /// * 'context' - Generic context of the referencing code, if any
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::MissingMethod`] if no method matches; the failure is
    /// also recorded as the calling thread's loader error.
    pub fn resolve_method(
        &self,
        image: ImageId,
        token: Token,
        context: Option<&GenericContext>,
    ) -> Result<MethodId> {
        self.resolve_method_in(image, token, context, None)
    }

    /// Resolves a method token whose signature may mention the generic parameters of `owner`
    pub(crate) fn resolve_method_in(
        &self,
        image: ImageId,
        token: Token,
        context: Option<&GenericContext>,
        owner: Option<ClassId>,
    ) -> Result<MethodId> {
        let img = self.live_image(image)?;
        let method = match token.table() {
            table::METHOD_DEF => self.method_def(img, token)?,
            table::MEMBER_REF => {
                let row = img
                    .reader()
                    .member_ref(token.row())
                    .ok_or(Error::TypeNotFound(token))?;
                if row.parent.is_table(table::METHOD_DEF) {
                    self.method_def(img, row.parent)?
                } else {
                    return self.method_from_member_ref(img, &row, context, owner);
                }
            }
            _ => return Err(InvalidToken(token)),
        };

        match context {
            Some(context) if !context.is_empty() => self.inflate_method(method, None, context),
            _ => Ok(method),
        }
    }

    fn method_def(&self, image: &Image, token: Token) -> Result<MethodId> {
        if let Some(id) = image.method_cache.get(&token).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let owner = self.member_owner(image, token.row(), |owner| owner.method_list)?;
        let class = self.resolve(image.id(), owner)?;
        let start = class_of!(self, class)?.method_range.start;
        self.class_methods(class)?
            .get((token.row() - start) as usize)
            .copied()
            .ok_or(Error::TypeNotFound(token))
    }

    /// The `TypeDef` owning a member row, from the contiguous member list ranges
    fn member_owner(&self, image: &Image, rid: u32, list: fn(&MemberOwner) -> u32) -> Result<Token> {
        let owners = image.member_owners.get_or_compute(&self.lock, || {
            let reader = image.reader();
            (1..=reader.row_count(table::TYPE_DEF))
                .filter_map(|rid| {
                    reader.type_def(rid).map(|row| MemberOwner {
                        type_def: Token::from_parts(table::TYPE_DEF, rid),
                        field_list: row.field_list,
                        method_list: row.method_list,
                    })
                })
                .collect()
        });

        let index = owners.partition_point(|owner| list(owner) <= rid);
        match index.checked_sub(1).and_then(|index| owners.get(index)) {
            Some(owner) => Ok(owner.type_def),
            None => Err(malformed_error!("member row {} has no owning type", rid)),
        }
    }

    /// The class a `MemberRef` parent token designates, instantiated in `context`
    fn member_ref_parent(
        &self,
        image: &Image,
        parent: Token,
        context: Option<&GenericContext>,
        owner: Option<ClassId>,
    ) -> Result<ClassId> {
        if parent.is_table(table::MODULE_REF) {
            return self.class_from_name(image.id(), "", "<Module>");
        }

        let mut resolver = SignatureResolver::new(self, image.id());
        if let Some(owner) = owner {
            resolver = resolver.with_class(owner);
        }
        let mut ty = resolver.resolve_token(parent)?;
        if let Some(context) = context.filter(|context| !context.is_empty()) {
            ty = self.inflate_type(ty, context);
        }
        self.class_of_type(ty)
    }

    fn method_from_member_ref(
        &self,
        image: &Image,
        row: &MemberRefRow,
        context: Option<&GenericContext>,
        owner: Option<ClassId>,
    ) -> Result<MethodId> {
        let parent = self.member_ref_parent(image, row.parent, context, owner)?;
        let MemberSig::Method(signature) = &row.signature else {
            return Err(self.missing_method(parent, &row.name));
        };
        let wanted = SignatureResolver::new(self, image.id()).resolve_method_sig(signature)?;

        let mut current = Some(parent);
        while let Some(class) = current {
            for method in self.class_methods(class)? {
                if self.method_matches(*method, &row.name, wanted)? {
                    return Ok(*method);
                }
            }
            current = class_of!(self, class)?.parent();
        }

        Err(self.missing_method(parent, &row.name))
    }

    /// Name and signature comparison, trying the uninflated definition as well
    fn method_matches(&self, method: MethodId, name: &str, wanted: SigId) -> Result<bool> {
        let descriptor = self
            .method(method)
            .ok_or_else(|| malformed_error!("method handle {} does not exist", method))?;
        if descriptor.name != name {
            return Ok(false);
        }

        let signature = self.method_signature(method)?;
        if self.signatures_match(signature, wanted, SigMatch::IgnoreGenericOwner) {
            return Ok(true);
        }
        match descriptor.declaring {
            Some(declaring) => {
                let definition = self.method_signature(declaring)?;
                Ok(self.signatures_match(definition, wanted, SigMatch::IgnoreGenericOwner))
            }
            None => Ok(false),
        }
    }

    fn missing_method(&self, class: ClassId, name: &str) -> Error {
        let error = load_error!(
            MissingMethod,
            "method not found: {}::{}",
            self.class_name(class),
            name
        );
        self.note_loader_error(&error);
        Error::Load(error)
    }

    fn missing_field(&self, class: ClassId, name: &str) -> Error {
        let error = load_error!(
            MissingField,
            "field not found: {}::{}",
            self.class_name(class),
            name
        );
        self.note_loader_error(&error);
        Error::Load(error)
    }

    /// Resolves a `Field` or `MemberRef` token.
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::MissingField`] if no field matches; the failure is
    /// also recorded as the calling thread's loader error.
    pub fn resolve_field(
        &self,
        image: ImageId,
        token: Token,
        context: Option<&GenericContext>,
    ) -> Result<FieldId> {
        let img = self.live_image(image)?;
        match token.table() {
            table::FIELD => {
                let owner = self.member_owner(img, token.row(), |owner| owner.field_list)?;
                let class = self.resolve(image, owner)?;
                self.field_by_token(class, token)
                    .ok_or(Error::TypeNotFound(token))
            }
            table::MEMBER_REF => {
                let row = img
                    .reader()
                    .member_ref(token.row())
                    .ok_or(Error::TypeNotFound(token))?;
                let parent = self.member_ref_parent(img, row.parent, context, None)?;
                if !matches!(row.signature, MemberSig::Field(_)) {
                    return Err(self.missing_field(parent, &row.name));
                }
                self.field_from_name(parent, &row.name)?
                    .ok_or_else(|| self.missing_field(parent, &row.name))
            }
            _ => Err(InvalidToken(token)),
        }
    }

    /// Finds a method declared by `class` itself.
    ///
    /// ## Arguments
    /// * 'class'       - The class to search
    /// * 'name'        - Method name
    /// * 'param_count' - Required parameter count, `None` matches any
    ///
    /// # Errors
    /// Returns an error if the class's methods can not be set up.
    pub fn method_from_name(
        &self,
        class: ClassId,
        name: &str,
        param_count: Option<usize>,
    ) -> Result<Option<MethodId>> {
        for method in self.class_methods(class)? {
            let Some(descriptor) = self.method(*method) else {
                continue;
            };
            if descriptor.name != name {
                continue;
            }
            match param_count {
                None => return Ok(Some(*method)),
                Some(count) => {
                    let signature = self.method_signature(*method)?;
                    if self.types.sig(signature).params.len() == count {
                        return Ok(Some(*method));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Finds a field by name in `class` or its ancestors
    ///
    /// # Errors
    /// Returns an error if a field list can not be set up.
    pub fn field_from_name(&self, class: ClassId, name: &str) -> Result<Option<FieldId>> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(index) = self
                .class_fields(id)?
                .iter()
                .position(|field| field.name == name)
            {
                return Ok(Some(FieldId {
                    class: id,
                    index: index as u32,
                }));
            }
            current = class_of!(self, id)?.parent();
        }
        Ok(None)
    }

    /// Finds the field defined by a `Field` token in `class` or its ancestors
    #[must_use]
    pub fn field_by_token(&self, class: ClassId, token: Token) -> Option<FieldId> {
        let image = self.member_source(self.class(class)?)?.image();
        let mut current = Some(class);
        while let Some(id) = current {
            let descriptor = self.class(id)?;
            let same_image = self
                .member_source(descriptor)
                .is_some_and(|source| source.image() == image);
            if same_image {
                let fields = self.class_fields(id).ok()?;
                if let Some(index) = fields.iter().position(|field| field.token == token) {
                    return Some(FieldId {
                        class: id,
                        index: index as u32,
                    });
                }
            }
            current = descriptor.parent();
        }
        None
    }

    /// Finds a property by name in `class` or its ancestors
    ///
    /// # Errors
    /// Returns an error if a property list can not be set up.
    pub fn property_from_name(
        &self,
        class: ClassId,
        name: &str,
    ) -> Result<Option<&PropertyDescriptor>> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(property) = self
                .class_properties(id)?
                .iter()
                .find(|property| property.name == name)
            {
                return Ok(Some(property));
            }
            current = class_of!(self, id)?.parent();
        }
        Ok(None)
    }
}
