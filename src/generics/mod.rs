//! Generic instantiation.
//!
//! Instantiating a generic definition produces a new [`ClassKind::GenericInstance`] class whose
//! members mirror the definition with the type arguments substituted. Substitution
//! (*inflation*) works on interned [`RuntimeType`]s: every `Var` is replaced by the class
//! argument with the same number and every `MVar` by the method argument. Composite types are
//! rebuilt only when one of their parts changed, so closed types inflate to themselves.
//!
//! # Key Components
//!
//! - [`TypeSystem::instantiate`] - canonical instantiation of a definition
//! - [`TypeSystem::inflate_type`] / [`TypeSystem::inflate_signature`] - substitution
//! - [`TypeSystem::inflate_method`] - canonical inflated method descriptors
//!
//! # Examples
//!
//! ```rust
//! use dotclass::{
//!     metadata::builder::{MetadataBuilder, TypeDefBuilder},
//!     metadata::flags::{FieldAttributes, GenericParamAttributes},
//!     metadata::signatures::TypeSig,
//!     typesystem::RuntimeType,
//!     TypeSystem,
//! };
//!
//! let ts = TypeSystem::default();
//! ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
//!
//! let mut b = MetadataBuilder::new("App");
//! let corlib = b.add_assembly_ref("mscorlib");
//! let object = b.reference_type(corlib, "System", "Object");
//! let cell = TypeDefBuilder::new().namespace("App").name("Cell").public_class().extends(object).build(&mut b);
//! b.add_field("value", FieldAttributes::PUBLIC, TypeSig::Var(0));
//! b.add_generic_param(cell, 0, "T", GenericParamAttributes::empty(), vec![]);
//! let app = ts.load_metadata(b.build());
//!
//! let definition = ts.resolve(app, cell)?;
//! let int32 = ts.intern(RuntimeType::I4);
//! let closed = ts.instantiate(definition, &[int32])?;
//! assert_eq!(closed, ts.instantiate(definition, &[int32])?);
//! # Ok::<(), dotclass::Error>(())
//! ```

use std::sync::{atomic::AtomicI32, Arc, OnceLock};

use crate::{
    metadata::flags::{MethodAttributes, MethodImplAttributes},
    typesystem::{
        ClassDescriptor, ClassId, ClassKind, GenericClass, GenericContext, InstId,
        MethodDescriptor, MethodId, MethodSignature, RuntimeType, SigId, TypeId, TypeSystem,
    },
    Error, Result,
};

impl TypeSystem {
    /// Substitutes the generic parameters of `ty` with the arguments of `context`.
    ///
    /// Parameters without a corresponding argument list are left alone. A parameter number
    /// beyond the argument list is an unrecoverable metadata inconsistency.
    #[must_use]
    pub fn inflate_type(&self, ty: TypeId, context: &GenericContext) -> TypeId {
        if context.is_empty() || !self.types.is_open(ty) {
            return ty;
        }

        match self.types.get(ty) {
            RuntimeType::Var(param) => match context.class_inst {
                Some(inst) => self.substitute(inst, param.number, "class"),
                None => ty,
            },
            RuntimeType::MVar(param) => match context.method_inst {
                Some(inst) => self.substitute(inst, param.number, "method"),
                None => ty,
            },
            RuntimeType::Ptr(inner) => self.rebuild(ty, inner, context, RuntimeType::Ptr),
            RuntimeType::ByRef(inner) => self.rebuild(ty, inner, context, RuntimeType::ByRef),
            RuntimeType::SzArray(inner) => self.rebuild(ty, inner, context, RuntimeType::SzArray),
            RuntimeType::Array { element, rank } => {
                self.rebuild(ty, element, context, |element| RuntimeType::Array { element, rank })
            }
            RuntimeType::GenericInst {
                definition,
                args,
                is_value_type,
            } => {
                let inflated = self.inflate_inst(args, context);
                if inflated == args {
                    ty
                } else {
                    self.intern(RuntimeType::GenericInst {
                        definition,
                        args: inflated,
                        is_value_type,
                    })
                }
            }
            RuntimeType::FnPtr(signature) => {
                let inflated = self.inflate_signature(signature, context);
                if inflated == signature {
                    ty
                } else {
                    self.intern(RuntimeType::FnPtr(inflated))
                }
            }
            _ => ty,
        }
    }

    fn substitute(&self, inst: InstId, number: u16, kind: &str) -> TypeId {
        let args = self.types.inst(inst).args;
        match args.get(number as usize) {
            Some(arg) => *arg,
            None => self.fatal(load_error!(
                TypeLoad,
                "{} type parameter {} out of range for {} arguments",
                kind,
                number,
                args.len()
            )),
        }
    }

    fn rebuild(
        &self,
        ty: TypeId,
        inner: TypeId,
        context: &GenericContext,
        wrap: impl FnOnce(TypeId) -> RuntimeType,
    ) -> TypeId {
        let inflated = self.inflate_type(inner, context);
        if inflated == inner {
            ty
        } else {
            self.intern(wrap(inflated))
        }
    }

    /// Substitutes every argument of an argument list
    pub(crate) fn inflate_inst(&self, inst: InstId, context: &GenericContext) -> InstId {
        let args = self.types.inst(inst).args;
        let inflated = args
            .iter()
            .map(|arg| self.inflate_type(*arg, context))
            .collect::<Vec<_>>();
        if inflated[..] == args[..] {
            inst
        } else {
            self.types.intern_inst(&inflated)
        }
    }

    /// Substitutes the generic parameters of a signature
    #[must_use]
    pub fn inflate_signature(&self, signature: SigId, context: &GenericContext) -> SigId {
        if context.is_empty() {
            return signature;
        }

        let sig = self.types.sig(signature);
        let ret = self.inflate_type(sig.ret, context);
        let params = sig
            .params
            .iter()
            .map(|param| self.inflate_type(*param, context))
            .collect::<Vec<_>>();
        if ret == sig.ret && params[..] == sig.params[..] {
            return signature;
        }

        self.types.intern_sig(MethodSignature {
            ret,
            params: Arc::from(params),
            ..sig
        })
    }

    /// Returns the method `method` becomes under `context`.
    ///
    /// An already inflated method is first reduced to its definition, with its own context
    /// inflated through `context`. The context is then trimmed to what the definition can use:
    /// no class arguments unless the declaring class is generic, no method arguments unless
    /// the method is. An empty result returns the definition itself. Equal requests always
    /// return the same [`MethodId`].
    ///
    /// ## Arguments
    /// * 'method'     - Method to inflate
    /// * 'class_hint' - The instantiated class the result belongs to, if already known
    /// * 'context'    - The substitution
    ///
    /// # Errors
    /// Returns an error if the declaring class can not be instantiated.
    pub fn inflate_method(
        &self,
        method: MethodId,
        class_hint: Option<ClassId>,
        context: &GenericContext,
    ) -> Result<MethodId> {
        let descriptor = self
            .method(method)
            .ok_or_else(|| malformed_error!("method handle {} does not exist", method))?;

        let (definition, mut merged) = match (descriptor.declaring, descriptor.context) {
            (Some(declaring), Some(existing)) => (
                declaring,
                GenericContext {
                    class_inst: existing
                        .class_inst
                        .map(|inst| self.inflate_inst(inst, context)),
                    method_inst: existing
                        .method_inst
                        .map(|inst| self.inflate_inst(inst, context))
                        .or(context.method_inst),
                },
            ),
            _ => (method, *context),
        };

        let def = self
            .method(definition)
            .ok_or_else(|| malformed_error!("method handle {} does not exist", definition))?;
        let def_class = class_of!(self, def.class)?;
        if def_class.generic_container.is_none() {
            merged.class_inst = None;
        }
        if def.generic_param_count == 0 {
            merged.method_inst = None;
        }
        if merged.is_empty()
            || def.flags.contains(MethodAttributes::PINVOKE_IMPL)
            || def.impl_flags.contains(MethodImplAttributes::INTERNAL_CALL)
        {
            return Ok(definition);
        }

        let key = (definition, merged);
        if let Some(id) = self.inflated_methods.get(&key).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let class = match (class_hint, merged.class_inst) {
            (Some(hint), _) => hint,
            (None, Some(inst)) => self.instantiate(def.class, &self.types.inst(inst).args)?,
            (None, None) => def.class,
        };

        let _guard = self.lock.lock();
        if let Some(id) = self.inflated_methods.get(&key).map(|entry| *entry.value()) {
            return Ok(id);
        }

        let image = self.live_image(class.image)?;
        let id = image.push_method(MethodDescriptor {
            id: image.next_method_id(),
            token: def.token,
            class,
            name: def.name.clone(),
            flags: def.flags,
            impl_flags: def.impl_flags,
            raw_signature: None,
            signature: OnceLock::new(),
            slot: AtomicI32::new(def.slot().map_or(-1, |slot| slot as i32)),
            declaring: Some(definition),
            context: Some(merged),
            generic_param_count: def.generic_param_count,
        });
        self.inflated_methods.insert(key, id);
        self.stats.inflated_methods();
        Ok(id)
    }

    /// Instantiates a generic definition with the given type arguments.
    ///
    /// The same definition and arguments always yield the same class.
    ///
    /// ## Arguments
    /// * 'definition' - An open generic definition
    /// * 'args'       - One type per generic parameter
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::TypeLoad`] if `definition` is not generic, the
    /// argument count does not match, or the instantiation fails to link, and
    /// [`Error::RecursionLimit`] for arguments nested deeper than the configured limit.
    pub fn instantiate(&self, definition: ClassId, args: &[TypeId]) -> Result<ClassId> {
        let def = class_of!(self, definition)?;
        let Some(container) = def.generic_container.as_ref() else {
            bail_load!(TypeLoad, "{} is not a generic definition", self.class_name(definition));
        };
        if container.params.len() != args.len() {
            bail_load!(
                TypeLoad,
                "{} expects {} type arguments, got {}",
                self.class_name(definition),
                container.params.len(),
                args.len()
            );
        }

        let limit = self.config.max_type_depth;
        if args.iter().any(|arg| self.type_depth(*arg, limit) >= limit) {
            return Err(Error::RecursionLimit(limit));
        }

        let inst = self.types.intern_inst(args);
        if let Some(id) = self.instances.get(&(definition, inst)).map(|entry| *entry.value()) {
            if self.is_settled(id) {
                return self.checked_instance(id);
            }
        }

        let _guard = self.lock.lock();
        if let Some(id) = self.instances.get(&(definition, inst)).map(|entry| *entry.value()) {
            return self.checked_instance(id);
        }

        let image = self.live_image(def.image())?;
        let mut class = ClassDescriptor::new(
            image.next_class_id(),
            ClassKind::GenericInstance,
            def.token,
            def.namespace.clone(),
            def.name.clone(),
            def.flags,
        );
        class.generic_class = Some(GenericClass { definition, inst });
        class.reserved_size = def.reserved_size;

        let id = image.push_class(class);
        self.instances.insert((definition, inst), id);
        self.stats.classes_created();
        self.stats.generic_instances();

        if let Err(error) = self.link_instance(id) {
            let recorded = class_of!(self, id)?
                .record_link_failure(error.into_load_error())
                .clone();
            return Err(Error::Load(recorded));
        }
        class_of!(self, id)?.mark_linked();
        log::debug!("instantiated {}", self.class_name(id));
        Ok(id)
    }

    fn checked_instance(&self, id: ClassId) -> Result<ClassId> {
        let class = class_of!(self, id)?;
        match class.failure() {
            Some(error) if class.link_failed() => Err(Error::Load(error.clone())),
            _ => Ok(id),
        }
    }

    /// Nesting depth of a type, saturating at `limit`
    fn type_depth(&self, ty: TypeId, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        match self.types.get(ty) {
            RuntimeType::Ptr(inner)
            | RuntimeType::ByRef(inner)
            | RuntimeType::SzArray(inner)
            | RuntimeType::Array { element: inner, .. } => 1 + self.type_depth(inner, limit - 1),
            RuntimeType::GenericInst { args, .. } => {
                1 + self
                    .types
                    .inst(args)
                    .args
                    .iter()
                    .map(|arg| self.type_depth(*arg, limit - 1))
                    .max()
                    .unwrap_or(0)
            }
            _ => 1,
        }
    }

    /// Links an instantiation the same way its definition was linked, with the parent,
    /// enumeration base type and interfaces inflated
    fn link_instance(&self, id: ClassId) -> Result<()> {
        let class = class_of!(self, id)?;
        let generic = class
            .generic_class
            .ok_or_else(|| malformed_error!("{} is not a generic instance", id))?;
        let def = class_of!(self, generic.definition)?;
        if def.link_failed() {
            if let Some(error) = def.failure() {
                return Err(Error::Load(error.clone()));
            }
        }
        if def.supertypes().is_empty() {
            bail_load!(
                TypeLoad,
                "circular instantiation of {} while it is being loaded",
                self.class_name(generic.definition)
            );
        }

        let context = generic.context();
        let _ = class.nested_in.set(def.nested_in());

        let parent = match def.parent() {
            Some(parent) => {
                let ty = self.inflate_type(self.class_type(parent), &context);
                Some(self.class_of_type(ty)?)
            }
            None => None,
        };
        self.setup_parent(class, parent)?;

        let byval = RuntimeType::GenericInst {
            definition: generic.definition,
            args: generic.inst,
            is_value_type: def.is_valuetype(),
        };
        let _ = class.byval.set(self.intern(byval));

        if class.is_interface() {
            self.assign_interface_id(class)?;
        }
        if let Some(basetype) = def.enum_basetype() {
            let basetype = self.inflate_type(basetype, &context);
            let element = self.class_of_type(basetype)?;
            let _ = class.enum_basetype.set(basetype);
            let _ = class.element_class.set(element);
            let _ = class.cast_class.set(element);
        }

        self.class_interfaces(id)?;
        Ok(())
    }

    /// The interned type of the instantiation of `definition` with `args`.
    ///
    /// The value-type flag comes from the definition once it is linked and from `hint`
    /// (the signature's `VALUETYPE` marker) while it is still being linked.
    pub(crate) fn generic_inst_type(
        &self,
        definition: ClassId,
        args: &[TypeId],
        hint: Option<bool>,
    ) -> TypeId {
        let is_value_type = match self.class(definition) {
            Some(def) if !def.supertypes().is_empty() => def.is_valuetype(),
            _ => hint.unwrap_or(false),
        };
        self.intern(RuntimeType::GenericInst {
            definition,
            args: self.types.intern_inst(args),
            is_value_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        metadata::{
            builder::{MetadataBuilder, TypeDefBuilder},
            flags::{FieldAttributes, GenericParamAttributes},
            signatures::TypeSig,
        },
        test::{app_with_corlib, generic_fixture},
        typesystem::{ClassKind, GenericContext, GenericOwner, GenericParam, RuntimeType},
        Error, LoadErrorKind,
    };

    #[test]
    fn test_inflate_type() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        let int32 = ts.intern(RuntimeType::I4);
        let var = ts.intern(RuntimeType::Var(GenericParam {
            owner: GenericOwner::Class(fixture.box_def),
            number: 0,
        }));
        let vector = ts.intern(RuntimeType::SzArray(var));
        let context = GenericContext::for_class(ts.types().intern_inst(&[int32]));

        assert_eq!(ts.inflate_type(var, &context), int32);
        assert_eq!(
            ts.types().get(ts.inflate_type(vector, &context)),
            RuntimeType::SzArray(int32)
        );
        assert_eq!(ts.inflate_type(int32, &context), int32);
        assert_eq!(ts.inflate_type(vector, &GenericContext::default()), vector);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_inflate_out_of_range_is_fatal() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        let var = ts.intern(RuntimeType::Var(GenericParam {
            owner: GenericOwner::Unbound,
            number: 3,
        }));
        let int32 = ts.intern(RuntimeType::I4);
        let context = GenericContext::for_class(ts.types().intern_inst(&[int32]));
        let _ = ts.inflate_type(var, &context);
    }

    #[test]
    fn test_instantiation_is_canonical() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        let int32 = ts.intern(RuntimeType::I4);
        let string = ts.intern(RuntimeType::String);

        let a = ts.instantiate(fixture.box_def, &[int32]).unwrap();
        let b = ts.instantiate(fixture.box_def, &[int32]).unwrap();
        let c = ts.instantiate(fixture.box_def, &[string]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let class = ts.class(a).unwrap();
        assert_eq!(class.kind(), ClassKind::GenericInstance);
        assert_eq!(class.generic_class().unwrap().definition, fixture.box_def);
        assert_eq!(class.parent(), ts.class(fixture.box_def).unwrap().parent());
        assert_eq!(ts.stats().generic_instances, 2);
    }

    #[test]
    fn test_argument_count_mismatch() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        let int32 = ts.intern(RuntimeType::I4);
        let err = ts.instantiate(fixture.box_def, &[int32, int32]).unwrap_err();
        assert_eq!(err.as_load_error().unwrap().kind, LoadErrorKind::TypeLoad);
    }

    #[test]
    fn test_method_inflation_is_canonical() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        let int32 = ts.intern(RuntimeType::I4);
        let boxed = ts.instantiate(fixture.box_def, &[int32]).unwrap();

        let get = ts.method_from_name(fixture.box_def, "Get", None).unwrap().unwrap();
        let context = GenericContext::for_class(ts.types().intern_inst(&[int32]));
        let inflated = ts.inflate_method(get, None, &context).unwrap();
        assert_eq!(inflated, ts.inflate_method(get, None, &context).unwrap());
        assert_eq!(inflated, ts.inflate_method(inflated, None, &context).unwrap());

        let method = ts.method(inflated).unwrap();
        assert_eq!(method.class(), boxed);
        assert_eq!(method.declaring(), Some(get));
        assert!(ts.class_methods(boxed).unwrap().contains(&inflated));

        let ctor = ts.method_from_name(fixture.box_def, ".ctor", None).unwrap().unwrap();
        let object_ctor = ts
            .method_from_name(ts.well_known(crate::WellKnownClass::Object).unwrap(), ".ctor", None)
            .unwrap()
            .unwrap();
        assert_ne!(ts.inflate_method(ctor, None, &context).unwrap(), ctor);
        assert_eq!(ts.inflate_method(object_ctor, None, &context).unwrap(), object_ctor);
    }

    #[test]
    fn test_value_type_instance() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let value_type = b.reference_type(corlib, "System", "ValueType");
        let pair = TypeDefBuilder::new()
            .namespace("App")
            .name("Pair")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("first", FieldAttributes::PUBLIC, TypeSig::Var(0));
        b.add_field("second", FieldAttributes::PUBLIC, TypeSig::Var(1));
        b.add_generic_param(pair, 0, "A", GenericParamAttributes::empty(), vec![]);
        b.add_generic_param(pair, 1, "B", GenericParamAttributes::empty(), vec![]);

        let (ts, app) = app_with_corlib(b);
        let definition = ts.resolve(app, pair).unwrap();
        let byte = ts.intern(RuntimeType::U1);
        let long = ts.intern(RuntimeType::I8);
        let closed = ts.instantiate(definition, &[byte, long]).unwrap();

        let class = ts.class(closed).unwrap();
        assert!(class.is_valuetype());
        assert!(matches!(
            ts.types().get(class.byval().unwrap()),
            RuntimeType::GenericInst { is_value_type: true, .. }
        ));
        assert_eq!(ts.value_size(closed).unwrap(), (16, 8));
    }

    #[test]
    fn test_self_instantiating_parent_fails() {
        let mut b = MetadataBuilder::new("App");
        let node = TypeDefBuilder::new()
            .namespace("App")
            .name("Node")
            .public_class()
            .build(&mut b);
        b.add_generic_param(node, 0, "T", GenericParamAttributes::empty(), vec![]);
        let parent = b.add_type_spec(TypeSig::GenericInst {
            definition: node,
            is_value_type: false,
            args: vec![TypeSig::I4],
        });
        b.set_extends(node, parent);

        let (ts, app) = app_with_corlib(b);
        let err = ts.resolve(app, node).unwrap_err();
        assert!(matches!(err, Error::Load(ref e) if e.kind == LoadErrorKind::TypeLoad));
    }
}
