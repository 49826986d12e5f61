//! Subtype relations, names and sizes of loaded classes.

use crate::{
    typesystem::{
        fixed_size, ClassDescriptor, ClassId, ClassKind, MethodId, RuntimeType, TypeId,
        TypeSystem, WellKnownClass,
    },
    Result,
};

impl TypeSystem {
    /// Returns true if `class` is `candidate` or derives from it.
    ///
    /// With `check_interfaces` an interface `candidate` matches when `class` implements it.
    /// Interfaces count as subclasses of `System.Object`.
    ///
    /// ## Arguments
    /// * 'class'            - The class to test
    /// * 'candidate'        - The potential base class or interface
    /// * 'check_interfaces' - Also consider implemented interfaces
    #[must_use]
    pub fn is_subclass_of(&self, class: ClassId, candidate: ClassId, check_interfaces: bool) -> bool {
        if class == candidate {
            return true;
        }
        let (Some(descriptor), Some(target)) = (self.class(class), self.class(candidate)) else {
            return false;
        };

        if target.is_interface() {
            return check_interfaces && self.implements_interface(class, candidate);
        }
        if descriptor.is_interface() {
            return self.is_well_known(candidate, WellKnownClass::Object);
        }
        self.has_parent(class, candidate)
    }

    /// Returns true if `parent` is in the ancestor chain of `class` (itself included)
    #[must_use]
    pub fn has_parent(&self, class: ClassId, parent: ClassId) -> bool {
        let (Some(descriptor), Some(target)) = (self.class(class), self.class(parent)) else {
            return false;
        };
        let depth = target.idepth();
        depth > 0 && descriptor.supertypes().get(depth - 1) == Some(&parent)
    }

    /// Returns true if `class` or one of its ancestors implements `interface`, directly or
    /// through interface inheritance
    #[must_use]
    pub fn implements_interface(&self, class: ClassId, interface: ClassId) -> bool {
        let Some(descriptor) = self.class(class) else {
            return false;
        };
        if let (Some(offsets), Some(iid)) = (
            descriptor.interface_offsets(),
            self.class(interface).and_then(ClassDescriptor::interface_id),
        ) {
            if offsets.implements(iid) {
                return true;
            }
            if descriptor.kind() != ClassKind::GenericParameter {
                return false;
            }
        }

        let mut stack = vec![class];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);

            let Ok(interfaces) = self.class_interfaces(current) else {
                continue;
            };
            if interfaces.contains(&interface) {
                return true;
            }
            stack.extend_from_slice(interfaces);
            if let Some(parent) = self.class(current).and_then(ClassDescriptor::parent) {
                stack.push(parent);
            }
        }
        false
    }

    /// Returns true if a value of class `source` can be stored in a location of class
    /// `target`, following reference, interface and array covariance rules.
    #[must_use]
    pub fn is_assignable_from(&self, target: ClassId, source: ClassId) -> bool {
        if target == source {
            return true;
        }
        let (Some(to), Some(from)) = (self.class(target), self.class(source)) else {
            return false;
        };

        if to.is_interface() {
            return self.implements_interface(source, target);
        }

        if to.rank() > 0 {
            if from.rank() != to.rank() {
                return false;
            }
            let (Some(element), Some(from_element)) = (to.cast_class(), from.cast_class()) else {
                return false;
            };
            let from_is_value = self
                .class(from_element)
                .is_some_and(ClassDescriptor::is_valuetype);
            if from_is_value {
                let element_is_value = self
                    .class(element)
                    .is_some_and(ClassDescriptor::is_valuetype);
                return element_is_value && element == from_element;
            }
            return self.is_assignable_from(element, from_element);
        }

        if self.is_well_known(target, WellKnownClass::Object) {
            return true;
        }
        self.is_subclass_of(source, target, false)
    }

    /// The display name of a class: `Namespace.Outer+Inner`, with generic parameters or
    /// arguments in brackets and array or pointer suffixes
    #[must_use]
    pub fn class_name(&self, id: ClassId) -> String {
        let Some(class) = self.class(id) else {
            return format!("<invalid {id}>");
        };

        match class.kind {
            ClassKind::Array | ClassKind::Pointer | ClassKind::FnPtr => match class.byval() {
                Some(ty) => self.type_name(ty),
                None => class.name.clone(),
            },
            ClassKind::GenericParameter => class.name.clone(),
            ClassKind::GenericInstance => {
                let Some(generic) = class.generic_class else {
                    return class.name.clone();
                };
                let args = self
                    .types
                    .inst(generic.inst)
                    .args
                    .iter()
                    .map(|arg| self.type_name(*arg))
                    .collect::<Vec<_>>();
                format!("{}[{}]", self.plain_name(class), args.join(","))
            }
            ClassKind::Definition => match &class.generic_container {
                Some(container) => {
                    let params = container
                        .params
                        .iter()
                        .map(|param| param.name.as_str())
                        .collect::<Vec<_>>();
                    format!("{}[{}]", self.plain_name(class), params.join(","))
                }
                None => self.plain_name(class),
            },
        }
    }

    /// `Namespace.Outer+Inner` without generic decoration
    fn plain_name(&self, class: &ClassDescriptor) -> String {
        if let Some(outer) = class.nested_in().and_then(|outer| self.class(outer)) {
            return format!("{}+{}", self.plain_name(outer), class.name);
        }
        if class.namespace.is_empty() {
            class.name.clone()
        } else {
            format!("{}.{}", class.namespace, class.name)
        }
    }

    /// The display name of a runtime type
    #[must_use]
    pub fn type_name(&self, ty: TypeId) -> String {
        match self.types.get(ty) {
            RuntimeType::Class(id) | RuntimeType::ValueType(id) => self.class_name(id),
            RuntimeType::GenericInst { definition, args, .. } => {
                let args = self
                    .types
                    .inst(args)
                    .args
                    .iter()
                    .map(|arg| self.type_name(*arg))
                    .collect::<Vec<_>>();
                let name = self
                    .class(definition)
                    .map_or_else(|| format!("<invalid {definition}>"), |c| self.plain_name(c));
                format!("{}[{}]", name, args.join(","))
            }
            RuntimeType::Var(param) | RuntimeType::MVar(param) => {
                let is_mvar = matches!(self.types.get(ty), RuntimeType::MVar(_));
                match self.declared_generic_param(param) {
                    Some((name, _, _)) if !name.is_empty() => name,
                    _ if is_mvar => format!("!!{}", param.number),
                    _ => format!("!{}", param.number),
                }
            }
            RuntimeType::Ptr(inner) => format!("{}*", self.type_name(inner)),
            RuntimeType::ByRef(inner) => format!("{}&", self.type_name(inner)),
            RuntimeType::SzArray(element) => format!("{}[]", self.type_name(element)),
            RuntimeType::Array { element, rank } => {
                let dims = if rank == 1 {
                    "*".to_string()
                } else {
                    ",".repeat(rank as usize - 1)
                };
                format!("{}[{}]", self.type_name(element), dims)
            }
            RuntimeType::FnPtr(_) => "(fnptr)".to_string(),
            other => match WellKnownClass::for_primitive(other) {
                Some(class) => format!("{}.{}", class.namespace(), class.name()),
                None => format!("{other:?}"),
            },
        }
    }

    /// Size and alignment of a value of class `id` when stored inline.
    ///
    /// Value types report their instance size without the object header, reference types
    /// the pointer size.
    ///
    /// # Errors
    /// Returns an error if the layout of a value type can not be computed.
    pub fn value_size(&self, id: ClassId) -> Result<(u32, u32)> {
        let class = class_of!(self, id)?;
        if !class.is_valuetype() {
            let ptr = self.config.pointer_size;
            return Ok((ptr, ptr));
        }
        if let Some(size) = class.byval().and_then(|ty| fixed_size(self.types.get(ty), &self.config)) {
            return Ok(size);
        }

        let layout = self.layout_fields(id)?;
        let header = self.config.header_size();
        Ok((layout.instance_size - header, layout.min_align))
    }

    /// Size and alignment of a value of type `ty` when stored inline
    ///
    /// # Errors
    /// Returns an error if the layout of a value type can not be computed.
    pub fn type_size(&self, ty: TypeId) -> Result<(u32, u32)> {
        if let Some(size) = fixed_size(self.types.get(ty), &self.config) {
            return Ok(size);
        }
        let class = self.class_of_type(ty)?;
        self.value_size(class)
    }

    /// Size of the static field area of a class
    ///
    /// # Errors
    /// Returns an error if the layout can not be computed.
    pub fn data_size(&self, id: ClassId) -> Result<u32> {
        self.layout_fields(id)?;
        Ok(class_of!(self, id)?.class_size().unwrap_or(0))
    }

    /// Size of one element of an array class
    ///
    /// # Errors
    /// Returns an error if `id` is not an array class or the element layout fails.
    pub fn array_element_size(&self, id: ClassId) -> Result<u32> {
        let class = class_of!(self, id)?;
        let element = class
            .element_type()
            .filter(|_| class.rank() > 0)
            .ok_or_else(|| malformed_error!("{} is not an array class", self.class_name(id)))?;
        Ok(self.type_size(element)?.0)
    }

    /// Instance size including the object header
    ///
    /// # Errors
    /// Returns an error if the layout can not be computed.
    pub fn instance_size(&self, id: ClassId) -> Result<u32> {
        Ok(self.layout_fields(id)?.instance_size)
    }

    /// Returns true if code in `caller` must run the type initializer of `class` first.
    ///
    /// The type initializer itself never needs to trigger its own class's initializer.
    #[must_use]
    pub fn needs_cctor_run(&self, class: ClassId, caller: Option<MethodId>) -> bool {
        let Ok(methods) = self.class_methods(class) else {
            return false;
        };
        let Some(cctor) = methods
            .iter()
            .copied()
            .find(|method| self.method(*method).is_some_and(|m| m.is_type_initializer()))
        else {
            return false;
        };
        caller != Some(cctor)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        test::{corlib_system, generic_fixture},
        typesystem::RuntimeType,
        WellKnownClass,
    };

    #[test]
    fn test_subclass_chain() {
        let (ts, _) = corlib_system();
        let object = ts.well_known(WellKnownClass::Object).unwrap();
        let value_type = ts.well_known(WellKnownClass::ValueType).unwrap();
        let int32 = ts.well_known(WellKnownClass::Int32).unwrap();
        let string = ts.well_known(WellKnownClass::String).unwrap();

        assert!(ts.is_subclass_of(int32, value_type, false));
        assert!(ts.is_subclass_of(int32, object, false));
        assert!(!ts.is_subclass_of(value_type, int32, false));
        assert!(!ts.is_subclass_of(string, value_type, false));
        assert!(ts.has_parent(int32, int32));
    }

    #[test]
    fn test_array_covariance() {
        let (ts, _) = corlib_system();
        let object = ts.well_known(WellKnownClass::Object).unwrap();
        let string = ts.well_known(WellKnownClass::String).unwrap();
        let int32 = ts.well_known(WellKnownClass::Int32).unwrap();

        let objects = ts.array_class(object, 1).unwrap();
        let strings = ts.array_class(string, 1).unwrap();
        let ints = ts.array_class(int32, 1).unwrap();
        let matrix = ts.array_class(string, 2).unwrap();

        assert!(ts.is_assignable_from(objects, strings));
        assert!(!ts.is_assignable_from(strings, objects));
        assert!(!ts.is_assignable_from(objects, ints));
        assert!(!ts.is_assignable_from(objects, matrix));
        assert!(ts.is_assignable_from(object, ints));
    }

    #[test]
    fn test_names() {
        let fixture = generic_fixture();
        let ts = &fixture.ts;
        assert_eq!(ts.class_name(fixture.box_def), "App.Box[T]");

        let int32 = ts.intern(RuntimeType::I4);
        let boxed = ts.instantiate(fixture.box_def, &[int32]).unwrap();
        assert_eq!(ts.class_name(boxed), "App.Box[System.Int32]");

        let vector = ts.intern(RuntimeType::SzArray(int32));
        let byref = ts.intern(RuntimeType::ByRef(vector));
        assert_eq!(ts.type_name(byref), "System.Int32[]&");
    }

    #[test]
    fn test_value_sizes() {
        let (ts, _) = corlib_system();
        let int64 = ts.well_known(WellKnownClass::Int64).unwrap();
        let string = ts.well_known(WellKnownClass::String).unwrap();
        let typed_ref = ts.well_known(WellKnownClass::TypedReference).unwrap();
        let ptr = ts.config().pointer_size;

        assert_eq!(ts.value_size(int64).unwrap().0, 8);
        assert_eq!(ts.value_size(string).unwrap(), (ptr, ptr));
        assert_eq!(ts.value_size(typed_ref).unwrap().0, ptr * 2);

        let doubles = ts.array_class(ts.well_known(WellKnownClass::Double).unwrap(), 1).unwrap();
        assert_eq!(ts.array_element_size(doubles).unwrap(), 8);
        assert!(ts.array_element_size(string).is_err());
    }
}
