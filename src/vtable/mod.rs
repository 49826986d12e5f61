//! VTable construction.
//!
//! A class's vtable starts as a copy of its parent's and is then refined in six stages:
//!
//! 1. copy the parent vtable
//! 2. place `MethodImpl` overrides of interface methods
//! 3. fill the slots of every implemented interface: implicit implementations declared by
//!    the class, explicit `Iface.Method` implementations, public virtual methods with the
//!    same name and signature, and finally the parent's implementation
//! 4. give the class's own virtual methods a slot, reusing the slot of the method they
//!    override unless they are `newslot`
//! 5. place `MethodImpl` overrides of class methods
//! 6. redirect every slot still holding an overridden method to its override
//!
//! When the result equals the parent's vtable element for element, the parent's array is
//! shared.
//!
//! # Examples
//!
//! ```rust
//! use dotclass::{metadata::builder::MetadataBuilder, TypeSystem, WellKnownClass};
//!
//! let ts = TypeSystem::default();
//! ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
//!
//! let object = ts.well_known(WellKnownClass::Object)?;
//! let vtable = ts.ensure_vtable(object)?;
//! assert_eq!(vtable.len(), 4);
//! # Ok::<(), dotclass::Error>(())
//! ```

mod matching;

pub use matching::SigMatch;

use std::{collections::HashMap, sync::Arc};

use crate::{
    interfaces::InterfaceOffsets,
    metadata::token::Token,
    typesystem::{ClassDescriptor, ClassId, MethodDescriptor, MethodId, SigId, TypeSystem},
    Error, Result,
};

/// A class's vtable under construction
struct Slots {
    entries: Vec<Option<MethodId>>,
}

impl Slots {
    fn get(&self, slot: u32) -> Option<MethodId> {
        self.entries.get(slot as usize).copied().flatten()
    }

    fn put(&mut self, slot: u32, method: MethodId) {
        let slot = slot as usize;
        if self.entries.len() <= slot {
            self.entries.resize(slot + 1, None);
        }
        self.entries[slot] = Some(method);
    }
}

impl TypeSystem {
    /// The vtable of a class, building it if it was not built yet.
    ///
    /// Classes initialized from the ahead-of-time cache skip vtable construction; their
    /// vtable is built here on first request.
    ///
    /// # Errors
    /// Returns the failure recorded on the class, or the failure of the construction.
    pub fn ensure_vtable(&self, id: ClassId) -> Result<&Arc<[Option<MethodId>]>> {
        let class = class_of!(self, id)?;
        if let Some(vtable) = class.vtable() {
            return Ok(vtable);
        }

        let _guard = self.lock.lock();
        if let Some(vtable) = class.vtable() {
            return Ok(vtable);
        }
        if let Some(failure) = class.failure() {
            return Err(Error::Load(failure.clone()));
        }
        if let Err(error) = self.build_vtable(id) {
            return Err(Error::Load(class.record_failure(error.into_load_error()).clone()));
        }
        class
            .vtable()
            .ok_or_else(|| malformed_error!("vtable of {} was not published", id))
    }

    /// The method a virtual call through `slot` of `class` dispatches to
    ///
    /// # Errors
    /// Returns an error if the vtable can not be built.
    pub fn vtable_method(&self, class: ClassId, slot: u32) -> Result<Option<MethodId>> {
        Ok(self.ensure_vtable(class)?.get(slot as usize).copied().flatten())
    }

    /// Builds and publishes the vtable and interface offsets of a class; the loader lock
    /// must be held
    pub(crate) fn build_vtable(&self, id: ClassId) -> Result<()> {
        let class = class_of!(self, id)?;
        if class.vtable().is_some() {
            return Ok(());
        }
        if class.is_interface() {
            return self.build_interface_slots(class);
        }

        let methods = self.class_methods(id)?;
        let parent_vtable = match class.parent() {
            Some(parent) => Some(self.ensure_vtable(parent)?.clone()),
            None => None,
        };

        let mut slots = Slots {
            entries: parent_vtable.as_ref().map(|v| v.to_vec()).unwrap_or_default(),
        };
        let mut cur_slot = self.compute_offsets(id, slots.entries.len() as u32)?;
        let offsets = class
            .interface_offsets()
            .ok_or_else(|| malformed_error!("interface offsets of {} were not published", id))?;

        let overrides = self.class_overrides(id)?;
        let mut override_map: HashMap<MethodId, MethodId> = HashMap::new();

        for &(declaration, body) in &overrides {
            let decl = method_of!(self, declaration)?;
            let owner = class_of!(self, decl.class)?;
            if !owner.is_interface() {
                continue;
            }
            let Some(base) = owner.interface_id().and_then(|iid| offsets.offset_of(iid)) else {
                bail_load!(
                    TypeLoad,
                    "{} overrides {}::{} of an interface it does not implement",
                    self.class_name(id),
                    self.class_name(decl.class),
                    decl.name
                );
            };
            let index = self
                .class_methods(decl.class)?
                .iter()
                .position(|method| *method == declaration)
                .ok_or_else(|| malformed_error!("{} is not a method of its class", declaration))?;

            self.inheritance_demand(id, declaration)?;
            let slot = base + index as u32;
            slots.put(slot, body);
            method_of!(self, body)?.set_slot(slot);
            override_map.insert(declaration, body);
        }

        self.fill_interface_slots(class, methods, offsets, &mut slots)?;

        for &method in methods {
            let descriptor = method_of!(self, method)?;
            if !descriptor.is_virtual() {
                continue;
            }
            if !descriptor.flags.is_new_slot() {
                if let Some(overridden) = self.overridden_method(class, descriptor)? {
                    let slot = method_of!(self, overridden)?.slot().ok_or_else(|| {
                        malformed_error!("overridden method {} has no slot", overridden)
                    })?;
                    self.inheritance_demand(id, overridden)?;
                    descriptor.set_slot(slot);
                    override_map.insert(overridden, method);
                }
            }
            let slot = match descriptor.slot() {
                Some(slot) => slot,
                None => {
                    descriptor.set_slot(cur_slot);
                    cur_slot += 1;
                    cur_slot - 1
                }
            };
            if !descriptor.is_abstract() && descriptor.generic_param_count == 0 {
                slots.put(slot, method);
            }
        }

        for &(declaration, body) in &overrides {
            let decl = method_of!(self, declaration)?;
            if class_of!(self, decl.class)?.is_interface() {
                continue;
            }
            let Some(slot) = decl.slot() else {
                bail_load!(
                    TypeLoad,
                    "{} overrides {}::{} which has no vtable slot",
                    self.class_name(id),
                    self.class_name(decl.class),
                    decl.name
                );
            };
            self.inheritance_demand(id, declaration)?;
            slots.put(slot, body);
            method_of!(self, body)?.set_slot(slot);
            override_map.insert(declaration, body);
        }

        if !override_map.is_empty() {
            for entry in slots.entries.iter_mut() {
                if let Some(replacement) = entry.and_then(|method| override_map.get(&method)) {
                    *entry = Some(*replacement);
                }
            }
        }

        let mut size = cur_slot.max(slots.entries.len() as u32);
        if let Some(generic) = class.generic_class {
            self.ensure_vtable(generic.definition)?;
            if let Some(definition_size) = class_of!(self, generic.definition)?.vtable_size() {
                size = size.max(definition_size);
            }
        }
        slots.entries.resize(size as usize, None);

        let vtable: Arc<[Option<MethodId>]> = match parent_vtable {
            Some(parent) if parent[..] == slots.entries[..] => parent,
            _ => Arc::from(slots.entries),
        };
        let _ = class.vtable_size.set(size);
        let _ = class.vtable.set(vtable);
        self.stats.vtables_built();

        log::debug!("{}: vtable of {} slots", self.class_name(id), size);
        if self.config.trace_vtables {
            self.trace_vtable(class);
        }
        Ok(())
    }

    /// Interfaces number their methods by declaration order and carry no implementations
    fn build_interface_slots(&self, class: &ClassDescriptor) -> Result<()> {
        let methods = self.class_methods(class.id)?;
        for (index, method) in methods.iter().enumerate() {
            method_of!(self, *method)?.set_slot(index as u32);
        }
        self.compute_offsets(class.id, 0)?;

        let _ = class.vtable_size.set(methods.len() as u32);
        let _ = class
            .vtable
            .set(methods.iter().map(|method| Some(*method)).collect());
        Ok(())
    }

    /// Stage 3: the slots of every interface in the closure of the class, then of the
    /// ancestors' closures root first
    fn fill_interface_slots(
        &self,
        class: &ClassDescriptor,
        methods: &[MethodId],
        offsets: &InterfaceOffsets,
        slots: &mut Slots,
    ) -> Result<()> {
        let own = self.interface_closure(class.id)?;
        let mut work: Vec<(ClassId, bool)> = own.iter().map(|i| (*i, true)).collect();
        let ancestors = class.supertypes();
        for ancestor in &ancestors[..ancestors.len().saturating_sub(1)] {
            for interface in self.interface_closure(*ancestor)? {
                if !work.iter().any(|(seen, _)| *seen == interface) {
                    work.push((interface, false));
                }
            }
        }

        for (interface, is_own) in work {
            let iface = class_of!(self, interface)?;
            let Some(base) = iface.interface_id().and_then(|iid| offsets.offset_of(iid)) else {
                continue;
            };
            let qualified = format!("{}.", iface.name);
            let full = (!iface.namespace.is_empty())
                .then(|| format!("{}.{}.", iface.namespace, iface.name));

            for (index, &declaration) in self.class_methods(interface)?.iter().enumerate() {
                let slot = base + index as u32;
                let decl = method_of!(self, declaration)?;
                let signature = self.method_signature(declaration)?;

                if is_own && self.slot_open(slots, slot) {
                    for &candidate in methods {
                        let method = method_of!(self, candidate)?;
                        if method.is_virtual()
                            && method.flags.is_public()
                            && method.flags.is_new_slot()
                            && self.same_member(method, &decl.name, signature)?
                        {
                            self.inheritance_demand(class.id, declaration)?;
                            slots.put(slot, candidate);
                            break;
                        }
                    }
                }

                if slots.get(slot).is_none() {
                    'explicit: for &ancestor in class.supertypes().iter().rev() {
                        for &candidate in self.class_methods(ancestor)? {
                            let method = method_of!(self, candidate)?;
                            let named = method.name.strip_suffix(decl.name.as_str()).is_some_and(
                                |prefix| {
                                    prefix == qualified || full.as_deref() == Some(prefix)
                                },
                            );
                            if method.is_virtual()
                                && named
                                && self.signatures_match(
                                    self.method_signature(candidate)?,
                                    signature,
                                    SigMatch::IgnoreGenericOwner,
                                )
                            {
                                self.inheritance_demand(class.id, declaration)?;
                                slots.put(slot, candidate);
                                break 'explicit;
                            }
                        }
                    }
                }

                if self.slot_open(slots, slot) {
                    for &ancestor in class.supertypes().iter().rev() {
                        for &candidate in self.class_methods(ancestor)? {
                            let method = method_of!(self, candidate)?;
                            if method.is_virtual()
                                && method.flags.is_public()
                                && self.same_member(method, &decl.name, signature)?
                            {
                                self.inheritance_demand(class.id, declaration)?;
                                slots.put(slot, candidate);
                                break;
                            }
                        }
                        if !self.slot_open(slots, slot) {
                            break;
                        }
                    }
                }

                if slots.get(slot).is_none() {
                    if let Some(inherited) = self.parent_implementation(class, interface, index)? {
                        slots.put(slot, inherited);
                    }
                }
                if slots.get(slot).is_none() && !class.is_abstract() && !decl.is_static() {
                    bail_load!(
                        TypeLoad,
                        "no implementation for interface method {}::{} in {}",
                        self.class_name(interface),
                        decl.name,
                        self.class_name(class.id)
                    );
                }

                if let Some(implementation) = slots.get(slot) {
                    let method = method_of!(self, implementation)?;
                    if method.slot().is_none() {
                        method.set_slot(slot);
                    }
                }
            }
        }
        Ok(())
    }

    /// The method at `index` of `interface` in the parent's vtable
    fn parent_implementation(
        &self,
        class: &ClassDescriptor,
        interface: ClassId,
        index: usize,
    ) -> Result<Option<MethodId>> {
        let Some(parent) = class.parent() else {
            return Ok(None);
        };
        let Some(base) = self.interface_offset(parent, interface) else {
            return Ok(None);
        };
        Ok(self
            .ensure_vtable(parent)?
            .get(base as usize + index)
            .copied()
            .flatten())
    }

    /// Stage 4: the closest virtual method of an ancestor with the same name and signature
    fn overridden_method(
        &self,
        class: &ClassDescriptor,
        method: &MethodDescriptor,
    ) -> Result<Option<MethodId>> {
        let signature = self.method_signature(method.id)?;
        let ancestors = class.supertypes();
        for &ancestor in ancestors[..ancestors.len().saturating_sub(1)].iter().rev() {
            for &candidate in self.class_methods(ancestor)? {
                let base = method_of!(self, candidate)?;
                if base.is_virtual() && self.same_member(base, &method.name, signature)? {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    /// The `(declaration, body)` pairs of the `MethodImpl` rows of a class.
    ///
    /// Generic instantiations resolve their definition's rows in the instantiation's context.
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::MissingMethod`] if a row names a method that does
    /// not exist.
    pub fn class_overrides(&self, id: ClassId) -> Result<Vec<(MethodId, MethodId)>> {
        let class = class_of!(self, id)?;
        let (owner, context) = match class.generic_class {
            Some(generic) => (generic.definition, Some(generic.context())),
            None => (id, None),
        };
        if class.token.is_null() {
            return Ok(Vec::new());
        }

        let image = self.live_image(class.image())?;
        let resolve = |token: Token| {
            self.resolve_method_in(image.id(), token, context.as_ref(), Some(owner))
        };
        image
            .reader()
            .method_impls_of(class.token)
            .into_iter()
            .map(|row| Ok((resolve(row.declaration)?, resolve(row.body)?)))
            .collect()
    }

    fn slot_open(&self, slots: &Slots, slot: u32) -> bool {
        match slots.get(slot) {
            None => true,
            Some(method) => self.method(method).is_some_and(MethodDescriptor::is_abstract),
        }
    }

    fn same_member(&self, method: &MethodDescriptor, name: &str, signature: SigId) -> Result<bool> {
        Ok(method.name == name
            && self.signatures_match(
                self.method_signature(method.id)?,
                signature,
                SigMatch::IgnoreGenericOwner,
            ))
    }

    /// Consults the security policy for an override or implementation of `base_method`
    fn inheritance_demand(&self, derived: ClassId, base_method: MethodId) -> Result<()> {
        if !self.config.enforce_security {
            return Ok(());
        }
        let Some(policy) = &self.security else {
            return Ok(());
        };
        policy
            .check_inheritance_demand(self, derived, base_method)
            .map_err(|reason| {
                let name = self.method(base_method).map_or("?", |m| m.name.as_str());
                Error::Load(load_error!(
                    SecurityInheritanceDemand,
                    "{} may not override {}: {}",
                    self.class_name(derived),
                    name,
                    reason
                ))
            })
    }

    fn trace_vtable(&self, class: &ClassDescriptor) {
        let (Some(vtable), Some(offsets)) = (class.vtable(), class.interface_offsets()) else {
            return;
        };
        log::trace!(
            "VTable {} (size = {}, interfaces = {})",
            self.class_name(class.id),
            vtable.len(),
            offsets.len()
        );
        for (slot, method) in vtable.iter().enumerate() {
            if let Some(method) = method.and_then(|m| self.method(m)) {
                log::trace!(
                    "  slot {:03}({:03}) {}::{}",
                    slot,
                    method.slot().map_or(-1, i64::from),
                    self.class_name(method.class),
                    method.name
                );
            }
        }
        for entry in offsets.entries() {
            log::trace!(
                "  interface {} at slot {:03}",
                self.class_name(entry.interface),
                entry.base
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        collaborators::SecurityPolicy,
        metadata::{
            builder::{MetadataBuilder, TypeDefBuilder},
            flags::MethodAttributes,
            signatures::{MethodSig, TypeSig},
        },
        test::app_with_corlib,
        typesystem::{ClassId, MethodId, TypeSystem},
        LoadErrorKind, LoaderConfig, WellKnownClass,
    };

    fn virtual_new() -> MethodAttributes {
        MethodAttributes::PUBLIC
            | MethodAttributes::VIRTUAL
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::NEW_SLOT
    }

    fn method_named(ts: &TypeSystem, class: ClassId, name: &str) -> MethodId {
        ts.method_from_name(class, name, None).unwrap().unwrap()
    }

    #[test]
    fn test_object_and_shared_parent_vtable() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let plain = TypeDefBuilder::new()
            .namespace("App")
            .name("Plain")
            .public_class()
            .extends(object)
            .build(&mut b);

        let (ts, app) = app_with_corlib(b);
        let object = ts.well_known(WellKnownClass::Object).unwrap();
        let plain = ts.resolve(app, plain).unwrap();

        let object_vtable = ts.ensure_vtable(object).unwrap().clone();
        assert_eq!(object_vtable.len(), 4);
        assert_eq!(ts.method(method_named(&ts, object, "ToString")).unwrap().slot(), Some(3));
        assert_eq!(ts.method(method_named(&ts, object, "GetType")).unwrap().slot(), None);

        let plain_vtable = ts.ensure_vtable(plain).unwrap();
        assert!(Arc::ptr_eq(&object_vtable, plain_vtable));
    }

    #[test]
    fn test_override_reuses_slot() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let shape = TypeDefBuilder::new()
            .namespace("App")
            .name("Shape")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_method(
            "ToString",
            MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG,
            MethodSig::instance(TypeSig::String, vec![]),
        );
        b.add_method("Area", virtual_new(), MethodSig::instance(TypeSig::R8, vec![]));

        let (ts, app) = app_with_corlib(b);
        let shape = ts.resolve(app, shape).unwrap();
        let to_string = method_named(&ts, shape, "ToString");
        let area = method_named(&ts, shape, "Area");

        let vtable = ts.ensure_vtable(shape).unwrap();
        assert_eq!(vtable.len(), 5);
        assert_eq!(vtable[3], Some(to_string));
        assert_eq!(vtable[4], Some(area));
        assert_eq!(ts.method(area).unwrap().slot(), Some(4));
    }

    #[test]
    fn test_explicit_method_impl() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let object_to_string = b.add_member_ref(
            object,
            "ToString",
            crate::metadata::signatures::MemberSig::Method(MethodSig::instance(
                TypeSig::String,
                vec![],
            )),
        );
        let named = TypeDefBuilder::new()
            .namespace("App")
            .name("Named")
            .public_class()
            .extends(object)
            .build(&mut b);
        let describe = b.add_method(
            "Describe",
            MethodAttributes::PRIVATE
                | MethodAttributes::VIRTUAL
                | MethodAttributes::NEW_SLOT
                | MethodAttributes::FINAL,
            MethodSig::instance(TypeSig::String, vec![]),
        );
        b.add_method_impl(named, describe, object_to_string);

        let (ts, app) = app_with_corlib(b);
        let named = ts.resolve(app, named).unwrap();
        let describe = method_named(&ts, named, "Describe");
        let vtable = ts.ensure_vtable(named).unwrap();
        assert_eq!(vtable[3], Some(describe));
        assert_eq!(ts.method(describe).unwrap().slot(), Some(3));
        assert_eq!(ts.class_overrides(named).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_interface_implementation_fails() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let runnable = TypeDefBuilder::new()
            .namespace("App")
            .name("IRunnable")
            .public_interface()
            .build(&mut b);
        b.add_method(
            "Run",
            virtual_new() | MethodAttributes::ABSTRACT,
            MethodSig::instance(TypeSig::Void, vec![]),
        );
        let lazy = TypeDefBuilder::new()
            .namespace("App")
            .name("Lazy")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_interface_impl(lazy, runnable);

        let (ts, app) = app_with_corlib(b);
        let lazy = ts.resolve(app, lazy).unwrap();
        let err = ts.ensure_vtable(lazy).unwrap_err();
        assert_eq!(err.as_load_error().unwrap().kind, LoadErrorKind::TypeLoad);
        assert!(err.to_string().contains("IRunnable::Run"));
        assert!(ts.ensure_vtable(lazy).is_err());
    }

    struct DenyAll;

    impl SecurityPolicy for DenyAll {
        fn check_inheritance_demand(
            &self,
            ts: &TypeSystem,
            _derived: ClassId,
            base_method: MethodId,
        ) -> Result<(), String> {
            Err(format!("{} is protected", ts.method(base_method).unwrap().name()))
        }
    }

    #[test]
    fn test_security_demand_rejects_override() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let sneaky = TypeDefBuilder::new()
            .namespace("App")
            .name("Sneaky")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_method(
            "GetHashCode",
            MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG,
            MethodSig::instance(TypeSig::I4, vec![]),
        );

        let ts = TypeSystem::new(LoaderConfig {
            enforce_security: true,
            ..LoaderConfig::testing()
        })
        .with_security_policy(Arc::new(DenyAll));
        ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
        let app = ts.load_metadata(b.build());

        let sneaky = ts.resolve(app, sneaky).unwrap();
        let err = ts.ensure_vtable(sneaky).unwrap_err();
        let load = err.as_load_error().unwrap();
        assert_eq!(load.kind, LoadErrorKind::SecurityInheritanceDemand);
        assert!(load.message.contains("GetHashCode is protected"));
    }
}
