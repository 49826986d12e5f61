//! Field layout.
//!
//! Computes the offset of every field, the instance and static sizes, the minimum alignment
//! and the GC reference map of a class. The parent is always laid out first and the derived
//! class continues where the parent ended.
//!
//! # Layout kinds
//!
//! - **Auto** and **Sequential**: fields are placed in order, each at the next offset that
//!   satisfies its alignment. Auto-layout reference types place reference fields first
//!   (GC-aware mode) unless [`crate::LoaderConfig::gc_aware_layout`] is off.
//! - **Explicit**: offsets come from `FieldLayout` rows. Reference fields must be pointer
//!   aligned and may not overlap non-reference data.
//!
//! Static fields are always sequential and live in a separate area whose size is
//! [`StaticLayout::class_size`].
//!
//! # Examples
//!
//! ```rust
//! use dotclass::{metadata::builder::MetadataBuilder, TypeSystem, WellKnownClass};
//!
//! let ts = TypeSystem::default();
//! ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
//!
//! let string = ts.well_known(WellKnownClass::String)?;
//! let layout = ts.layout_fields(string)?;
//! assert_eq!(layout.instance_size, 16 + 4 + 2 + 2);
//! assert!(!layout.blittable);
//! # Ok::<(), dotclass::Error>(())
//! ```

use std::sync::atomic::Ordering;

use bitvec::prelude::*;

use crate::{
    collaborators::CachedClassInfo,
    metadata::flags::TypeLayout,
    typesystem::{
        classify_core_type, fixed_size, ClassDescriptor, ClassFlags, ClassId, ClassKind,
        FieldDescriptor, FieldId, RuntimeType, TypeSystem, WellKnownClass,
    },
    Error, Result,
};

/// Largest packing size a `ClassLayout` row may request
const MAX_PACKING: u32 = 128;

/// Field used by compilers to give an otherwise empty type a size
const PRIVATE_PLACEHOLDER: &str = "$PRIVATE$";

/// The result of laying out the instance fields of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceLayout {
    /// Size of an instance including the object header
    pub instance_size: u32,
    /// Largest alignment required by an instance field
    pub min_align: u32,
    /// Instances hold managed references
    pub has_references: bool,
    /// The managed representation equals the native one
    pub blittable: bool,
    /// Packing size from the `ClassLayout` row, 0 for the default
    pub packing_size: u32,
    /// One bit per pointer-sized word of the instance, set where a managed reference lives.
    /// Empty for layouts taken from the ahead-of-time cache.
    pub gc_map: BitVec<usize, Lsb0>,
}

impl InstanceLayout {
    /// Returns true if the pointer-sized word at `word` holds a managed reference
    #[must_use]
    pub fn is_reference_word(&self, word: usize) -> bool {
        self.gc_map.get(word).is_some_and(|bit| *bit)
    }

    /// Indices of the words holding managed references
    pub fn reference_words(&self) -> impl Iterator<Item = usize> + '_ {
        self.gc_map.iter_ones()
    }
}

/// The result of laying out the static fields of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticLayout {
    /// Size of the static field area
    pub class_size: u32,
    /// Some static field holds managed references
    pub has_static_refs: bool,
}

/// Storage requirements of a single field
#[derive(Debug)]
struct FieldShape {
    size: u32,
    align: u32,
    is_reference: bool,
    has_references: bool,
    blittable: bool,
    /// Reference map of an embedded value type, indexed like its own instance words
    gc_map: Option<BitVec<usize, Lsb0>>,
}

/// Mutable state while placing instance fields
struct Placement {
    real_size: u32,
    min_align: u32,
    has_references: bool,
    blittable: bool,
    gc_map: BitVec<usize, Lsb0>,
}

fn align_up(value: u32, align: u32) -> u32 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

impl TypeSystem {
    /// Lays out the fields of a class.
    ///
    /// Idempotent: the first successful run is published and returned by every later call.
    /// A failed run is recorded on the class and returned again without re-running. Once a
    /// failure is recorded on the class, that failure is returned even if the instance
    /// layout was published before the static layout failed.
    ///
    /// # Errors
    /// Returns [`crate::LoadErrorKind::TypeLoad`] for invalid packing, missing or misaligned
    /// explicit offsets, overlapping reference fields and value types containing themselves,
    /// or the error that prevented a field type from loading.
    pub fn layout_fields(&self, id: ClassId) -> Result<&InstanceLayout> {
        let class = class_of!(self, id)?;
        if let Some(failure) = class.failure() {
            return Err(Error::Load(failure.clone()));
        }
        if let Some(layout) = class.instance_layout.get() {
            return Ok(layout);
        }

        let _guard = self.lock.lock();
        if let Some(failure) = class.failure() {
            return Err(Error::Load(failure.clone()));
        }
        if let Some(layout) = class.instance_layout.get() {
            return Ok(layout);
        }

        if class.layout_running.swap(true, Ordering::AcqRel) {
            bail_load!(TypeLoad, "{} contains itself by value", self.class_name(id));
        }
        let result = self.run_layout(class);
        class.layout_running.store(false, Ordering::Release);

        match result {
            Ok(()) => class
                .instance_layout
                .get()
                .ok_or_else(|| malformed_error!("layout of {} was not published", id)),
            Err(error) => Err(Error::Load(class.record_failure(error.into_load_error()).clone())),
        }
    }

    /// Byte offset of a field, `None` for literal statics which have no storage.
    ///
    /// Classes laid out from the ahead-of-time cache compute their field offsets here, on
    /// first request.
    ///
    /// # Errors
    /// Returns an error if the field does not exist or the layout fails.
    pub fn field_offset(&self, field: FieldId) -> Result<Option<u32>> {
        let class = class_of!(self, field.class)?;
        self.layout_fields(field.class)?;
        let descriptor = self.field_descriptor(field)?;
        if descriptor.offset().is_some() || descriptor.flags.is_literal() {
            return Ok(descriptor.offset());
        }

        let _guard = self.lock.lock();
        if descriptor.offset().is_none() {
            if descriptor.is_static() {
                self.compute_static_layout(class)?;
            } else {
                self.compute_instance_layout(class)?;
            }
        }
        Ok(descriptor.offset())
    }

    /// The ahead-of-time class information for `id`, if a cache is installed and knows it
    pub(crate) fn cached_class_info(&self, id: ClassId) -> Option<CachedClassInfo> {
        self.aot.as_ref()?.try_get_cached_class_info(self, id)
    }

    fn field_descriptor(&self, field: FieldId) -> Result<&FieldDescriptor> {
        self.class_fields(field.class)?
            .get(field.index as usize)
            .ok_or_else(|| malformed_error!("field {} does not exist", field))
    }

    fn run_layout(&self, class: &ClassDescriptor) -> Result<()> {
        if let Some(info) = self.cached_class_info(class.id) {
            let _ = class.instance_layout.set(InstanceLayout {
                instance_size: info.instance_size,
                min_align: info.min_align,
                has_references: info.has_references,
                blittable: info.blittable,
                packing_size: info.packing_size,
                gc_map: BitVec::new(),
            });
            let _ = class.static_layout.set(StaticLayout {
                class_size: info.class_size,
                has_static_refs: info.has_static_refs,
            });
            class.set_class_flags(ClassFlags::AOT_LAYOUT);
            log::debug!("{}: layout taken from the aot cache", self.class_name(class.id));
            return Ok(());
        }

        self.stats.layouts_computed();
        let instance = self.compute_instance_layout(class)?;
        log::debug!(
            "{}: instance size {} align {}",
            self.class_name(class.id),
            instance.instance_size,
            instance.min_align
        );
        let _ = class.instance_layout.set(instance);

        // Static fields may be of the class's own type, so their types resolve only once
        // the instance size is visible
        let statics = self.compute_static_layout(class)?;
        let _ = class.static_layout.set(statics);
        Ok(())
    }

    /// Packing and explicit size from the `ClassLayout` row of the class or its definition
    fn class_layout_row(&self, class: &ClassDescriptor) -> Result<(u32, u32)> {
        if !matches!(class.kind, ClassKind::Definition | ClassKind::GenericInstance)
            || class.token.is_null()
        {
            return Ok((0, 0));
        }

        let image = self.live_image(class.image())?;
        let Some(row) = image.reader().class_layout(class.token) else {
            return Ok((0, 0));
        };

        let packing = u32::from(row.packing_size);
        if packing > MAX_PACKING || (packing != 0 && !packing.is_power_of_two()) {
            bail_load!(
                TypeLoad,
                "{} has invalid packing size {}",
                self.class_name(class.id),
                packing
            );
        }
        Ok((packing, row.class_size))
    }

    fn compute_instance_layout(&self, class: &ClassDescriptor) -> Result<InstanceLayout> {
        let header = self.config.header_size();
        let ptr = self.config.pointer_size;

        if matches!(class.kind, ClassKind::Pointer | ClassKind::FnPtr) {
            let instance_size = header + ptr;
            return Ok(InstanceLayout {
                instance_size,
                min_align: ptr,
                has_references: false,
                blittable: true,
                packing_size: 0,
                gc_map: bitvec![usize, Lsb0; 0; (instance_size / ptr) as usize],
            });
        }

        let (base, mut state) = match class.parent() {
            Some(parent) => {
                let parent = self.layout_fields(parent)?;
                let state = Placement {
                    real_size: parent.instance_size,
                    min_align: parent.min_align,
                    has_references: parent.has_references,
                    blittable: parent.blittable,
                    gc_map: parent.gc_map.clone(),
                };
                (parent.instance_size, state)
            }
            None => {
                let base = if class.class_flags().contains(ClassFlags::MODULE_TYPE) {
                    0
                } else {
                    header
                };
                let state = Placement {
                    real_size: base,
                    min_align: 1,
                    has_references: false,
                    blittable: true,
                    gc_map: BitVec::new(),
                };
                (base, state)
            }
        };
        state.real_size += class.reserved_size;

        let (packing, explicit_size) = self.class_layout_row(class)?;
        let fields = self.class_fields(class.id)?;
        let mut shapes = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            if field.is_static() {
                continue;
            }
            let shape = self.field_shape(FieldId {
                class: class.id,
                index: index as u32,
            })?;
            shapes.push((index, shape));
        }

        let layout = class.flags.layout();
        if layout == TypeLayout::Explicit {
            self.place_explicit(class, fields, &shapes, packing, &mut state)?;
        } else {
            let placeholder = shapes.len() == 1
                && state.real_size == header
                && fields.get(shapes[0].0).is_some_and(|f| f.name == PRIVATE_PLACEHOLDER);
            let passes = if self.uses_gc_aware_layout(class, layout) {
                2
            } else {
                1
            };

            for pass in 0..passes {
                for (index, shape) in &shapes {
                    if passes == 2 && (pass == 0) != shape.is_reference {
                        continue;
                    }
                    if placeholder {
                        self.place_field(&fields[*index], state.real_size, shape, &mut state);
                        continue;
                    }
                    let size = shape.size;
                    let mut align = shape.align;
                    if packing != 0 {
                        align = align.min(packing);
                    }
                    if shape.is_reference || shape.has_references {
                        align = align.max(ptr);
                    }

                    let offset = align_up(state.real_size, align);
                    state.real_size = offset + size;
                    state.min_align = state.min_align.max(align);
                    self.place_field(&fields[*index], offset, shape, &mut state);
                }
            }
        }

        let mut instance_size = state.real_size.max(base);
        if explicit_size != 0 {
            instance_size = instance_size.max(base + explicit_size);
        }
        if class.is_valuetype() && instance_size <= header {
            instance_size = header + 1;
        }
        if layout != TypeLayout::Explicit {
            instance_size = align_up(instance_size, state.min_align);
        }

        if self.is_well_known(class.id, WellKnownClass::String) {
            state.blittable = false;
        }
        state
            .gc_map
            .resize(instance_size.div_ceil(ptr) as usize, false);

        Ok(InstanceLayout {
            instance_size,
            min_align: state.min_align,
            has_references: state.has_references,
            blittable: state.blittable,
            packing_size: packing,
            gc_map: state.gc_map,
        })
    }

    fn uses_gc_aware_layout(&self, class: &ClassDescriptor, layout: TypeLayout) -> bool {
        if !self.config.gc_aware_layout || layout != TypeLayout::Auto || class.is_valuetype() {
            return false;
        }
        !self
            .config
            .gc_aware_exempt
            .as_ref()
            .is_some_and(|(namespace, name)| {
                class.namespace == *namespace && class.name == *name
            })
    }

    fn place_explicit(
        &self,
        class: &ClassDescriptor,
        fields: &[FieldDescriptor],
        shapes: &[(usize, FieldShape)],
        packing: u32,
        state: &mut Placement,
    ) -> Result<()> {
        const DATA: u8 = 1;
        const REFERENCE: u8 = 2;

        let header = self.config.header_size();
        let ptr = self.config.pointer_size;
        let mut kinds: Vec<u8> = Vec::new();

        for (index, shape) in shapes {
            let field = &fields[*index];
            let Some(explicit) = field.explicit_offset else {
                bail_load!(
                    TypeLoad,
                    "field {} of {} has no explicit offset",
                    field.name,
                    self.class_name(class.id)
                );
            };
            let offset = explicit + header;
            if shape.is_reference && offset % ptr != 0 {
                bail_load!(
                    TypeLoad,
                    "reference field {} of {} is not pointer aligned (offset {})",
                    field.name,
                    self.class_name(class.id),
                    explicit
                );
            }

            let end = (offset + shape.size) as usize;
            if kinds.len() < end {
                kinds.resize(end, 0);
            }
            for byte in offset as usize..end {
                let relative = byte as u32 - offset;
                let kind = if shape.is_reference
                    || shape
                        .gc_map
                        .as_ref()
                        .is_some_and(|map| map.get(((relative + header) / ptr) as usize).is_some_and(|b| *b))
                {
                    REFERENCE
                } else {
                    DATA
                };
                if kinds[byte] != 0 && kinds[byte] != kind {
                    bail_load!(
                        TypeLoad,
                        "field {} of {} overlaps a reference field with non-reference data",
                        field.name,
                        self.class_name(class.id)
                    );
                }
                kinds[byte] = kind;
            }

            let align = if packing != 0 {
                shape.align.min(packing)
            } else {
                shape.align
            };
            state.min_align = state.min_align.max(align);
            state.real_size = state.real_size.max(offset + shape.size);
            self.place_field(field, offset, shape, state);
        }
        Ok(())
    }

    /// Publishes the offset of an instance field and folds its shape into the class facts
    fn place_field(
        &self,
        field: &FieldDescriptor,
        offset: u32,
        shape: &FieldShape,
        state: &mut Placement,
    ) {
        let _ = field.offset.set(offset);
        let ptr = self.config.pointer_size;
        let header = self.config.header_size();

        state.blittable &= shape.blittable;
        state.has_references |= shape.is_reference || shape.has_references;

        let mut mark = |word: usize| {
            if state.gc_map.len() <= word {
                state.gc_map.resize(word + 1, false);
            }
            state.gc_map.set(word, true);
        };
        if shape.is_reference {
            mark((offset / ptr) as usize);
        } else if let Some(map) = &shape.gc_map {
            for word in map.iter_ones() {
                let position = offset + (word as u32 * ptr).saturating_sub(header);
                mark((position / ptr) as usize);
            }
        }
    }

    fn compute_static_layout(&self, class: &ClassDescriptor) -> Result<StaticLayout> {
        let mut layout = StaticLayout::default();
        let fields = self.class_fields(class.id)?;

        for (index, field) in fields.iter().enumerate() {
            if !field.is_static() || field.flags.is_literal() {
                continue;
            }
            let shape = self.field_shape(FieldId {
                class: class.id,
                index: index as u32,
            })?;

            let offset = align_up(layout.class_size, shape.align);
            let _ = field.offset.set(offset);
            layout.class_size = offset + shape.size;
            layout.has_static_refs |= shape.is_reference || shape.has_references;
        }
        Ok(layout)
    }

    fn field_shape(&self, field: FieldId) -> Result<FieldShape> {
        let ty = self.field_type(field)?;
        let runtime = self.types.get(ty);
        let ptr = self.config.pointer_size;

        if matches!(runtime, RuntimeType::Var(_) | RuntimeType::MVar(_)) || self.types.is_reference(ty)
        {
            return Ok(FieldShape {
                size: ptr,
                align: ptr,
                is_reference: true,
                has_references: true,
                blittable: false,
                gc_map: None,
            });
        }

        if let Some((size, align)) = fixed_size(runtime, &self.config) {
            let blittable = match runtime {
                RuntimeType::ByRef(_) => false,
                RuntimeType::Ptr(_) | RuntimeType::FnPtr(_) => true,
                other => WellKnownClass::for_primitive(other)
                    .and_then(|class| classify_core_type(class.name()))
                    .is_some_and(|info| info.blittable),
            };
            return Ok(FieldShape {
                size,
                align,
                is_reference: false,
                has_references: false,
                blittable,
                gc_map: None,
            });
        }

        let value_class = self.class_of_type(ty)?;
        let layout = self.layout_fields(value_class)?;
        Ok(FieldShape {
            size: layout
                .instance_size
                .saturating_sub(self.config.header_size()),
            align: layout.min_align,
            is_reference: false,
            has_references: layout.has_references,
            blittable: layout.blittable,
            gc_map: Some(layout.gc_map.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        collaborators::{AotCache, CachedClassInfo},
        metadata::{
            builder::{MetadataBuilder, TypeDefBuilder},
            flags::{FieldAttributes, TypeAttributes},
            signatures::TypeSig,
            token::Token,
        },
        test::{app_with_corlib, corlib_system},
        typesystem::{ClassFlags, ClassId, FieldId, TypeSystem},
        LoadErrorKind, LoaderConfig, WellKnownClass,
    };

    fn value_type_ref(b: &mut MetadataBuilder) -> Token {
        let corlib = b.add_assembly_ref("mscorlib");
        b.reference_type(corlib, "System", "ValueType")
    }

    fn offsets(ts: &TypeSystem, class: ClassId) -> Vec<Option<u32>> {
        (0..ts.class_fields(class).unwrap().len())
            .map(|index| {
                ts.field_offset(FieldId {
                    class,
                    index: index as u32,
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_primitive_layouts() {
        let (ts, _) = corlib_system();
        let int32 = ts.well_known(WellKnownClass::Int32).unwrap();
        let layout = ts.layout_fields(int32).unwrap();
        assert_eq!(layout.instance_size, 20);
        assert_eq!(layout.min_align, 4);
        assert!(layout.blittable);
        assert!(!layout.has_references);

        let boolean = ts.well_known(WellKnownClass::Boolean).unwrap();
        assert!(!ts.layout_fields(boolean).unwrap().blittable);

        let void = ts.well_known(WellKnownClass::Void).unwrap();
        assert_eq!(ts.layout_fields(void).unwrap().instance_size, 17);
    }

    #[test]
    fn test_gc_aware_auto_layout() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let mixed = TypeDefBuilder::new()
            .namespace("App")
            .name("Mixed")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("flag", FieldAttributes::PUBLIC, TypeSig::U1);
        b.add_field("name", FieldAttributes::PUBLIC, TypeSig::String);
        b.add_field("count", FieldAttributes::PUBLIC, TypeSig::I4);

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, mixed).unwrap();
        let layout = ts.layout_fields(class).unwrap();

        assert_eq!(offsets(&ts, class), vec![Some(24), Some(16), Some(28)]);
        assert_eq!(layout.instance_size, 32);
        assert!(layout.has_references);
        assert_eq!(layout.reference_words().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_declaration_order_without_gc_aware_layout() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let mixed = TypeDefBuilder::new()
            .namespace("App")
            .name("Mixed")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("flag", FieldAttributes::PUBLIC, TypeSig::U1);
        b.add_field("name", FieldAttributes::PUBLIC, TypeSig::String);

        let ts = TypeSystem::new(LoaderConfig::testing().with_gc_aware_layout(false));
        ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
        let app = ts.load_metadata(b.build());
        let class = ts.resolve(app, mixed).unwrap();

        assert_eq!(offsets(&ts, class), vec![Some(16), Some(24)]);
        assert_eq!(ts.layout_fields(class).unwrap().instance_size, 32);
    }

    #[test]
    fn test_sequential_packing() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let packed = TypeDefBuilder::new()
            .namespace("App")
            .name("Packed")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("tag", FieldAttributes::PUBLIC, TypeSig::U1);
        b.add_field("value", FieldAttributes::PUBLIC, TypeSig::I8);
        b.set_class_layout(packed, 2, 0);

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, packed).unwrap();
        assert_eq!(offsets(&ts, class), vec![Some(16), Some(18)]);
        assert_eq!(ts.value_size(class).unwrap(), (10, 2));
    }

    #[test]
    fn test_invalid_packing_is_sticky() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let odd = TypeDefBuilder::new()
            .namespace("App")
            .name("Odd")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("value", FieldAttributes::PUBLIC, TypeSig::I4);
        b.set_class_layout(odd, 3, 0);

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, odd).unwrap();
        let err = ts.layout_fields(class).unwrap_err();
        assert_eq!(err.as_load_error().unwrap().kind, LoadErrorKind::TypeLoad);

        let runs = ts.stats().layouts_computed;
        assert!(ts.layout_fields(class).is_err());
        assert_eq!(ts.stats().layouts_computed, runs);
        assert!(ts.class(class).unwrap().failure().is_some());
    }

    #[test]
    fn test_explicit_union() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let union = TypeDefBuilder::new()
            .namespace("App")
            .name("Union")
            .flags(TypeAttributes::PUBLIC | TypeAttributes::EXPLICIT_LAYOUT | TypeAttributes::SEALED)
            .extends(value_type)
            .build(&mut b);
        let low = b.add_field("low", FieldAttributes::PUBLIC, TypeSig::I4);
        let all = b.add_field("all", FieldAttributes::PUBLIC, TypeSig::I8);
        b.set_field_offset(low, 0);
        b.set_field_offset(all, 0);

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, union).unwrap();
        assert_eq!(offsets(&ts, class), vec![Some(16), Some(16)]);
        assert_eq!(ts.layout_fields(class).unwrap().instance_size, 24);
    }

    #[test]
    fn test_explicit_reference_overlap_fails() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let bad = TypeDefBuilder::new()
            .namespace("App")
            .name("Bad")
            .flags(TypeAttributes::PUBLIC | TypeAttributes::EXPLICIT_LAYOUT | TypeAttributes::SEALED)
            .extends(value_type)
            .build(&mut b);
        let reference = b.add_field("reference", FieldAttributes::PUBLIC, TypeSig::Object);
        let number = b.add_field("number", FieldAttributes::PUBLIC, TypeSig::I8);
        b.set_field_offset(reference, 0);
        b.set_field_offset(number, 0);

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, bad).unwrap();
        let err = ts.layout_fields(class).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_explicit_missing_and_misaligned_offsets() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let explicit = TypeAttributes::PUBLIC | TypeAttributes::EXPLICIT_LAYOUT | TypeAttributes::SEALED;
        let missing = TypeDefBuilder::new()
            .namespace("App")
            .name("Missing")
            .flags(explicit)
            .extends(value_type)
            .build(&mut b);
        b.add_field("value", FieldAttributes::PUBLIC, TypeSig::I4);
        let misaligned = TypeDefBuilder::new()
            .namespace("App")
            .name("Misaligned")
            .flags(explicit)
            .extends(value_type)
            .build(&mut b);
        let reference = b.add_field("reference", FieldAttributes::PUBLIC, TypeSig::String);
        b.set_field_offset(reference, 4);

        let (ts, app) = app_with_corlib(b);
        let missing = ts.resolve(app, missing).unwrap();
        assert!(ts.layout_fields(missing).unwrap_err().to_string().contains("no explicit offset"));
        let misaligned = ts.resolve(app, misaligned).unwrap();
        assert!(ts.layout_fields(misaligned).unwrap_err().to_string().contains("pointer aligned"));
    }

    #[test]
    fn test_embedded_value_type_and_statics() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let value_type = b.reference_type(corlib, "System", "ValueType");
        let object = b.reference_type(corlib, "System", "Object");
        let inner = TypeDefBuilder::new()
            .namespace("App")
            .name("Inner")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("id", FieldAttributes::PUBLIC, TypeSig::I4);
        b.add_field("label", FieldAttributes::PUBLIC, TypeSig::String);
        let outer = TypeDefBuilder::new()
            .namespace("App")
            .name("Outer")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("flag", FieldAttributes::PUBLIC, TypeSig::Boolean);
        b.add_field("inner", FieldAttributes::PUBLIC, TypeSig::ValueType(inner));
        b.add_field("Shared", FieldAttributes::PUBLIC | FieldAttributes::STATIC, TypeSig::ValueType(inner));
        b.add_field(
            "Limit",
            FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
            TypeSig::I4,
        );

        let (ts, app) = app_with_corlib(b);
        let inner = ts.resolve(app, inner).unwrap();
        assert_eq!(ts.value_size(inner).unwrap(), (16, 8));

        let outer = ts.resolve(app, outer).unwrap();
        let layout = ts.layout_fields(outer).unwrap().clone();
        assert_eq!(offsets(&ts, outer), vec![Some(16), Some(24), Some(0), None]);
        assert_eq!(layout.instance_size, 40);
        assert!(layout.has_references);
        assert!(!layout.blittable);
        assert_eq!(layout.reference_words().collect::<Vec<_>>(), vec![4]);

        let statics = ts.class(outer).unwrap().static_layout().copied().unwrap();
        assert_eq!(statics.class_size, 16);
        assert!(statics.has_static_refs);
    }

    #[test]
    fn test_value_type_containing_itself_fails() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let node = TypeDefBuilder::new()
            .namespace("App")
            .name("Node")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("next", FieldAttributes::PUBLIC, TypeSig::ValueType(node));

        let (ts, app) = app_with_corlib(b);
        let class = ts.resolve(app, node).unwrap();
        let err = ts.layout_fields(class).unwrap_err();
        assert!(err.to_string().contains("contains itself"));
    }

    #[test]
    fn test_empty_value_type_and_class_size() {
        let mut b = MetadataBuilder::new("App");
        let value_type = value_type_ref(&mut b);
        let empty = TypeDefBuilder::new()
            .namespace("App")
            .name("Empty")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        let buffer = TypeDefBuilder::new()
            .namespace("App")
            .name("Buffer")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("first", FieldAttributes::PUBLIC, TypeSig::U1);
        b.set_class_layout(buffer, 0, 64);

        let (ts, app) = app_with_corlib(b);
        let empty = ts.resolve(app, empty).unwrap();
        assert_eq!(ts.value_size(empty).unwrap(), (1, 1));
        let buffer = ts.resolve(app, buffer).unwrap();
        assert_eq!(ts.value_size(buffer).unwrap(), (64, 1));
    }

    #[test]
    fn test_private_placeholder_only_on_empty_base() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let value_type = b.reference_type(corlib, "System", "ValueType");
        let object = b.reference_type(corlib, "System", "Object");
        let marker = TypeDefBuilder::new()
            .namespace("App")
            .name("Marker")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("$PRIVATE$", FieldAttributes::PRIVATE, TypeSig::I4);
        let counted = TypeDefBuilder::new()
            .namespace("App")
            .name("Counted")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("count", FieldAttributes::PUBLIC, TypeSig::I4);
        let tagged = TypeDefBuilder::new()
            .namespace("App")
            .name("Tagged")
            .public_class()
            .extends(counted)
            .build(&mut b);
        b.add_field("$PRIVATE$", FieldAttributes::PRIVATE, TypeSig::I4);

        let (ts, app) = app_with_corlib(b);
        let marker = ts.resolve(app, marker).unwrap();
        assert_eq!(ts.value_size(marker).unwrap().0, 1);

        let tagged = ts.resolve(app, tagged).unwrap();
        assert_eq!(offsets(&ts, tagged), vec![Some(20)]);
        assert_eq!(ts.layout_fields(tagged).unwrap().instance_size, 24);
    }

    #[test]
    fn test_static_failure_is_returned_again() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let value_type = b.reference_type(corlib, "System", "ValueType");
        let object = b.reference_type(corlib, "System", "Object");
        let looped = TypeDefBuilder::new()
            .namespace("App")
            .name("Looped")
            .public_value_type()
            .extends(value_type)
            .build(&mut b);
        b.add_field("next", FieldAttributes::PUBLIC, TypeSig::ValueType(looped));
        let holder = TypeDefBuilder::new()
            .namespace("App")
            .name("Holder")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("id", FieldAttributes::PUBLIC, TypeSig::I4);
        b.add_field(
            "Default",
            FieldAttributes::PUBLIC | FieldAttributes::STATIC,
            TypeSig::ValueType(looped),
        );

        let (ts, app) = app_with_corlib(b);
        let holder = ts.resolve(app, holder).unwrap();
        let first = ts.layout_fields(holder).unwrap_err();
        let runs = ts.stats().layouts_computed;

        let second = ts.layout_fields(holder).unwrap_err();
        assert_eq!(second.as_load_error(), first.as_load_error());
        assert_eq!(ts.stats().layouts_computed, runs);
        assert!(!ts.init(holder));
    }

    struct FixedCache;

    impl AotCache for FixedCache {
        fn try_get_cached_class_info(&self, ts: &TypeSystem, class: ClassId) -> Option<CachedClassInfo> {
            let descriptor = ts.class(class)?;
            (descriptor.name() == "Cached").then(|| CachedClassInfo {
                instance_size: 24,
                class_size: 0,
                vtable_size: 4,
                min_align: 4,
                blittable: true,
                ..CachedClassInfo::default()
            })
        }
    }

    #[test]
    fn test_aot_layout_defers_field_offsets() {
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");
        let cached = TypeDefBuilder::new()
            .namespace("App")
            .name("Cached")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_field("a", FieldAttributes::PUBLIC, TypeSig::I4);
        b.add_field("b", FieldAttributes::PUBLIC, TypeSig::I4);

        let ts = TypeSystem::new(LoaderConfig::testing()).with_aot_cache(Arc::new(FixedCache));
        ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
        let app = ts.load_metadata(b.build());
        let class = ts.resolve(app, cached).unwrap();

        let layout = ts.layout_fields(class).unwrap();
        assert_eq!(layout.instance_size, 24);
        assert!(ts.class(class).unwrap().class_flags().contains(ClassFlags::AOT_LAYOUT));
        assert!(ts.class_fields(class).unwrap().iter().all(|f| f.offset().is_none()));

        assert_eq!(offsets(&ts, class), vec![Some(16), Some(20)]);
    }
}
