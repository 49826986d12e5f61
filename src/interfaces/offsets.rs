use bitvec::prelude::*;

use crate::{
    typesystem::{ClassId, TypeSystem},
    Result,
};

/// Where the methods of one implemented interface start in a class's vtable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceOffsetEntry {
    /// The implemented interface
    pub interface: ClassId,
    /// Its interface id
    pub interface_id: u32,
    /// VTable slot of the interface's first method
    pub base: u32,
}

/// The interface offset table of a class, sorted by interface id
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InterfaceOffsets {
    entries: Box<[InterfaceOffsetEntry]>,
    bitmap: BitVec<usize, Lsb0>,
    max_interface_id: u32,
}

impl InterfaceOffsets {
    /// Builds the table from unsorted entries
    #[must_use]
    pub fn new(mut entries: Vec<InterfaceOffsetEntry>) -> Self {
        entries.sort_by_key(|entry| entry.interface_id);
        entries.dedup_by_key(|entry| entry.interface_id);

        let max_interface_id = entries.last().map_or(0, |entry| entry.interface_id);
        let mut bitmap = BitVec::new();
        if !entries.is_empty() {
            bitmap.resize(max_interface_id as usize + 1, false);
            for entry in &entries {
                bitmap.set(entry.interface_id as usize, true);
            }
        }

        InterfaceOffsets {
            entries: entries.into_boxed_slice(),
            bitmap,
            max_interface_id,
        }
    }

    /// Returns true if the interface with id `interface_id` is implemented
    #[must_use]
    pub fn implements(&self, interface_id: u32) -> bool {
        self.bitmap
            .get(interface_id as usize)
            .is_some_and(|bit| *bit)
    }

    /// Base slot of the interface with id `interface_id`
    #[must_use]
    pub fn offset_of(&self, interface_id: u32) -> Option<u32> {
        if !self.implements(interface_id) {
            return None;
        }
        self.entries
            .binary_search_by_key(&interface_id, |entry| entry.interface_id)
            .ok()
            .map(|index| self.entries[index].base)
    }

    /// All entries ordered by interface id
    #[must_use]
    pub fn entries(&self) -> &[InterfaceOffsetEntry] {
        &self.entries
    }

    /// Largest interface id in the table, 0 when empty
    #[must_use]
    pub fn max_interface_id(&self) -> u32 {
        self.max_interface_id
    }

    /// Number of implemented interfaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the class implements no interface
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TypeSystem {
    /// Computes and publishes the interface offset table of a class.
    ///
    /// Every interface `class` declares (directly or through interface inheritance) gets a
    /// contiguous range starting at `start_slot`, even when an ancestor implements it too.
    /// The remaining interfaces of the ancestors keep the base slot they have in the parent.
    /// An interface also lists itself, at the slot following its inherited interfaces.
    ///
    /// The table is published once; later calls recompute the slot count but keep the first
    /// published table. Returns the first slot after the newly assigned ranges.
    ///
    /// ## Arguments
    /// * 'id'         - The class
    /// * 'start_slot' - First free vtable slot, usually the parent's vtable size
    ///
    /// # Errors
    /// Returns an error if an interface or the parent fails to load.
    pub fn compute_offsets(&self, id: ClassId, start_slot: u32) -> Result<u32> {
        let class = class_of!(self, id)?;
        let _guard = self.lock.lock();

        let closure = self.interface_closure(id)?;
        let mut entries: Vec<InterfaceOffsetEntry> = Vec::with_capacity(closure.len());
        let mut next = start_slot;
        for &interface in &closure {
            entries.push(InterfaceOffsetEntry {
                interface,
                interface_id: self.required_interface_id(interface)?,
                base: next,
            });
            next += self.class_methods(interface)?.len() as u32;
        }

        if let Some(parent) = class.parent() {
            entries.extend(
                self.parent_offsets(parent)?
                    .entries()
                    .iter()
                    .filter(|entry| !closure.contains(&entry.interface)),
            );
        }

        if class.is_interface() {
            entries.push(InterfaceOffsetEntry {
                interface: id,
                interface_id: self.required_interface_id(id)?,
                base: next,
            });
        }

        let _ = class.interface_offsets.set(InterfaceOffsets::new(entries));
        Ok(next)
    }

    /// The interfaces `id` declares, each followed by the interfaces it inherits, without
    /// duplicates. Interfaces of the ancestors are not included.
    ///
    /// # Errors
    /// Returns an error if an interface fails to resolve.
    pub fn interface_closure(&self, id: ClassId) -> Result<Vec<ClassId>> {
        let mut closure = Vec::new();
        self.collect_interfaces(id, &mut closure)?;
        Ok(closure)
    }

    fn collect_interfaces(&self, id: ClassId, closure: &mut Vec<ClassId>) -> Result<()> {
        for interface in self.class_interfaces(id)? {
            if !closure.contains(interface) {
                closure.push(*interface);
            }
            self.collect_interfaces(*interface, closure)?;
        }
        Ok(())
    }

    /// Base slot of `interface` in the vtable of `class`, once the offsets are published
    #[must_use]
    pub fn interface_offset(&self, class: ClassId, interface: ClassId) -> Option<u32> {
        let iid = self.class(interface)?.interface_id()?;
        self.class(class)?.interface_offsets()?.offset_of(iid)
    }

    fn parent_offsets(&self, parent: ClassId) -> Result<&InterfaceOffsets> {
        let descriptor = class_of!(self, parent)?;
        if descriptor.interface_offsets().is_none() {
            self.init(parent);
        }
        match descriptor.interface_offsets() {
            Some(offsets) => Ok(offsets),
            None => bail_load!(
                TypeLoad,
                "parent {} failed to initialize",
                self.class_name(parent)
            ),
        }
    }

    fn required_interface_id(&self, interface: ClassId) -> Result<u32> {
        let descriptor = class_of!(self, interface)?;
        match descriptor.interface_id() {
            Some(id) => Ok(id),
            None => self.assign_interface_id(descriptor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            builder::{MetadataBuilder, TypeDefBuilder},
            flags::MethodAttributes,
            signatures::{MethodSig, TypeSig},
        },
        test::app_with_corlib,
    };

    fn entry(interface_id: u32, base: u32) -> InterfaceOffsetEntry {
        InterfaceOffsetEntry {
            interface: ClassId {
                image: crate::typesystem::ImageId(1),
                index: interface_id,
            },
            interface_id,
            base,
        }
    }

    #[test]
    fn test_table_sorted_with_bitmap() {
        let offsets = InterfaceOffsets::new(vec![entry(9, 6), entry(2, 4), entry(5, 5)]);
        let ids: Vec<u32> = offsets.entries().iter().map(|e| e.interface_id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(offsets.max_interface_id(), 9);
        assert!(offsets.implements(5));
        assert!(!offsets.implements(4));
        assert!(!offsets.implements(100));
        assert_eq!(offsets.offset_of(9), Some(6));
        assert_eq!(offsets.offset_of(3), None);
        assert!(InterfaceOffsets::default().is_empty());
    }

    #[test]
    fn test_offsets_for_inherited_interfaces() {
        let abstract_method = MethodAttributes::PUBLIC
            | MethodAttributes::VIRTUAL
            | MethodAttributes::ABSTRACT
            | MethodAttributes::NEW_SLOT
            | MethodAttributes::HIDE_BY_SIG;
        let mut b = MetadataBuilder::new("App");
        let corlib = b.add_assembly_ref("mscorlib");
        let object = b.reference_type(corlib, "System", "Object");

        let readable = TypeDefBuilder::new()
            .namespace("App")
            .name("IReadable")
            .public_interface()
            .build(&mut b);
        b.add_method("Read", abstract_method, MethodSig::instance(TypeSig::I4, vec![]));
        b.add_method("Peek", abstract_method, MethodSig::instance(TypeSig::I4, vec![]));
        let stream = TypeDefBuilder::new()
            .namespace("App")
            .name("IStream")
            .public_interface()
            .build(&mut b);
        b.add_method("Close", abstract_method, MethodSig::instance(TypeSig::Void, vec![]));
        b.add_interface_impl(stream, readable);
        let file = TypeDefBuilder::new()
            .namespace("App")
            .name("File")
            .public_class()
            .extends(object)
            .build(&mut b);
        b.add_interface_impl(file, stream);

        let (ts, app) = app_with_corlib(b);
        let readable = ts.resolve(app, readable).unwrap();
        let stream = ts.resolve(app, stream).unwrap();
        let file = ts.resolve(app, file).unwrap();

        assert_eq!(ts.interface_closure(file).unwrap(), vec![stream, readable]);
        assert_eq!(ts.compute_offsets(file, 4).unwrap(), 7);
        assert_eq!(ts.interface_offset(file, stream), Some(4));
        assert_eq!(ts.interface_offset(file, readable), Some(5));

        assert_eq!(ts.compute_offsets(stream, 0).unwrap(), 2);
        assert_eq!(ts.interface_offset(stream, readable), Some(0));
        assert_eq!(ts.interface_offset(stream, stream), Some(2));

        let table = ts.class(file).unwrap().interface_offsets().unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.implements(ts.class(readable).unwrap().interface_id().unwrap()));
    }
}
