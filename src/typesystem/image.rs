use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bitvec::prelude::*;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    metadata::{reader::MetadataReader, token::Token},
    typesystem::{
        ClassDescriptor, ClassId, GenericParam, ImageId, Memo, MethodDescriptor, MethodId,
    },
};

/// Key of the array class cache: element class, rank and whether the array is bounded
pub(crate) type ArrayKey = (ClassId, u32, bool);

/// Start of the field and method ranges owned by a `TypeDef`, in row order
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemberOwner {
    pub(crate) type_def: Token,
    pub(crate) field_list: u32,
    pub(crate) method_list: u32,
}

/// A loaded image: its metadata and the arena holding every descriptor it owns.
///
/// Descriptors are appended to the arenas and never removed, so [`ClassId`] and [`MethodId`]
/// handles stay valid for the lifetime of the owning [`crate::TypeSystem`]. Unloading only
/// clears the lookup caches.
pub struct Image {
    pub(crate) id: ImageId,
    pub(crate) reader: Arc<dyn MetadataReader>,
    pub(crate) classes: boxcar::Vec<ClassDescriptor>,
    pub(crate) methods: boxcar::Vec<MethodDescriptor>,
    pub(crate) class_cache: SkipMap<Token, ClassId>,
    pub(crate) typeref_cache: DashMap<Token, ClassId>,
    pub(crate) method_cache: DashMap<Token, MethodId>,
    pub(crate) array_cache: DashMap<ArrayKey, ClassId>,
    pub(crate) pointer_cache: DashMap<ClassId, ClassId>,
    pub(crate) generic_param_cache: DashMap<(GenericParam, bool), ClassId>,
    pub(crate) name_cache: Memo<HashMap<(String, String), Token>>,
    pub(crate) member_owners: Memo<Vec<MemberOwner>>,
    pub(crate) interface_ids: Mutex<BitVec<usize, Lsb0>>,
    pub(crate) unloaded: AtomicBool,
}

impl Image {
    pub(crate) fn new(id: ImageId, reader: Arc<dyn MetadataReader>) -> Self {
        Image {
            id,
            reader,
            classes: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            class_cache: SkipMap::new(),
            typeref_cache: DashMap::new(),
            method_cache: DashMap::new(),
            array_cache: DashMap::new(),
            pointer_cache: DashMap::new(),
            generic_param_cache: DashMap::new(),
            name_cache: Memo::new(),
            member_owners: Memo::new(),
            interface_ids: Mutex::new(BitVec::new()),
            unloaded: AtomicBool::new(false),
        }
    }

    /// Handle of this image
    #[must_use]
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Assembly name
    #[must_use]
    pub fn name(&self) -> &str {
        self.reader.name()
    }

    /// The metadata backing this image
    #[must_use]
    pub fn reader(&self) -> &dyn MetadataReader {
        self.reader.as_ref()
    }

    /// Returns true once the image was unloaded
    #[must_use]
    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    /// Number of class descriptors in the arena
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.count()
    }

    /// The class loaded for a `TypeDef` token, if it was loaded
    #[must_use]
    pub fn cached_class(&self, token: Token) -> Option<ClassId> {
        self.class_cache.get(&token).map(|entry| *entry.value())
    }

    pub(crate) fn next_class_id(&self) -> ClassId {
        ClassId {
            image: self.id,
            index: self.classes.count() as u32,
        }
    }

    pub(crate) fn next_method_id(&self) -> MethodId {
        MethodId {
            image: self.id,
            index: self.methods.count() as u32,
        }
    }

    /// Appends a class; must be called under the loader lock so `next_class_id` matches
    pub(crate) fn push_class(&self, class: ClassDescriptor) -> ClassId {
        let index = self.classes.push(class);
        ClassId {
            image: self.id,
            index: index as u32,
        }
    }

    /// Appends a method; must be called under the loader lock so `next_method_id` matches
    pub(crate) fn push_method(&self, method: MethodDescriptor) -> MethodId {
        let index = self.methods.push(method);
        MethodId {
            image: self.id,
            index: index as u32,
        }
    }

    pub(crate) fn clear_caches(&self) {
        self.class_cache.clear();
        self.typeref_cache.clear();
        self.method_cache.clear();
        self.array_cache.clear();
        self.pointer_cache.clear();
        self.generic_param_cache.clear();
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("classes", &self.classes.count())
            .field("unloaded", &self.is_unloaded())
            .finish()
    }
}
