use bitvec::prelude::*;
use parking_lot::Mutex;

use crate::typesystem::Image;

/// Number of ids available before the bitset first grows
const INITIAL_CAPACITY: usize = 128;

/// Allocates interface ids.
///
/// Ids are handed out lowest-free-first from a bitset that doubles when exhausted. Each id is
/// also recorded in the bitset of the image that owns the interface, and unloading the image
/// returns all of its ids at once. An id is never reused while its image stays loaded.
pub struct InterfaceIdAllocator {
    used: Mutex<BitVec<usize, Lsb0>>,
}

impl Default for InterfaceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceIdAllocator {
    /// Creates an allocator with no ids in use
    #[must_use]
    pub fn new() -> Self {
        InterfaceIdAllocator {
            used: Mutex::new(bitvec![usize, Lsb0; 0; INITIAL_CAPACITY]),
        }
    }

    /// Assigns the lowest free id to an interface owned by `image`
    pub fn assign(&self, image: &Image) -> u32 {
        let mut used = self.used.lock();
        let id = match used.first_zero() {
            Some(id) => id,
            None => {
                let id = used.len();
                used.resize((id * 2).max(INITIAL_CAPACITY), false);
                id
            }
        };
        used.set(id, true);

        let mut owned = image.interface_ids.lock();
        if owned.len() <= id {
            owned.resize(id + 1, false);
        }
        owned.set(id, true);

        log::trace!("interface id {} assigned in {}", id, image.name());
        id as u32
    }

    /// Returns every id owned by `image` to the free pool
    pub fn release_image(&self, image: &Image) {
        let mut used = self.used.lock();
        let mut owned = image.interface_ids.lock();
        for id in owned.iter_ones() {
            if id < used.len() {
                used.set(id, false);
            }
        }
        log::debug!("released {} interface ids of {}", owned.count_ones(), image.name());
        owned.clear();
    }

    /// Number of ids currently assigned
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.used.lock().count_ones()
    }

    /// Current size of the id space
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.used.lock().len()
    }
}

impl std::fmt::Debug for InterfaceIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceIdAllocator")
            .field("in_use", &self.in_use())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{metadata::builder::MetadataBuilder, typesystem::ImageId};

    fn image(index: u32, name: &str) -> Image {
        Image::new(ImageId(index), Arc::new(MetadataBuilder::new(name).build()))
    }

    #[test]
    fn test_lowest_free_first() {
        let allocator = InterfaceIdAllocator::new();
        let first = image(1, "First");
        let second = image(2, "Second");

        assert_eq!(allocator.assign(&first), 0);
        assert_eq!(allocator.assign(&second), 1);
        assert_eq!(allocator.assign(&first), 2);

        allocator.release_image(&first);
        assert_eq!(allocator.in_use(), 1);
        assert_eq!(allocator.assign(&second), 0);
        assert_eq!(allocator.assign(&second), 2);
        assert_eq!(allocator.assign(&second), 3);
    }

    #[test]
    fn test_growth_doubles() {
        let allocator = InterfaceIdAllocator::new();
        let owner = image(1, "Many");
        for expected in 0..=INITIAL_CAPACITY as u32 {
            assert_eq!(allocator.assign(&owner), expected);
        }
        assert_eq!(allocator.capacity(), INITIAL_CAPACITY * 2);
        assert_eq!(owner.interface_ids.lock().count_ones(), INITIAL_CAPACITY + 1);
    }
}
