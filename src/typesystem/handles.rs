use std::fmt;

/// Handle of a loaded image
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ImageId(pub(crate) u32);

/// Handle of a class descriptor: the arena of its image plus the arena index
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ClassId {
    pub(crate) image: ImageId,
    pub(crate) index: u32,
}

/// Handle of a method descriptor
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MethodId {
    pub(crate) image: ImageId,
    pub(crate) index: u32,
}

/// Handle of a field: its declaring class and the position in the class's field array
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FieldId {
    /// Declaring class
    pub class: ClassId,
    /// Index into the class's fields
    pub index: u32,
}

impl ImageId {
    /// Arena index of the image
    #[must_use]
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl ClassId {
    /// Image whose arena holds the descriptor
    #[must_use]
    pub fn image(&self) -> ImageId {
        self.image
    }
}

impl MethodId {
    /// Image whose arena holds the descriptor
    #[must_use]
    pub fn image(&self) -> ImageId {
        self.image
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}:{}", self.image.0, self.index)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}:{}", self.image.0, self.index)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/field#{}", self.class, self.index)
    }
}
