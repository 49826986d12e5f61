#![allow(unused_macros)]

/// Helper macro for building a [`crate::LoadError`] of the given kind
///
/// ```rust, ignore
///  let err = load_error!(TypeLoad, "could not load parent of {}", name);
/// ```
macro_rules! load_error {
    ($kind:ident, $($arg:tt)*) => {
        crate::LoadError::new(crate::LoadErrorKind::$kind, format!($($arg)*))
    };
}

/// Helper macro for returning a [`crate::LoadError`] as [`crate::Error::Load`]
///
/// ```rust, ignore
///  if packing > 128 {
///      bail_load!(TypeLoad, "invalid packing size {}", packing);
///  }
/// ```
macro_rules! bail_load {
    ($kind:ident, $($arg:tt)*) => {
        return Err(crate::Error::Load(load_error!($kind, $($arg)*)))
    };
}

/// Helper macro for fetching a class descriptor that must exist
///
/// ```rust, ignore
///  let class = class_of!(self, id)?;
/// ```
macro_rules! class_of {
    ($ts:expr, $id:expr) => {
        $ts.class($id)
            .ok_or_else(|| malformed_error!("class handle {} does not exist", $id))
    };
}

/// Helper macro for fetching a method descriptor that must exist
///
/// ```rust, ignore
///  let method = method_of!(self, id)?;
/// ```
macro_rules! method_of {
    ($ts:expr, $id:expr) => {
        $ts.method($id)
            .ok_or_else(|| malformed_error!("method handle {} does not exist", $id))
    };
}
