use strum::Display;
use thiserror::Error;

use crate::{metadata::token::Token, typesystem::ImageId};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The category of a type-load failure.
///
/// These mirror the exceptions a managed runtime raises when a type can not be made usable.
/// Except for [`LoadErrorKind::FatalCyclicInit`], a failure is recorded on the class that
/// caused it and reported again on every later use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LoadErrorKind {
    /// The type itself is invalid (bad layout, broken hierarchy, missing implementation)
    TypeLoad,
    /// A referenced method does not exist
    MissingMethod,
    /// A referenced field does not exist
    MissingField,
    /// A referenced assembly is not loaded
    AssemblyLoad,
    /// The security policy rejected an override or interface implementation
    SecurityInheritanceDemand,
    /// A class initialization re-entered itself on the loading thread
    FatalCyclicInit,
}

/// A type-load failure with its category and a human readable description
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct LoadError {
    /// Failure category
    pub kind: LoadErrorKind,
    /// Description naming the offending type or member
    pub message: String,
}

impl LoadError {
    /// Creates a new load error
    #[must_use]
    pub fn new(kind: LoadErrorKind, message: impl Into<String>) -> Self {
        LoadError {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if the error terminates the process
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind == LoadErrorKind::FatalCyclicInit
    }
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Metadata Errors
/// - [`Error::Malformed`] - Metadata rows are inconsistent
/// - [`Error::InvalidToken`] - A token addresses the wrong table
/// - [`Error::TypeNotFound`] - A type token has no row
/// - [`Error::TypeNameNotFound`] - A type name lookup failed
///
/// ## Loader Errors
/// - [`Error::Load`] - A type failed to load, see [`LoadErrorKind`]
/// - [`Error::ImageUnloaded`] - The image was unloaded
/// - [`Error::RecursionLimit`] - Type nesting exceeded the configured depth
///
/// # Examples
///
/// ```rust
/// use dotclass::{Error, LoadErrorKind};
///
/// fn describe(err: &Error) -> &'static str {
///     match err {
///         Error::Load(load) if load.kind == LoadErrorKind::AssemblyLoad => "missing assembly",
///         Error::Load(_) => "type load failure",
///         _ => "other",
///     }
/// }
/// # let _ = describe;
/// ```
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The metadata is damaged and could not be interpreted.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A token does not address a table the operation accepts.
    #[error("Token {0} is not valid here")]
    InvalidToken(Token),

    /// Failed to find a type row for the given token.
    #[error("Failed to find type - {0}")]
    TypeNotFound(Token),

    /// Failed to find a type by name.
    #[error("Failed to find type - {namespace}.{name}")]
    TypeNameNotFound {
        /// Namespace that was searched
        namespace: String,
        /// Simple name that was searched
        name: String,
    },

    /// A type could not be made usable.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// The image was unloaded and its types can no longer be resolved.
    #[error("Image {0} has been unloaded")]
    ImageUnloaded(ImageId),

    /// Recursion limit reached.
    ///
    /// Type construction (nested generic arguments, array of array of ...) is bounded to
    /// prevent stack exhaustion on hostile metadata.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),
}

impl Error {
    /// The recorded load failure carried by this error, if any
    #[must_use]
    pub fn as_load_error(&self) -> Option<&LoadError> {
        match self {
            Error::Load(err) => Some(err),
            _ => None,
        }
    }

    /// Converts this error into a [`LoadError`], classifying non-load errors as `TypeLoad`
    #[must_use]
    pub fn into_load_error(self) -> LoadError {
        match self {
            Error::Load(err) => err,
            other => LoadError::new(LoadErrorKind::TypeLoad, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let err = LoadError::new(LoadErrorKind::MissingMethod, "App.Foo::Bar");
        assert_eq!(err.to_string(), "MissingMethod: App.Foo::Bar");
        assert!(!err.is_fatal());
        assert!(LoadError::new(LoadErrorKind::FatalCyclicInit, "x").is_fatal());
    }

    #[test]
    fn test_into_load_error() {
        let err = Error::TypeNotFound(Token(0x02000009));
        let load = err.into_load_error();
        assert_eq!(load.kind, LoadErrorKind::TypeLoad);
        assert!(load.message.contains("0x02000009"));

        let original = LoadError::new(LoadErrorKind::AssemblyLoad, "Lib");
        assert_eq!(Error::Load(original.clone()).into_load_error(), original);
    }

    #[test]
    fn test_malformed_macro() {
        let err = malformed_error!("bad row {}", 3);
        match err {
            Error::Malformed { message, line, .. } => {
                assert_eq!(message, "bad row 3");
                assert!(line > 0);
            }
            _ => panic!("unexpected variant"),
        }
    }
}
