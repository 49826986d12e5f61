// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

//! # dotclass
//!
//! Runtime class loading for ECMA-335 (.NET) type metadata. `dotclass` turns the rows of one
//! or more metadata images into the descriptors a managed runtime executes against: classes
//! with resolved parents and interfaces, generic instantiations, instance and static field
//! layouts, interface offset tables and virtual method tables.
//!
//! ## Features
//!
//! - **Lazy loading** - classes are materialized the first time a token or name refers to them
//! - **Generics** - canonical instantiations of classes, methods and signatures
//! - **Field layout** - auto, sequential and explicit layout with packing, GC-aware ordering and
//!   reference bitmaps
//! - **Dispatch** - interface offsets and vtables following the CLI override rules
//! - **Thread safety** - one reentrant loader lock serialises mutation; published state is
//!   read lock-free
//!
//! ## Quick Start
//!
//! ```rust
//! use dotclass::prelude::*;
//!
//! let ts = TypeSystem::default();
//! let corlib = ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
//!
//! let string = ts.class_from_name(corlib, "System", "String")?;
//! assert!(ts.init(string));
//!
//! let class = ts.class(string).unwrap();
//! assert_eq!(class.parent(), Some(ts.well_known(WellKnownClass::Object)?));
//! assert!(class.vtable().is_some());
//! # Ok::<(), dotclass::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - the [`metadata::reader::MetadataReader`] trait the loader consumes, and an
//!   in-memory implementation
//! - [`typesystem`] - the [`TypeSystem`] context, descriptors and the runtime type interner
//! - [`loader`] - token and name resolution, members, synthetic classes and initialization
//! - [`generics`] - inflation of types, signatures, methods and classes
//! - [`layout`] - instance and static field layout
//! - [`interfaces`] - interface ids and interface offset tables
//! - [`vtable`] - vtable construction and signature matching
//! - [`collaborators`] - host-supplied security policy and ahead-of-time cache
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade: `debug` for class creation and initialization,
//! `warn` for recorded failures, `error` before fatal termination and `trace` for vtable
//! dumps when [`LoaderConfig::trace_vtables`] is set. No logger is installed by the library.
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`]. Class load failures carry a [`LoadError`] whose
//! [`LoadErrorKind`] mirrors the exception a runtime would raise. A failure is recorded on
//! the class the first time it occurs and returned unchanged by every later call.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Shared fixtures used by unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dotclass::prelude::*;
///
/// let ts = TypeSystem::new(LoaderConfig::default());
/// ts.load_metadata(MetadataBuilder::core_library("mscorlib").build());
/// let object = ts.well_known(WellKnownClass::Object)?;
/// assert!(ts.init(object));
/// # Ok::<(), dotclass::Error>(())
/// ```
pub mod prelude;

/// Host-supplied services: inheritance-security policy and ahead-of-time class cache
pub mod collaborators;

/// Loader configuration
pub mod config;

/// Metadata access: tokens, attribute flags, decoded rows and signatures
pub mod metadata;

/// The type system context, descriptors and runtime types
pub mod typesystem;

/// Class resolution, member population, synthetic classes and initialization
pub mod loader;

/// Generic instantiation
pub mod generics;

/// Instance and static field layout
pub mod layout;

/// Interface ids and interface offset tables
pub mod interfaces;

/// VTable construction
pub mod vtable;

/// `dotclass` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotclass` Error type
///
/// # Examples
///
/// ```rust
/// use dotclass::{Error, TypeSystem};
///
/// let ts = TypeSystem::default();
/// match ts.well_known(dotclass::WellKnownClass::Object) {
///     Ok(_) => println!("core library loaded"),
///     Err(Error::TypeNameNotFound { namespace, name }) => println!("{namespace}.{name} missing"),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// A recorded class load failure and its kind
pub use error::{LoadError, LoadErrorKind};

/// Loader configuration and the reaction to fatal conditions
pub use config::{FatalPolicy, LoaderConfig};

/// The collaborator traits a host may install
pub use collaborators::{AotCache, CachedClassInfo, SecurityPolicy};

/// The type system context and its most used handles
pub use typesystem::{ClassId, FieldId, ImageId, MethodId, TypeSystem, WellKnownClass};
