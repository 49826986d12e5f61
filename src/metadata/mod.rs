//! Metadata access for the class loader.
//!
//! The loader consumes metadata through the [`reader::MetadataReader`] trait. Rows are
//! returned already decoded ([`rows`]), with signatures in their token-based form
//! ([`signatures`]). [`builder`] provides an in-memory implementation of the trait.
//!
//! # Key Components
//!
//! - [`token::Token`] - table + row reference
//! - [`flags`] - ECMA-335 attribute sets
//! - [`reader::MetadataReader`] - row-level access to one image
//! - [`builder::MetadataBuilder`] - in-memory image construction

pub mod builder;
pub mod flags;
pub mod reader;
pub mod rows;
pub mod signatures;
pub mod token;
