//! Configuration loading and cross-object validation.
//!
//! [`loader`] reads and deserializes the YAML document from disk.
//! [`validation`] walks the `forward -> group -> upstream` graph it produces
//! and reports every problem it finds, not just the first.

pub mod loader;
pub mod validation;
