//! Data models and domain types for the llmproxy-core gateway.
//!
//! These types describe the on-disk configuration contract (deserialized via
//! `serde`) and are validated before any listener is allowed to accept traffic.
//! See [`settings`] for the root document and [`upstream`] / [`forward`] for the
//! three-level `forward -> group -> upstream` graph.

pub mod forward;
pub mod settings;
pub mod upstream;
