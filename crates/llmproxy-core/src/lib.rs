//! Core library for the llmproxy reverse proxy: configuration, the
//! request-dispatch pipeline, and the collaborators it is built from.
//!
//! See [`services`] for the pipeline itself (balancing, breaking, rate
//! limiting, HTTP dispatch, metrics, admin introspection, lifecycle) and
//! [`models`]/[`config`] for the on-disk configuration contract.

pub mod config;
pub mod error;
pub mod logs;
pub mod models;
pub mod services;
