//! Service layer: the request-dispatch pipeline and its collaborators.
//!
//! ```text
//! Client -> forward listener -> rate_limiter (IP) -> load_balancer -> rate_limiter (upstream)
//!        -> circuit_breaker -> http_client -> upstream
//! ```
//!
//! [`forward`] wires these into the per-request pipeline described by the
//! module table; every other module here is a standalone, independently
//! testable collaborator.

pub mod admin;
pub mod auth;
pub mod circuit_breaker;
pub mod forward;
pub mod headers;
pub mod http_client;
pub mod lifecycle;
pub mod load_balancer;
pub mod metrics;
pub mod rate_limiter;
