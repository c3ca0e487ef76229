//! Gateway-wide error type and its mapping onto the external JSON error envelope.

use actix_web::{HttpResponse, http::StatusCode};
use serde_json::json;

/// Numeric error codes carried in the `errorCode` field of the external envelope.
///
/// These are stable across releases; clients may match on them instead of
/// parsing `errorMessage`.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const BAD_REQUEST: i32 = 1000;
    pub const UNAUTHORIZED: i32 = 1001;
    pub const NOT_FOUND: i32 = 1003;
    pub const IP_RATE_LIMITED: i32 = 1004;
    pub const INTERNAL: i32 = 2000;
    pub const BAD_GATEWAY: i32 = 2001;
    pub const SERVICE_UNAVAILABLE: i32 = 2002;
    pub const GATEWAY_TIMEOUT: i32 = 2003;
    pub const CIRCUIT_OPEN: i32 = 3000;
    pub const UPSTREAM_RATE_LIMITED: i32 = 3001;
}

/// Errors that can surface from the forward pipeline or from startup configuration.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("no available upstream in group '{group}'")]
    NoAvailableUpstream { group: String },

    #[error("too many requests from this IP")]
    IpRateLimited,

    #[error("too many requests to upstream '{upstream}'")]
    UpstreamRateLimited { upstream: String },

    #[error("circuit open for upstream '{upstream}'")]
    CircuitOpen { upstream: String },

    #[error("failed to build outbound request for upstream '{upstream}': {message}")]
    BuildRequest { upstream: String, message: String },

    #[error("network error contacting upstream '{upstream}': {message}")]
    Network { upstream: String, message: String },

    #[error("timed out contacting upstream '{upstream}'")]
    Timeout { upstream: String },

    #[error("upstream '{upstream}' returned {status} after retries exhausted")]
    UpstreamExhausted { upstream: String, status: u16 },

    #[error("request body exceeds the {limit_bytes} byte limit")]
    BodyTooLarge { limit_bytes: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The numeric error code reported in the external envelope.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::ConfigInvalid(_) => codes::BAD_REQUEST,
            GatewayError::NoAvailableUpstream { .. } => codes::SERVICE_UNAVAILABLE,
            GatewayError::IpRateLimited => codes::IP_RATE_LIMITED,
            GatewayError::UpstreamRateLimited { .. } => codes::UPSTREAM_RATE_LIMITED,
            GatewayError::CircuitOpen { .. } => codes::CIRCUIT_OPEN,
            GatewayError::BuildRequest { .. } => codes::INTERNAL,
            GatewayError::Network { .. } => codes::BAD_GATEWAY,
            GatewayError::Timeout { .. } => codes::GATEWAY_TIMEOUT,
            GatewayError::UpstreamExhausted { .. } => codes::BAD_GATEWAY,
            GatewayError::BodyTooLarge { .. } => codes::BAD_REQUEST,
            GatewayError::Internal(_) => codes::INTERNAL,
        }
    }

    /// The HTTP status this error maps to, for both the response itself and
    /// anything (metrics, logs) that wants the real status rather than the
    /// `errorCode` value.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NoAvailableUpstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::IpRateLimited | GatewayError::UpstreamRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Network { .. } | GatewayError::UpstreamExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BuildRequest { .. } | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl actix_web::error::ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "errorCode": self.code(),
            "errorMessage": self.to_string(),
        }))
    }
}
