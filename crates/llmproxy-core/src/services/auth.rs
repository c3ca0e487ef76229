//! Applies an [`AuthDescriptor`] to an outbound request.

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use crate::models::upstream::AuthDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authenticator rejected empty credential for {0}")]
    EmptyCredential(&'static str),
    #[error("credential value is not a valid header value: {0}")]
    InvalidHeaderValue(String),
}

/// Constructed [`AuthDescriptor`], validated once up front so `apply` itself
/// cannot fail for configuration reasons.
#[derive(Debug, Clone)]
pub struct Authenticator {
    descriptor: AuthDescriptor,
}

impl Authenticator {
    pub fn new(descriptor: AuthDescriptor) -> Result<Self, AuthError> {
        match &descriptor {
            AuthDescriptor::None => {}
            AuthDescriptor::Bearer { token } => {
                if token.trim().is_empty() {
                    return Err(AuthError::EmptyCredential("bearer token"));
                }
            }
            AuthDescriptor::Basic { username, password } => {
                if username.trim().is_empty() || password.trim().is_empty() {
                    return Err(AuthError::EmptyCredential("basic username/password"));
                }
            }
        }
        Ok(Self { descriptor })
    }

    /// Applies the configured scheme to `headers`, setting `Authorization`.
    /// A no-op for the `none` variant.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), AuthError> {
        let value = match &self.descriptor {
            AuthDescriptor::None => return Ok(()),
            AuthDescriptor::Bearer { token } => format!("Bearer {}", token.trim()),
            AuthDescriptor::Basic { username, password } => {
                let raw = format!("{}:{}", username.trim(), password.trim());
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
                format!("Basic {encoded}")
            }
        };
        let header_value = HeaderValue::from_str(&value)
            .map_err(|e| AuthError::InvalidHeaderValue(e.to_string()))?;
        headers.insert(AUTHORIZATION, header_value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_leaves_headers_untouched() {
        let auth = Authenticator::new(AuthDescriptor::None).unwrap();
        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn bearer_sets_authorization() {
        let auth = Authenticator::new(AuthDescriptor::Bearer {
            token: "sk-test".to_string(),
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
    }

    #[test]
    fn basic_encodes_username_password() {
        let auth = Authenticator::new(AuthDescriptor::Basic {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        let value = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert!(value.starts_with("Basic "));
    }

    #[test]
    fn empty_bearer_token_rejected_at_construction() {
        let err = Authenticator::new(AuthDescriptor::Bearer {
            token: "   ".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, AuthError::EmptyCredential(_)));
    }
}
