//! Outbound HTTP client: URL composition, default headers, and retry.
//!
//! One [`UpstreamClient`] is built per upstream group and shared by every
//! upstream inside it; pooling, proxying, and TLS are configured once at
//! construction from [`HttpClientConfig`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, HOST, USER_AGENT};
use reqwest::{Method, Url};

use crate::models::upstream::{HttpClientConfig, RetryConfig};
use crate::services::auth::Authenticator;
use crate::services::headers::apply_all;
use crate::models::upstream::HeaderOp;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("upstream '{upstream}' has an unparseable base url: {message}")]
    InvalidBaseUrl { upstream: String, message: String },
    #[error("upstream '{upstream}' base url is missing a host")]
    MissingHost { upstream: String },
    #[error("failed to apply auth or headers for upstream '{upstream}': {message}")]
    RequestBuild { upstream: String, message: String },
    #[error("network error contacting '{upstream}': {message}")]
    Network { upstream: String, message: String },
    #[error("timed out contacting '{upstream}'")]
    Timeout { upstream: String },

    #[error("client for upstream '{upstream}' is closed")]
    Closed { upstream: String },
}

/// The outcome of [`compose_url`]: whether the client path or the upstream's
/// own path/query/fragment wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlCompositionMode {
    /// Upstream base carries no meaningful path; client path/query/fragment are kept.
    BasePlusPath,
    /// Upstream base carries its own path; client path/query/fragment are discarded.
    EndpointOverride,
}

/// Composes the outbound URL from a client-observed request and an upstream
/// base URL, per §4.6: endpoint-override mode when the base has a non-empty,
/// non-`/` path, base-plus-path mode otherwise.
pub fn compose_url(
    upstream_name: &str,
    base: &str,
    client_path: &str,
    client_query: Option<&str>,
) -> Result<(Url, UrlCompositionMode), ClientError> {
    let normalized_base = if base.contains("://") {
        base.to_string()
    } else {
        format!("http://{base}")
    };
    let mut url = Url::parse(&normalized_base).map_err(|e| ClientError::InvalidBaseUrl {
        upstream: upstream_name.to_string(),
        message: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ClientError::MissingHost {
            upstream: upstream_name.to_string(),
        });
    }

    let base_path = url.path();
    if base_path.is_empty() || base_path == "/" {
        url.set_path(client_path);
        url.set_query(client_query);
        Ok((url, UrlCompositionMode::BasePlusPath))
    } else {
        Ok((url, UrlCompositionMode::EndpointOverride))
    }
}

/// One group's pooled outbound client plus its per-upstream policies applied per call.
pub struct UpstreamClient {
    http: reqwest::Client,
    config: HttpClientConfig,
    closed: AtomicBool,
}

impl UpstreamClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_idle_timeout(Duration::from_millis(config.keep_alive_ms))
            .pool_max_idle_per_host(config.idle_per_host);

        if let Some(proxy_url) = &config.forward_proxy {
            if let Ok(proxy) = reqwest::Proxy::all(proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let http = builder.build().map_err(|e| ClientError::RequestBuild {
            upstream: "<client construction>".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            http,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Releases pooled connections and makes every subsequent [`Self::execute`]
    /// call fail. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Builds the default headers (§4.6 item 2) applied only when not already present.
    pub fn default_headers(&self, original_host: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("LLMProxy/1.0"));
        let connection = if self.config.keep_alive_ms > 0 {
            "keep-alive"
        } else {
            "close"
        };
        headers.insert(CONNECTION, HeaderValue::from_static(connection));
        if let Some(host) = original_host {
            if let Ok(value) = HeaderValue::from_str(host) {
                headers.insert("x-forwarded-host", value);
            }
        }
        headers
    }

    /// Applies auth, then upstream header ops, then defaults (defaults never override).
    pub fn build_headers(
        &self,
        mut inbound: HeaderMap,
        auth: &Authenticator,
        header_ops: &[HeaderOp],
        upstream_name: &str,
        original_host: Option<&str>,
    ) -> Result<HeaderMap, ClientError> {
        inbound.remove(HOST);
        auth.apply(&mut inbound).map_err(|e| ClientError::RequestBuild {
            upstream: upstream_name.to_string(),
            message: e.to_string(),
        })?;
        apply_all(&mut inbound, header_ops).map_err(|e| ClientError::RequestBuild {
            upstream: upstream_name.to_string(),
            message: e.to_string(),
        })?;
        for (key, value) in self.default_headers(original_host) {
            if let Some(key) = key {
                if !inbound.contains_key(&key) {
                    inbound.insert(key, value);
                }
            }
        }
        Ok(inbound)
    }

    /// Executes one call, retrying per [`RetryConfig`] if configured. `build_request`
    /// is invoked fresh for every attempt so the body stream can be re-read.
    pub async fn execute(
        &self,
        upstream_name: &str,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Vec<u8>,
        retry: Option<&RetryConfig>,
    ) -> Result<reqwest::Response, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed {
                upstream: upstream_name.to_string(),
            });
        }
        let attempts = retry.map(|r| r.attempts).unwrap_or(1).max(1);
        let mut last_err: Option<ClientError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                if let Some(retry) = retry {
                    tokio::time::sleep(retry.backoff_for(attempt - 1)).await;
                }
            }

            let request = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone());

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let should_retry = retry.is_some()
                        && attempt + 1 < attempts
                        && RetryConfig::is_retriable_status(status);
                    if should_retry {
                        last_err = Some(ClientError::Network {
                            upstream: upstream_name.to_string(),
                            message: format!("retriable status {status}"),
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let classified = if e.is_timeout() {
                        ClientError::Timeout {
                            upstream: upstream_name.to_string(),
                        }
                    } else {
                        ClientError::Network {
                            upstream: upstream_name.to_string(),
                            message: e.to_string(),
                        }
                    };
                    let connection_error = e.is_connect() || e.is_timeout();
                    if retry.is_some() && connection_error && attempt + 1 < attempts {
                        last_err = Some(classified);
                        continue;
                    }
                    return Err(classified);
                }
            }
        }

        Err(last_err.unwrap_or(ClientError::Network {
            upstream: upstream_name.to_string(),
            message: "exhausted retries with no recorded error".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_without_path_uses_client_path_and_query() {
        let (url, mode) = compose_url("u1", "https://api.example.com", "/p", Some("q=1")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/p?q=1");
        assert_eq!(mode, UrlCompositionMode::BasePlusPath);
    }

    #[test]
    fn base_with_path_overrides_client_path() {
        let (url, mode) = compose_url(
            "u1",
            "https://api.example.com/v1/chat/completions",
            "/anything",
            Some("ignored=1"),
        )
        .unwrap();
        assert_eq!(url.path(), "/v1/chat/completions");
        assert_eq!(mode, UrlCompositionMode::EndpointOverride);
    }

    #[test]
    fn missing_scheme_defaults_to_http() {
        let (url, _) = compose_url("u1", "api.example.com", "/p", None).unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn missing_host_is_an_error() {
        let err = compose_url("u1", "https:///no-host", "/p", None).unwrap_err();
        assert!(matches!(err, ClientError::MissingHost { .. } | ClientError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
        };
        assert_eq!(retry.backoff_for(0).as_millis(), 100);
        assert_eq!(retry.backoff_for(1).as_millis(), 200);
        assert_eq!(retry.backoff_for(2).as_millis(), 300);
        assert_eq!(retry.backoff_for(10).as_millis(), 300);
    }

    #[test]
    fn retriable_status_set_matches_spec() {
        for status in [429, 500, 502, 503, 504] {
            assert!(RetryConfig::is_retriable_status(status));
        }
        for status in [200, 400, 401, 404] {
            assert!(!RetryConfig::is_retriable_status(status));
        }
    }
}
