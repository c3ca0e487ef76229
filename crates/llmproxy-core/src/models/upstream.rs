use serde::{Deserialize, Serialize};

/// One backend endpoint a request may be routed to.
///
/// # Examples
///
/// ```
/// use llmproxy_core::models::upstream::{Upstream, AuthDescriptor};
///
/// let up = Upstream {
///     name: "openai-primary".to_string(),
///     url: "https://api.openai.com/v1".to_string(),
///     auth: AuthDescriptor::Bearer { token: "sk-xxx".to_string() },
///     headers: vec![],
///     breaker: None,
///     rate_limit: None,
/// };
/// assert!(up.validate().is_ok());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth: AuthDescriptor,
    #[serde(default)]
    pub headers: Vec<HeaderOp>,
    #[serde(default)]
    pub breaker: Option<BreakerConfig>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Upstream {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("upstream name must not be empty".to_string());
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| format!("upstream '{}' has an invalid url: {e}", self.name))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!(
                "upstream '{}' must use http or https, got '{}'",
                self.name,
                parsed.scheme()
            ));
        }
        if parsed.host_str().is_none() {
            return Err(format!("upstream '{}' url is missing a host", self.name));
        }
        self.auth.validate().map_err(|e| format!("upstream '{}': {e}", self.name))?;
        for (idx, op) in self.headers.iter().enumerate() {
            op.validate()
                .map_err(|e| format!("upstream '{}' header op #{idx}: {e}", self.name))?;
        }
        if let Some(rl) = &self.rate_limit {
            rl.validate()
                .map_err(|e| format!("upstream '{}' rate_limit: {e}", self.name))?;
        }
        Ok(())
    }
}

/// Tagged authentication scheme applied to outbound requests.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthDescriptor {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

impl AuthDescriptor {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AuthDescriptor::None => Ok(()),
            AuthDescriptor::Bearer { token } => {
                if token.trim().is_empty() {
                    Err("bearer auth requires a non-empty token".to_string())
                } else {
                    Ok(())
                }
            }
            AuthDescriptor::Basic { username, password } => {
                if username.trim().is_empty() || password.trim().is_empty() {
                    Err("basic auth requires non-empty username and password".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A single header mutation applied to an outbound request.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HeaderOp {
    pub op: HeaderOpKind,
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeaderOpKind {
    Insert,
    Replace,
    Remove,
}

impl HeaderOp {
    pub fn validate(&self) -> Result<(), String> {
        if self.key.trim().is_empty() {
            return Err("header operation key must not be empty".to_string());
        }
        match self.op {
            HeaderOpKind::Insert | HeaderOpKind::Replace => {
                if self.value.is_none() {
                    return Err(format!(
                        "header operation '{:?}' on '{}' requires a value",
                        self.op, self.key
                    ));
                }
            }
            HeaderOpKind::Remove => {}
        }
        Ok(())
    }
}

/// Failure-ratio circuit breaker tuning for one upstream.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default_min_requests")]
    pub min_requests: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_half_open_max_requests")]
    pub half_open_max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_failure_threshold() -> f64 {
    0.5
}
fn default_min_requests() -> u64 {
    10
}
fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_half_open_max_requests() -> u32 {
    3
}
fn default_window_ms() -> u64 {
    10_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            min_requests: default_min_requests(),
            cooldown_ms: default_cooldown_ms(),
            half_open_max_requests: default_half_open_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.failure_threshold > 0.01 && self.failure_threshold <= 1.0) {
            return Err("breaker failure_threshold must be within (0.01, 1.0]".to_string());
        }
        if self.min_requests == 0 {
            return Err("breaker min_requests must be positive".to_string());
        }
        if self.half_open_max_requests == 0 {
            return Err("breaker half_open_max_requests must be positive".to_string());
        }
        Ok(())
    }
}

/// Token-bucket tuning: sustained rate and burst capacity.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> f64 {
    100.0
}
fn default_burst() -> u32 {
    1
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_second <= 0.0 {
            return Err("requests_per_second must be positive".to_string());
        }
        if self.burst == 0 {
            return Err("burst must be positive".to_string());
        }
        Ok(())
    }
}

/// A weighted pointer from a group to an upstream by name.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpstreamRef {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// The selection strategy used by an [`UpstreamGroup`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Random,
    Failover,
    IpHash,
}

/// Outbound HTTP client tuning shared by every upstream in a group.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct HttpClientConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    #[serde(default = "default_idle_total")]
    pub idle_total: usize,
    #[serde(default = "default_idle_per_host")]
    pub idle_per_host: usize,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub forward_proxy: Option<String>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}
fn default_keep_alive_ms() -> u64 {
    60_000
}
fn default_idle_total() -> usize {
    100
}
fn default_idle_per_host() -> usize {
    10
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            keep_alive_ms: default_keep_alive_ms(),
            idle_total: default_idle_total(),
            idle_per_host: default_idle_per_host(),
            retry: None,
            forward_proxy: None,
        }
    }
}

/// Retry policy for outbound calls: attempts and exponential backoff.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Status codes worth retrying: 429 and the 5xx family the spec names.
    pub fn is_retriable_status(status: u16) -> bool {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }

    /// Exponential backoff for a zero-based attempt index, capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let scaled = self.initial_backoff_ms.saturating_mul(1u64 << attempt.min(20));
        std::time::Duration::from_millis(scaled.min(self.max_backoff_ms))
    }
}

/// An ordered, weighted collection of upstreams sharing a balancing strategy
/// and an HTTP-client configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpstreamGroup {
    pub name: String,
    pub upstreams: Vec<UpstreamRef>,
    #[serde(default)]
    pub strategy: BalancingStrategy,
    #[serde(default)]
    pub http_client: HttpClientConfig,
}

impl UpstreamGroup {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("upstream group name must not be empty".to_string());
        }
        if self.upstreams.is_empty() {
            return Err(format!("upstream group '{}' has no upstreams", self.name));
        }
        let mut seen = std::collections::HashSet::new();
        for up_ref in &self.upstreams {
            if up_ref.weight == 0 {
                return Err(format!(
                    "upstream group '{}' references '{}' with zero weight",
                    self.name, up_ref.name
                ));
            }
            if !seen.insert(up_ref.name.as_str()) {
                return Err(format!(
                    "upstream group '{}' references '{}' more than once",
                    self.name, up_ref.name
                ));
            }
        }
        Ok(())
    }
}
