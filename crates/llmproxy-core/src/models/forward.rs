use serde::{Deserialize, Serialize};

use crate::models::upstream::RateLimitConfig;

/// A listener specification: one bind address/port pair forwarding to a
/// default upstream group.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Forward {
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: u16,
    pub default_group: String,
    #[serde(default)]
    pub timeouts: ForwardTimeouts,
    #[serde(default)]
    pub ip_rate_limit: Option<RateLimitConfig>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Forward {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("forward name must not be empty".to_string());
        }
        if self.port == 0 {
            return Err(format!("forward '{}' has an invalid port 0", self.name));
        }
        if self.default_group.trim().is_empty() {
            return Err(format!(
                "forward '{}' must name a default_group",
                self.name
            ));
        }
        if let Some(rl) = &self.ip_rate_limit {
            rl.validate()
                .map_err(|e| format!("forward '{}' ip_rate_limit: {e}", self.name))?;
        }
        Ok(())
    }
}

/// Timeouts applied to a forward listener's own connections, independent of
/// the per-group outbound [`crate::models::upstream::HttpClientConfig`].
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ForwardTimeouts {
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_request_ms")]
    pub request_ms: u64,
}

fn default_idle_ms() -> u64 {
    60_000
}
fn default_read_ms() -> u64 {
    30_000
}
fn default_write_ms() -> u64 {
    30_000
}
fn default_connect_ms() -> u64 {
    10_000
}
fn default_request_ms() -> u64 {
    300_000
}

impl Default for ForwardTimeouts {
    fn default() -> Self {
        Self {
            idle_ms: default_idle_ms(),
            read_ms: default_read_ms(),
            write_ms: default_write_ms(),
            connect_ms: default_connect_ms(),
            request_ms: default_request_ms(),
        }
    }
}
