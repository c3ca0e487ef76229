use serde::{Deserialize, Serialize};

use crate::models::forward::Forward;
use crate::models::upstream::{Upstream, UpstreamGroup};

/// Admin listener bind configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AdminSettings {
    #[serde(default = "default_admin_bind")]
    pub bind: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

fn default_admin_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_admin_port() -> u16 {
    9000
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bind: default_admin_bind(),
            port: default_admin_port(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct HttpServerSettings {
    pub forwards: Vec<Forward>,
}

/// The root configuration document for the proxy.
///
/// # Configuration file format
///
/// ```yaml
/// version: 1
/// admin:
///   bind: 0.0.0.0
///   port: 9000
/// upstreams:
///   - name: openai-primary
///     url: https://api.openai.com/v1
///     auth:
///       type: bearer
///       token: sk-xxx
/// upstreamGroups:
///   - name: chat-completions
///     strategy: round_robin
///     upstreams:
///       - name: openai-primary
///         weight: 1
/// httpServer:
///   forwards:
///     - name: public
///       port: 8080
///       defaultGroup: chat-completions
/// ```
///
/// # Examples
///
/// ```
/// use llmproxy_core::models::settings::Settings;
///
/// let yaml = r#"
/// version: 1
/// upstreams:
///   - name: u1
///     url: http://localhost:9100
/// upstreamGroups:
///   - name: g1
///     upstreams:
///       - name: u1
/// httpServer:
///   forwards:
///     - name: f1
///       port: 8080
///       defaultGroup: g1
/// "#;
/// let settings: Settings = serde_yaml::from_str(yaml).unwrap();
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Settings {
    pub version: u8,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
    #[serde(default)]
    pub upstream_groups: Vec<UpstreamGroup>,
    pub http_server: HttpServerSettings,
}

impl Settings {
    /// Validates every object's own fields. Does not check cross-references;
    /// see [`crate::config::validation::ConfigValidator`] for the full graph walk.
    pub fn validate(&self) -> Result<(), String> {
        if self.version != 1 {
            return Err(format!(
                "unsupported configuration version {} (expected 1)",
                self.version
            ));
        }
        for up in &self.upstreams {
            up.validate()?;
        }
        for group in &self.upstream_groups {
            group.validate()?;
        }
        for fwd in &self.http_server.forwards {
            fwd.validate()?;
        }
        Ok(())
    }
}
