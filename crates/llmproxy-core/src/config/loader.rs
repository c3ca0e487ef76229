//! Loads [`Settings`] from a YAML file on disk.

use std::path::Path;

use crate::models::settings::Settings;

/// Default configuration path used when neither a CLI argument nor the
/// `LLMPROXY_CONFIG` environment variable is given.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

/// Resolves the configuration path: an explicit `cli_arg`, else the
/// `LLMPROXY_CONFIG` environment variable, else [`DEFAULT_CONFIG_PATH`].
///
/// # Examples
///
/// ```
/// use llmproxy_core::config::loader::resolve_config_path;
///
/// std::env::remove_var("LLMPROXY_CONFIG");
/// assert_eq!(resolve_config_path(Some("custom.yaml".to_string())), "custom.yaml");
/// assert_eq!(resolve_config_path(None), "./config.yaml");
/// ```
pub fn resolve_config_path(cli_arg: Option<String>) -> String {
    cli_arg
        .or_else(|| std::env::var("LLMPROXY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Reads and deserializes the settings document at `path`.
///
/// # Errors
///
/// Returns a descriptive error naming the path on read failure, and the
/// underlying YAML error on parse failure. This is a fatal, startup-only
/// condition — the caller is expected to log and exit.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, String> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read configuration file '{}': {e}", path.display()))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| format!("failed to parse configuration file '{}': {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_cli_arg_over_env() {
        std::env::set_var("LLMPROXY_CONFIG", "/from/env.yaml");
        assert_eq!(
            resolve_config_path(Some("/from/cli.yaml".to_string())),
            "/from/cli.yaml"
        );
        std::env::remove_var("LLMPROXY_CONFIG");
    }

    #[test]
    fn resolve_falls_back_to_default() {
        std::env::remove_var("LLMPROXY_CONFIG");
        assert_eq!(resolve_config_path(None), DEFAULT_CONFIG_PATH);
    }

    #[test]
    fn load_settings_reports_missing_file() {
        let err = load_settings("/nonexistent/path/to/config.yaml").unwrap_err();
        assert!(err.contains("/nonexistent/path/to/config.yaml"));
    }

    #[test]
    fn load_settings_parses_minimal_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
version: 1
upstreams:
  - name: u1
    url: http://localhost:9100
upstreamGroups:
  - name: g1
    upstreams:
      - name: u1
httpServer:
  forwards:
    - name: f1
      port: 8080
      defaultGroup: g1
"#,
        )
        .unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.upstreams.len(), 1);
    }
}
