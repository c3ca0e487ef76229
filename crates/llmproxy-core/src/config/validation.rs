//! Whole-graph configuration validation with detailed error reporting.
//!
//! Individual objects validate their own fields via their `validate()`
//! methods; this module additionally walks the `forward -> group -> upstream`
//! references and reports every broken link, duplicate name, or orphaned
//! definition it finds in one pass.

use std::collections::HashSet;

use log::{info, warn};

use crate::models::settings::Settings;

/// Errors, warnings, and recommendations accumulated over a full validation pass.
///
/// # Examples
///
/// ```
/// use llmproxy_core::config::validation::ValidationResult;
///
/// let mut result = ValidationResult::new();
/// result.add_error("missing required field".to_string());
/// result.add_warning("upstream group has a single member".to_string());
///
/// assert!(!result.is_valid);
/// assert_eq!(result.errors.len(), 1);
/// assert_eq!(result.warnings.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn add_recommendation(&mut self, recommendation: String) {
        self.recommendations.push(recommendation);
    }

    fn merge_struct_error(&mut self, result: Result<(), String>) {
        if let Err(e) = result {
            self.add_error(e);
        }
    }
}

/// Validates a [`Settings`] document end to end: per-object field checks plus
/// the cross-object graph walk (`forward.default_group` resolves, every
/// `group.upstreams[].name` resolves, no duplicate names within a collection).
pub struct ConfigValidator;

impl ConfigValidator {
    /// Runs every check and returns the accumulated result; never stops early.
    pub fn validate_comprehensive(settings: &Settings) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.merge_struct_error(settings.validate());

        Self::check_duplicate_names(settings, &mut result);
        Self::check_group_upstream_refs(settings, &mut result);
        Self::check_forward_group_refs(settings, &mut result);
        Self::check_recommendations(settings, &mut result);

        if result.is_valid {
            info!("configuration validated: {} upstream(s), {} group(s), {} forward(s)",
                settings.upstreams.len(), settings.upstream_groups.len(), settings.http_server.forwards.len());
        } else {
            warn!("configuration validation failed with {} error(s)", result.errors.len());
        }

        result
    }

    fn check_duplicate_names(settings: &Settings, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for up in &settings.upstreams {
            if !seen.insert(up.name.as_str()) {
                result.add_error(format!("duplicate upstream name '{}'", up.name));
            }
        }
        let mut seen = HashSet::new();
        for group in &settings.upstream_groups {
            if !seen.insert(group.name.as_str()) {
                result.add_error(format!("duplicate upstream group name '{}'", group.name));
            }
        }
        let mut seen = HashSet::new();
        for fwd in &settings.http_server.forwards {
            if !seen.insert(fwd.name.as_str()) {
                result.add_error(format!("duplicate forward name '{}'", fwd.name));
            }
        }
        let mut ports = HashSet::new();
        for fwd in &settings.http_server.forwards {
            if !ports.insert(fwd.port) {
                result.add_error(format!("forward '{}' reuses port {} already bound by another forward", fwd.name, fwd.port));
            }
        }
    }

    fn check_group_upstream_refs(settings: &Settings, result: &mut ValidationResult) {
        let known: HashSet<&str> = settings.upstreams.iter().map(|u| u.name.as_str()).collect();
        for group in &settings.upstream_groups {
            for up_ref in &group.upstreams {
                if !known.contains(up_ref.name.as_str()) {
                    result.add_error(format!(
                        "upstream group '{}' references unknown upstream '{}'",
                        group.name, up_ref.name
                    ));
                }
            }
            if group.upstreams.len() == 1 {
                result.add_warning(format!(
                    "upstream group '{}' has only one upstream; load balancing has no effect",
                    group.name
                ));
            }
        }
    }

    fn check_forward_group_refs(settings: &Settings, result: &mut ValidationResult) {
        let known: HashSet<&str> = settings
            .upstream_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        for fwd in &settings.http_server.forwards {
            if !known.contains(fwd.default_group.as_str()) {
                result.add_error(format!(
                    "forward '{}' references unknown default_group '{}'",
                    fwd.name, fwd.default_group
                ));
            }
        }
    }

    fn check_recommendations(settings: &Settings, result: &mut ValidationResult) {
        for up in &settings.upstreams {
            if up.breaker.is_none() {
                result.add_recommendation(format!(
                    "upstream '{}' has no breaker configuration; failures will never be isolated",
                    up.name
                ));
            }
            if up.url.starts_with("http://") {
                result.add_warning(format!("upstream '{}' uses plaintext http", up.name));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forward::Forward;
    use crate::models::settings::{AdminSettings, HttpServerSettings};
    use crate::models::upstream::{Upstream, UpstreamGroup, UpstreamRef};

    fn base_settings() -> Settings {
        Settings {
            version: 1,
            admin: AdminSettings::default(),
            upstreams: vec![Upstream {
                name: "u1".to_string(),
                url: "http://localhost:9100".to_string(),
                auth: Default::default(),
                headers: vec![],
                breaker: None,
                rate_limit: None,
            }],
            upstream_groups: vec![UpstreamGroup {
                name: "g1".to_string(),
                upstreams: vec![UpstreamRef {
                    name: "u1".to_string(),
                    weight: 1,
                }],
                strategy: Default::default(),
                http_client: Default::default(),
            }],
            http_server: HttpServerSettings {
                forwards: vec![Forward {
                    name: "f1".to_string(),
                    bind: "0.0.0.0".to_string(),
                    port: 8080,
                    default_group: "g1".to_string(),
                    timeouts: Default::default(),
                    ip_rate_limit: None,
                }],
            },
        }
    }

    #[test]
    fn valid_configuration_passes() {
        let result = ConfigValidator::validate_comprehensive(&base_settings());
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn forward_referencing_missing_group_fails() {
        let mut settings = base_settings();
        settings.http_server.forwards[0].default_group = "missing".to_string();
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("f1") && e.contains("missing")));
    }

    #[test]
    fn group_referencing_missing_upstream_fails() {
        let mut settings = base_settings();
        settings.upstream_groups[0].upstreams[0].name = "ghost".to_string();
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn duplicate_upstream_names_fail() {
        let mut settings = base_settings();
        let dup = settings.upstreams[0].clone();
        settings.upstreams.push(dup);
        let result = ConfigValidator::validate_comprehensive(&settings);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("duplicate upstream")));
    }
}
