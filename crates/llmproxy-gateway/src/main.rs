//! llmproxy gateway binary.
//!
//! High-performance HTTP reverse proxy built with Rust and Actix Web.
//!
//! This binary is the main server entry point: it loads and validates the
//! configuration document, then starts one listener per configured forward
//! plus the admin listener, and waits for a shutdown signal.

use llmproxy_core::config::loader::{load_settings, resolve_config_path};
use llmproxy_core::config::validation::ConfigValidator;
use llmproxy_core::logs::logger::configure_logger;
use llmproxy_core::services::lifecycle::LifecycleManager;

use log::{error, info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config_path = resolve_config_path(std::env::args().nth(1));
    let config = match load_settings(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration from '{config_path}': {e}");
            std::process::exit(1);
        }
    };

    info!("starting llmproxy gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation_result = ConfigValidator::validate_comprehensive(&config);
    if !validation_result.is_valid {
        error!("configuration validation failed:");
        for err in &validation_result.errors {
            error!("  - {err}");
        }
        std::process::exit(1);
    }
    for warning in &validation_result.warnings {
        warn!("{warning}");
    }
    info!(
        "configuration validated successfully with {} warning(s)",
        validation_result.warnings.len()
    );

    let manager = LifecycleManager::start(config)
        .await
        .unwrap_or_else(|e| {
            error!("failed to start listeners: {e}");
            std::process::exit(1);
        });

    manager.run_until_signal().await;
    info!("llmproxy gateway stopped");

    Ok(())
}
