//! Starts and stops the full set of forward listeners plus the admin
//! listener as one unit (§4.10).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::ServerHandle;
use actix_web::http::KeepAlive;
use actix_web::{web, App, HttpServer};
use log::info;

use crate::models::settings::Settings;
use crate::services::admin::{configure_admin, AdminState};
use crate::services::forward::{handle_request, ForwardState, MAX_BODY_BYTES};
use crate::services::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error binding listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns every running listener; `shutdown` is idempotent via a once-guard.
pub struct LifecycleManager {
    handles: Vec<ServerHandle>,
    forward_states: Vec<Arc<ForwardState>>,
    stopped: AtomicBool,
}

impl LifecycleManager {
    /// Builds every forward listener's state and the admin listener, then
    /// starts all of them concurrently. Returns once every listener is bound
    /// and accepting connections (the underlying `actix_web::Server` futures
    /// are spawned as background tasks, not awaited here).
    pub async fn start(settings: Settings) -> Result<Self, LifecycleError> {
        let metrics = Metrics::new();
        let mut handles = Vec::new();
        let mut forward_states = Vec::new();

        for forward in &settings.http_server.forwards {
            let group = settings
                .upstream_groups
                .iter()
                .find(|g| g.name == forward.default_group)
                .ok_or_else(|| {
                    LifecycleError::Config(format!(
                        "forward '{}' references unknown group '{}'",
                        forward.name, forward.default_group
                    ))
                })?;

            let state = ForwardState::build(forward, group, &settings.upstreams, metrics.clone())
                .map_err(|e| LifecycleError::Config(e.to_string()))?;
            let state = Arc::new(state);
            forward_states.push(state.clone());
            let bind = (forward.bind.clone(), forward.port);
            let forward_name = forward.name.clone();
            let timeouts = forward.timeouts.clone();

            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    // One byte past the limit the handler itself enforces (§4.7
                    // step 6), so an oversized body reaches `handle_request` and
                    // gets the JSON 413 envelope instead of actix's bare default
                    // (which would otherwise reject at its 256 KiB default first).
                    .app_data(web::PayloadConfig::new(MAX_BODY_BYTES + 1))
                    .default_service(web::route().to(handle_request))
            })
            .keep_alive(KeepAlive::Timeout(Duration::from_millis(timeouts.idle_ms)))
            .client_request_timeout(Duration::from_millis(timeouts.read_ms))
            .client_disconnect_timeout(Duration::from_millis(timeouts.write_ms))
            .bind(bind)?
            .run();

            info!(
                "forward '{}' listening on {}:{}",
                forward_name, forward.bind, forward.port
            );
            handles.push(server.handle());
            tokio::spawn(server);
        }

        let admin_state = AdminState::new(metrics, settings.clone());
        let admin_bind = (settings.admin.bind.clone(), settings.admin.port);
        let admin_server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(admin_state.clone()))
                .configure(configure_admin)
        })
        .bind(admin_bind)?
        .run();
        info!(
            "admin listener on {}:{}",
            settings.admin.bind, settings.admin.port
        );
        handles.push(admin_server.handle());
        tokio::spawn(admin_server);

        Ok(Self {
            handles,
            forward_states,
            stopped: AtomicBool::new(false),
        })
    }

    /// Stops every listener's accept loop, then closes every forward's
    /// outbound HTTP client, matching the shutdown order §4.10 specifies:
    /// engines stop accepting, then services stop, then clients close.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down {} listener(s)", self.handles.len());
        for handle in &self.handles {
            handle.stop(true).await;
        }
        for state in &self.forward_states {
            state.close();
        }
    }

    /// Waits for either a ctrl-c or, on unix, a SIGTERM, then shuts down.
    pub async fn run_until_signal(&self) {
        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c");
        }
        self.shutdown().await;
    }
}
