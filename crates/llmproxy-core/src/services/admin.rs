//! Admin HTTP service: `/metrics` plus read-only JSON introspection (§4.9).

use std::sync::{Arc, RwLock};
use std::time::Instant;

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde_json::json;
use sysinfo::System;

use crate::models::settings::Settings;
use crate::services::metrics::Metrics;

/// Shared admin-service state, registered as `app_data` on the admin listener.
pub struct AdminState {
    pub metrics: Metrics,
    pub settings: Settings,
    pub started_at: Instant,
    pub started_at_wall_clock: DateTime<Utc>,
    pub system: RwLock<System>,
}

impl AdminState {
    pub fn new(metrics: Metrics, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            metrics,
            settings,
            started_at: Instant::now(),
            started_at_wall_clock: Utc::now(),
            system: RwLock::new(System::new_all()),
        })
    }
}

/// `GET /metrics` — Prometheus text format, negotiated via `Accept`.
pub async fn metrics_endpoint(state: web::Data<Arc<AdminState>>, req: HttpRequest) -> HttpResponse {
    let accepts_openmetrics = req
        .headers()
        .get(actix_web::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/openmetrics-text"))
        .unwrap_or(false);

    let content_type = if accepts_openmetrics {
        "application/openmetrics-text; version=1.0.0; charset=utf-8"
    } else {
        "text/plain; version=0.0.4; charset=utf-8"
    };

    HttpResponse::Ok()
        .content_type(content_type)
        .body(state.metrics.render())
}

/// `GET /info` — service identity and uptime.
pub async fn info_endpoint(state: web::Data<Arc<AdminState>>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "errorCode": 0,
        "data": {
            "name": "llmproxy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": state.started_at.elapsed().as_secs(),
            "startTime": state.started_at_wall_clock.to_rfc3339(),
        }
    }))
}

/// `GET /runtime` — worker-thread/active-task count (the Rust analogue of the
/// original's goroutine count) and process memory via the host OS.
pub async fn runtime_endpoint(state: web::Data<Arc<AdminState>>) -> HttpResponse {
    let mut system = state.system.write().expect("sysinfo lock poisoned");
    system.refresh_memory();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sysinfo::get_current_pid().unwrap_or(sysinfo::Pid::from(0))]), true);

    let pid = sysinfo::get_current_pid().ok();
    let process_memory_bytes = pid
        .and_then(|pid| system.process(pid))
        .map(|p| p.memory())
        .unwrap_or(0);

    HttpResponse::Ok().json(json!({
        "errorCode": 0,
        "data": {
            "activeTasks": tokio::runtime::Handle::try_current().is_ok(),
            "workerThreads": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            "processMemoryBytes": process_memory_bytes,
            "totalMemoryBytes": system.total_memory(),
            "usedMemoryBytes": system.used_memory(),
        }
    }))
}

/// `GET /config` — sanitized configuration (tokens and passwords redacted).
pub async fn config_endpoint(state: web::Data<Arc<AdminState>>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "errorCode": 0,
        "data": sanitize_settings(&state.settings),
    }))
}

fn sanitize_settings(settings: &Settings) -> serde_json::Value {
    let mut value = serde_json::to_value(settings).unwrap_or(serde_json::Value::Null);
    redact_in_place(&mut value);
    value
}

fn redact_in_place(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if matches!(key.as_str(), "token" | "password" | "apiKey" | "api_key") {
                    *v = serde_json::Value::String("***".to_string());
                } else {
                    redact_in_place(v);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_in_place(item);
            }
        }
        _ => {}
    }
}

pub fn configure_admin(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_endpoint))
        .route("/info", web::get().to(info_endpoint))
        .route("/runtime", web::get().to(runtime_endpoint))
        .route("/config", web::get().to(config_endpoint));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_token_and_password_fields() {
        let mut value = json!({
            "upstreams": [
                {"name": "u1", "auth": {"type": "bearer", "token": "sk-secret"}},
                {"name": "u2", "auth": {"type": "basic", "username": "bob", "password": "hunter2"}}
            ]
        });
        redact_in_place(&mut value);
        assert_eq!(value["upstreams"][0]["auth"]["token"], "***");
        assert_eq!(value["upstreams"][1]["auth"]["password"], "***");
        assert_eq!(value["upstreams"][1]["auth"]["username"], "bob");
    }
}
