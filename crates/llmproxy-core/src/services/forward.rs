//! The forward service: one instance per listener, implementing the
//! per-request pipeline described in the module table (§4.7).

use std::sync::Arc;
use std::time::Instant;

use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use reqwest::Method as ReqwestMethod;

use crate::error::GatewayError;
use crate::models::forward::Forward;
use crate::models::upstream::{HeaderOp, RetryConfig, Upstream, UpstreamGroup};
use crate::services::auth::Authenticator;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::services::headers;
use crate::services::http_client::{compose_url, UpstreamClient};
use crate::services::load_balancer::{Candidate, LoadBalancer, LoadBalancerFactory, SelectContext};
use crate::services::metrics::Metrics;
use crate::services::rate_limiter::{client_ip_key, RateLimiter};

/// Request-body size bound (§4.7 step 6): bodies larger than this produce a
/// 413. Also used to size the listener's `PayloadConfig` so actix's own
/// extractor limit (256 KiB by default) never rejects a body this check
/// would otherwise allow.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Per-upstream runtime state: the static descriptor plus its owned,
/// independently synchronized breaker and rate limiter.
struct UpstreamRuntime {
    name: String,
    base_url: String,
    weight: u32,
    auth: Authenticator,
    header_ops: Vec<HeaderOp>,
    breaker: Option<Arc<CircuitBreaker>>,
    limiter: Option<RateLimiter>,
}

/// Everything one forward listener needs to dispatch requests.
pub struct ForwardState {
    forward_name: String,
    group_name: String,
    balancer_type: &'static str,
    upstreams: Vec<UpstreamRuntime>,
    balancer: Arc<dyn LoadBalancer>,
    client: UpstreamClient,
    ip_limiter: Option<RateLimiter>,
    retry: Option<RetryConfig>,
    metrics: Metrics,
    request_timeout: std::time::Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{0}")]
    Message(String),
}

impl ForwardState {
    /// Resolves `forward`'s default group against the full upstream catalog
    /// and materializes every collaborator: balancer, http client, breakers,
    /// and rate limiters.
    pub fn build(
        forward: &Forward,
        group: &UpstreamGroup,
        catalog: &[Upstream],
        metrics: Metrics,
    ) -> Result<Self, BuildError> {
        let mut upstreams = Vec::with_capacity(group.upstreams.len());
        for upstream_ref in &group.upstreams {
            let descriptor = catalog
                .iter()
                .find(|u| u.name == upstream_ref.name)
                .ok_or_else(|| BuildError::Message(format!("unknown upstream '{}'", upstream_ref.name)))?;
            let auth = Authenticator::new(descriptor.auth.clone())
                .map_err(|e| BuildError::Message(e.to_string()))?;
            let breaker = descriptor
                .breaker
                .clone()
                .map(|cfg| CircuitBreaker::new(descriptor.name.clone(), cfg));
            let limiter = descriptor.rate_limit.clone().map(RateLimiter::new);
            upstreams.push(UpstreamRuntime {
                name: descriptor.name.clone(),
                base_url: descriptor.url.clone(),
                weight: upstream_ref.weight,
                auth,
                header_ops: descriptor.headers.clone(),
                breaker,
                limiter,
            });
        }

        let balancer = LoadBalancerFactory::create(group.strategy);
        let balancer_type = match group.strategy {
            crate::models::upstream::BalancingStrategy::RoundRobin => "round_robin",
            crate::models::upstream::BalancingStrategy::WeightedRoundRobin => "weighted_round_robin",
            crate::models::upstream::BalancingStrategy::Random => "random",
            crate::models::upstream::BalancingStrategy::Failover => "failover",
            crate::models::upstream::BalancingStrategy::IpHash => "ip_hash",
        };
        let client = UpstreamClient::new(group.http_client.clone())
            .map_err(|e| BuildError::Message(e.to_string()))?;
        let ip_limiter = forward.ip_rate_limit.clone().map(RateLimiter::new);

        Ok(Self {
            forward_name: forward.name.clone(),
            group_name: group.name.clone(),
            balancer_type,
            upstreams,
            balancer,
            client,
            ip_limiter,
            retry: group.http_client.retry.clone(),
            metrics,
            request_timeout: std::time::Duration::from_millis(forward.timeouts.request_ms),
        })
    }

    /// Releases the group's pooled outbound connections and rejects any
    /// dispatch still in flight. Called once per listener at shutdown (§4.10).
    pub fn close(&self) {
        self.client.close();
    }

    fn find_upstream(&self, name: &str) -> Option<&UpstreamRuntime> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    fn candidates(&self) -> Vec<Candidate> {
        self.upstreams
            .iter()
            .map(|u| Candidate {
                name: u.name.clone(),
                weight: u.weight,
            })
            .collect()
    }
}

fn extract_client_ip(req: &HttpRequest) -> String {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let real_ip = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok());
    let remote = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();
    client_ip_key(forwarded_for, real_ip, &remote).to_string()
}

fn is_streaming_response(headers: &reqwest::header::HeaderMap) -> bool {
    if let Some(ct) = headers.get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        if ct.contains("text/event-stream") || ct.contains("application/stream+json") {
            return true;
        }
    }
    headers
        .get(reqwest::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("chunked"))
        .unwrap_or(false)
}

/// Runs the full per-request pipeline described in §4.7, steps 1-10.
pub async fn handle_request(
    state: web::Data<Arc<ForwardState>>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let start = Instant::now();
    let state = state.get_ref().clone();

    if body.len() > MAX_BODY_BYTES {
        return Err(GatewayError::BodyTooLarge {
            limit_bytes: MAX_BODY_BYTES,
        });
    }

    let client_ip = extract_client_ip(&req);

    // Step 1: IP rate-limit admission.
    if let Some(limiter) = &state.ip_limiter {
        if !limiter.admit(&client_ip) {
            state.metrics.record_rate_limit_rejection(&state.forward_name, "ip");
            return Err(GatewayError::IpRateLimited);
        }
    }

    state.metrics.inc_active_connections(&state.forward_name);
    let result = match tokio::time::timeout(state.request_timeout, dispatch(&state, &req, &body, &client_ip)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            upstream: state.group_name.clone(),
        }),
    };
    state.metrics.dec_active_connections(&state.forward_name);

    let method = req.method().to_string();
    let path = req.path().to_string();
    let duration = start.elapsed().as_secs_f64();

    match &result {
        Ok((response, response_bytes)) => {
            state.metrics.record_http_request(
                &state.forward_name,
                &method,
                &path,
                response.status().as_u16(),
                duration,
                body.len(),
                *response_bytes,
            );
        }
        Err(err) => {
            state.metrics.record_http_request(
                &state.forward_name,
                &method,
                &path,
                err.status().as_u16(),
                duration,
                body.len(),
                0,
            );
        }
    }

    result.map(|(response, _)| response)
}

async fn dispatch(
    state: &Arc<ForwardState>,
    req: &HttpRequest,
    body: &web::Bytes,
    client_ip: &str,
) -> Result<(HttpResponse, usize), GatewayError> {
    // Step 3: upstream selection.
    let ctx = SelectContext {
        client_ip: Some(client_ip.to_string()),
    };
    let candidates = state.candidates();
    let selected_name = state
        .balancer
        .select(&candidates, &ctx)
        .map_err(|_| GatewayError::NoAvailableUpstream {
            group: state.group_name.clone(),
        })?;
    state
        .metrics
        .record_selection(&state.group_name, &selected_name, state.balancer_type);

    let upstream = state
        .find_upstream(&selected_name)
        .ok_or_else(|| GatewayError::NoAvailableUpstream {
            group: state.group_name.clone(),
        })?;

    // Step 4: per-upstream rate-limit admission.
    if let Some(limiter) = &upstream.limiter {
        if !limiter.admit(&upstream.name) {
            state
                .metrics
                .record_rate_limit_rejection(&state.forward_name, "upstream");
            return Err(GatewayError::UpstreamRateLimited {
                upstream: upstream.name.clone(),
            });
        }
    }

    // Step 5: breaker admission.
    let permit = match &upstream.breaker {
        Some(breaker) => match breaker.admit() {
            Ok(permit) => Some(permit),
            Err(_) => {
                state
                    .metrics
                    .record_breaker_result(&state.group_name, &upstream.name, "rejected");
                state.balancer.update_health(&upstream.name, false);
                state
                    .metrics
                    .set_upstream_health(&state.group_name, &upstream.name, false);
                return Err(GatewayError::CircuitOpen {
                    upstream: upstream.name.clone(),
                });
            }
        },
        None => None,
    };

    // Step 6: outbound request construction.
    let (url, _mode) = match compose_url(&upstream.name, &upstream.base_url, req.path(), req.uri().query()) {
        Ok(ok) => ok,
        Err(e) => {
            if let Some(permit) = permit {
                settle_breaker(state, upstream, permit, false);
            }
            return Err(GatewayError::BuildRequest {
                upstream: upstream.name.clone(),
                message: e.to_string(),
            });
        }
    };

    let mut inbound_headers = reqwest::header::HeaderMap::new();
    for (name, value) in req.headers() {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            inbound_headers.insert(name, value);
        }
    }

    let original_host = req
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut headers = match state.client.build_headers(
        inbound_headers,
        &upstream.auth,
        &upstream.header_ops,
        &upstream.name,
        original_host.as_deref(),
    ) {
        Ok(headers) => headers,
        Err(e) => {
            if let Some(permit) = permit {
                settle_breaker(state, upstream, permit, false);
            }
            return Err(GatewayError::BuildRequest {
                upstream: upstream.name.clone(),
                message: e.to_string(),
            });
        }
    };

    headers.append(
        "x-forwarded-for",
        reqwest::header::HeaderValue::from_str(client_ip).unwrap_or(reqwest::header::HeaderValue::from_static("unknown")),
    );
    let scheme = if req.connection_info().scheme() == "https" { "https" } else { "http" };
    headers.insert(
        "x-forwarded-proto",
        reqwest::header::HeaderValue::from_static(scheme),
    );

    let method = convert_method(req.method());

    // Step 7: dispatch.
    let dispatch_start = Instant::now();
    let outcome = state
        .client
        .execute(&upstream.name, method.clone(), url, headers, body.to_vec(), state.retry.as_ref())
        .await;
    let latency_ms = dispatch_start.elapsed().as_millis() as u64;

    // Step 8: latency signal.
    state.balancer.update_latency(&upstream.name, latency_ms);

    let response = match outcome {
        Ok(response) => {
            let success = response.status().as_u16() < 500;
            if let Some(permit) = permit {
                settle_breaker(state, upstream, permit, success);
            }
            state.metrics.record_upstream_request(
                &state.group_name,
                &upstream.name,
                method.as_str(),
                response.status().as_u16(),
                dispatch_start.elapsed().as_secs_f64(),
            );
            response
        }
        Err(e) => {
            if let Some(permit) = permit {
                settle_breaker(state, upstream, permit, false);
            }
            let is_timeout = matches!(e, crate::services::http_client::ClientError::Timeout { .. });
            state.metrics.record_upstream_error(
                &state.group_name,
                &upstream.name,
                if is_timeout { "timeout" } else { "network" },
            );
            return Err(if is_timeout {
                GatewayError::Timeout {
                    upstream: upstream.name.clone(),
                }
            } else {
                GatewayError::Network {
                    upstream: upstream.name.clone(),
                    message: e.to_string(),
                }
            });
        }
    };

    // Step 9: response forwarding.
    build_response(response).await
}

/// Settles a breaker permit and propagates the resulting state to both the
/// balancer's health flag (so [`crate::services::load_balancer::FailoverBalancer`]
/// can route around it) and the health/state gauges.
fn settle_breaker(state: &Arc<ForwardState>, upstream: &UpstreamRuntime, permit: crate::services::circuit_breaker::Permit, success: bool) {
    let breaker = upstream.breaker.as_ref().expect("settle_breaker called without a breaker");
    let before = breaker.state();
    breaker.settle(permit, success);
    let after = breaker.state();

    state
        .metrics
        .record_breaker_result(&state.group_name, &upstream.name, if success { "success" } else { "failure" });
    state
        .metrics
        .set_breaker_state(&state.group_name, &upstream.name, after as i64);

    if before != after {
        state.metrics.record_breaker_transition(
            &state.group_name,
            &upstream.name,
            &format!("{before:?}"),
            &format!("{after:?}"),
        );
    }

    let healthy = after != CircuitState::Open;
    state.balancer.update_health(&upstream.name, healthy);
    state.metrics.set_upstream_health(&state.group_name, &upstream.name, healthy);
}

fn convert_method(method: &actix_web::http::Method) -> ReqwestMethod {
    ReqwestMethod::from_bytes(method.as_str().as_bytes()).unwrap_or(ReqwestMethod::GET)
}

async fn build_response(response: reqwest::Response) -> Result<(HttpResponse, usize), GatewayError> {
    let status = actix_web::http::StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY);
    let streaming = is_streaming_response(response.headers());
    let content_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers() {
        if name == reqwest::header::CONNECTION {
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            builder.insert_header((name.as_str(), value_str));
        }
    }

    if streaming {
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| actix_web::error::ErrorBadGateway(e.to_string())));
        Ok((builder.streaming(stream), content_length))
    } else {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Network {
                upstream: "<response body>".to_string(),
                message: e.to_string(),
            })?;
        let len = bytes.len();
        Ok((builder.body(bytes), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_detected_for_event_stream() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
        assert!(is_streaming_response(&headers));
    }

    #[test]
    fn streaming_detected_for_chunked_transfer_encoding() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert!(is_streaming_response(&headers));
    }

    #[test]
    fn non_streaming_plain_json() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(!is_streaming_response(&headers));
    }

    #[test]
    fn convert_method_falls_back_to_get_for_unknown() {
        let method = actix_web::http::Method::from_bytes(b"GET").unwrap();
        assert_eq!(convert_method(&method), ReqwestMethod::GET);
    }
}
