//! End-to-end tests for the forward pipeline: a real upstream HTTP server,
//! a real [`ForwardState`], and requests driven through [`handle_request`].

use std::net::TcpListener;
use std::sync::Arc;

use actix_web::{test, web, App, HttpResponse};
use llmproxy_core::models::forward::Forward;
use llmproxy_core::models::upstream::{BalancingStrategy, HttpClientConfig, Upstream, UpstreamGroup, UpstreamRef};
use llmproxy_core::services::admin::{configure_admin, AdminState};
use llmproxy_core::services::forward::{handle_request, ForwardState, MAX_BODY_BYTES};
use llmproxy_core::services::metrics::Metrics;

async fn echo_handler(body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("x-upstream", "echo"))
        .json(serde_json::json!({ "echoed_bytes": body.len() }))
}

async fn flaky_handler() -> HttpResponse {
    HttpResponse::InternalServerError().finish()
}

fn spawn_upstream<F>(configure: F) -> String
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = actix_web::HttpServer::new(move || App::new().configure(configure.clone()))
        .listen(listener)
        .unwrap()
        .run();
    actix_web::rt::spawn(server);
    format!("http://{addr}")
}

fn single_upstream_group(url: String, strategy: BalancingStrategy) -> (Vec<Upstream>, UpstreamGroup) {
    let upstream = Upstream {
        name: "u1".to_string(),
        url,
        auth: Default::default(),
        headers: vec![],
        breaker: None,
        rate_limit: None,
    };
    let group = UpstreamGroup {
        name: "g1".to_string(),
        upstreams: vec![UpstreamRef { name: "u1".to_string(), weight: 1 }],
        strategy,
        http_client: HttpClientConfig::default(),
    };
    (vec![upstream], group)
}

#[actix_web::test]
async fn forward_round_trips_a_get_request_to_the_upstream() {
    let base_url = spawn_upstream(|cfg: &mut web::ServiceConfig| {
        cfg.route("/echo", web::get().to(echo_handler));
    });
    let (catalog, group) = single_upstream_group(base_url, BalancingStrategy::RoundRobin);
    let forward = Forward {
        name: "f1".to_string(),
        bind: "0.0.0.0".to_string(),
        port: 0,
        default_group: "g1".to_string(),
        timeouts: Default::default(),
        ip_rate_limit: None,
    };
    let state = Arc::new(
        ForwardState::build(&forward, &group, &catalog, Metrics::noop()).expect("builds forward state"),
    );

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::route().to(handle_request)),
    )
    .await;

    let req = test::TestRequest::get().uri("/echo").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "echo");
}

#[actix_web::test]
async fn forward_surfaces_upstream_errors_as_bad_gateway_status() {
    let base_url = spawn_upstream(|cfg: &mut web::ServiceConfig| {
        cfg.route("/fail", web::get().to(flaky_handler));
    });
    let (catalog, group) = single_upstream_group(base_url, BalancingStrategy::RoundRobin);
    let forward = Forward {
        name: "f1".to_string(),
        bind: "0.0.0.0".to_string(),
        port: 0,
        default_group: "g1".to_string(),
        timeouts: Default::default(),
        ip_rate_limit: None,
    };
    let state = Arc::new(
        ForwardState::build(&forward, &group, &catalog, Metrics::noop()).expect("builds forward state"),
    );

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .default_service(web::route().to(handle_request)),
    )
    .await;

    let req = test::TestRequest::get().uri("/fail").to_request();
    let resp = test::call_service(&app, req).await;
    // the upstream's own 500 is forwarded verbatim, not translated into a gateway error
    assert_eq!(resp.status(), 500);
}

#[actix_web::test]
async fn admin_info_and_metrics_endpoints_respond() {
    let settings = llmproxy_core::models::settings::Settings {
        version: 1,
        admin: Default::default(),
        upstreams: vec![],
        upstream_groups: vec![],
        http_server: llmproxy_core::models::settings::HttpServerSettings { forwards: vec![] },
    };
    let state = AdminState::new(Metrics::new(), settings);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(configure_admin),
    )
    .await;

    let req = test::TestRequest::get().uri("/info").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn oversized_body_is_rejected_with_413_envelope() {
    let base_url = spawn_upstream(|cfg: &mut web::ServiceConfig| {
        cfg.route("/echo", web::post().to(echo_handler));
    });
    let (catalog, group) = single_upstream_group(base_url, BalancingStrategy::RoundRobin);
    let forward = Forward {
        name: "f1".to_string(),
        bind: "0.0.0.0".to_string(),
        port: 0,
        default_group: "g1".to_string(),
        timeouts: Default::default(),
        ip_rate_limit: None,
    };
    let state = Arc::new(
        ForwardState::build(&forward, &group, &catalog, Metrics::noop()).expect("builds forward state"),
    );

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .app_data(web::PayloadConfig::new(MAX_BODY_BYTES + 1))
            .default_service(web::route().to(handle_request)),
    )
    .await;

    let oversized = vec![0u8; MAX_BODY_BYTES + 1];
    let req = test::TestRequest::post()
        .uri("/echo")
        .set_payload(oversized)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 413);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("\"errorCode\":1000"));
}
