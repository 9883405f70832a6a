//! Integration tests using WireMock
//!
//! Run the engine end to end over real HTTP against mock authorization and
//! resource servers.

use std::time::Duration;

use ace_token_engine::{
    engine_config, DefaultTokenEngine, EngineError, EngineReport, Fingerprint, RetryConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTERVAL: Duration = Duration::from_millis(50);

/// Mount a token endpoint that issues `tokens` in order and then refuses.
async fn mount_token_endpoint(server: &MockServer, tokens: &[serde_json::Value]) {
    for (i, token) in tokens.iter().enumerate() {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token.clone()))
            .up_to_n_times(1)
            .with_priority(1 + i as u8)
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_request"})))
        .with_priority(10)
        .mount(server)
        .await;
}

async fn mount_authz_info(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/authz-info"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, http_method: &str, url_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == http_method && r.url.path() == url_path)
        .count()
}

async fn run_engine(
    authorization: &MockServer,
    resource: &MockServer,
    denial_budget: u32,
) -> EngineReport {
    let config = engine_config()
        .as_uri(authorization.uri())
        .resource_server(resource.uri(), "rs1", "r_temp")
        .denial_budget(denial_budget)
        .request_interval(INTERVAL)
        .reachability(RetryConfig::disabled())
        .timeout(Duration::from_secs(5))
        .build()
        .expect("valid config");

    let engine = DefaultTokenEngine::new(config).expect("engine");
    tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .expect("engine finished")
        .expect("engine ran")
}

#[tokio::test]
async fn test_denials_exhaust_budget_then_issuance_refused() {
    let authorization = MockServer::start().await;
    let resource = MockServer::start().await;

    mount_token_endpoint(&authorization, &[json!({"access_token": "token-1"})]).await;
    mount_authz_info(&resource).await;
    Mock::given(method("GET"))
        .and(path("/temp"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&resource)
        .await;

    let report = run_engine(&authorization, &resource, 2).await;

    assert_eq!(report.loops.len(), 1);
    assert!(matches!(
        report.loops[0].error,
        Some(EngineError::IssuanceDenied { .. })
    ));
    assert_eq!(report.loops[0].renewals, 0);
    assert!(report.revocation.is_none());
    assert_eq!(requests_to(&authorization, "POST", "/token").await, 2);
    assert_eq!(requests_to(&resource, "GET", "/temp").await, 2);
    assert_eq!(requests_to(&resource, "PUT", "/authz-info").await, 1);
}

#[tokio::test]
async fn test_denied_token_is_renewed_and_reinstalled() {
    let authorization = MockServer::start().await;
    let resource = MockServer::start().await;

    mount_token_endpoint(
        &authorization,
        &[
            json!({"access_token": "token-1", "expires_in": 60}),
            json!({"access_token": "token-2", "expires_in": 60}),
        ],
    )
    .await;
    mount_authz_info(&resource).await;
    Mock::given(method("GET"))
        .and(path("/temp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&resource)
        .await;

    let report = run_engine(&authorization, &resource, 1).await;

    assert_eq!(report.loops[0].renewals, 1);
    assert_eq!(report.total_renewals(), 1);
    assert!(report.all_failed());
    assert_eq!(requests_to(&authorization, "POST", "/token").await, 3);
    assert_eq!(requests_to(&resource, "PUT", "/authz-info").await, 2);
}

#[tokio::test]
async fn test_confirmed_token_is_posted_whole() {
    let authorization = MockServer::start().await;
    let resource = MockServer::start().await;

    let issued = json!({
        "access_token": "token-pop",
        "cnf": {"osc": {"id": "AQ"}},
        "exi": 30
    });
    mount_token_endpoint(&authorization, &[issued]).await;
    Mock::given(method("POST"))
        .and(path("/authz-info"))
        .and(body_partial_json(json!({"access_token": "token-pop", "cnf": {"osc": {"id": "AQ"}}})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&resource)
        .await;
    Mock::given(method("GET"))
        .and(path("/temp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&resource)
        .await;

    let report = run_engine(&authorization, &resource, 1).await;

    assert!(matches!(
        report.loops[0].error,
        Some(EngineError::IssuanceDenied { .. })
    ));
    assert_eq!(requests_to(&resource, "PUT", "/authz-info").await, 0);
}

#[tokio::test]
async fn test_failed_install_stops_loop() {
    let authorization = MockServer::start().await;
    let resource = MockServer::start().await;

    mount_token_endpoint(&authorization, &[json!({"access_token": "token-1"})]).await;
    Mock::given(method("PUT"))
        .and(path("/authz-info"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&resource)
        .await;

    let report = run_engine(&authorization, &resource, 3).await;

    assert!(matches!(
        report.loops[0].error,
        Some(EngineError::PostFailed { .. })
    ));
    assert_eq!(requests_to(&resource, "GET", "/temp").await, 0);
}

#[tokio::test]
async fn test_polled_revocation_purges_active_token() {
    let authorization = MockServer::start().await;
    let resource = MockServer::start().await;

    mount_token_endpoint(&authorization, &[json!({"access_token": "token-1"})]).await;
    let revoked = Fingerprint::of(b"token-1");
    Mock::given(method("GET"))
        .and(path("/trl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"full_set": [revoked.as_str()]})))
        .mount(&authorization)
        .await;
    mount_authz_info(&resource).await;
    Mock::given(method("GET"))
        .and(path("/temp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("21.5"))
        .mount(&resource)
        .await;

    let config = engine_config()
        .as_uri(authorization.uri())
        .resource_server(resource.uri(), "rs1", "r_temp")
        .request_interval(INTERVAL)
        .polling(Duration::from_millis(200))
        .reachability(RetryConfig::disabled())
        .build()
        .expect("valid config");

    let engine = DefaultTokenEngine::new(config).expect("engine");
    let store = engine.store();
    let report = tokio::time::timeout(Duration::from_secs(10), engine.run())
        .await
        .expect("engine finished")
        .expect("engine ran");

    assert!(matches!(
        report.loops[0].error,
        Some(EngineError::IssuanceDenied { .. })
    ));
    let summary = report.revocation.expect("revocation ran");
    assert_eq!(summary.purged, 1);
    assert!(summary.updates >= 1);
    assert!(store.is_retired(&revoked));
    assert!(requests_to(&resource, "GET", "/temp").await >= 1);
}
