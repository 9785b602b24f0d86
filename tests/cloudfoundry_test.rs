//! Discovery client against a mocked platform API.

use fleetwatch_lib::core::config::PlatformConfig;
use fleetwatch_lib::core::WorkloadKind;
use fleetwatch_lib::platform::{CloudFoundryClient, PlatformClient};
use serde_json::json;
use wiremock::matchers::{basic_auth, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn app(guid: &str, name: &str, instances: u32, state: &str) -> serde_json::Value {
    json!({
        "metadata": { "guid": guid },
        "entity": {
            "name": name,
            "instances": instances,
            "state": state,
            "space": {
                "entity": {
                    "name": "dev",
                    "organization": { "entity": { "name": "acme" } }
                }
            }
        }
    })
}

async fn platform(server: &MockServer) -> CloudFoundryClient {
    Mock::given(method("GET"))
        .and(path("/v2/info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token_endpoint": server.uri() })),
        )
        .mount(server)
        .await;

    let config = PlatformConfig {
        api_endpoint: server.uri(),
        username: "admin".to_string(),
        password: "secret".to_string(),
        client_id: "cf".to_string(),
        client_secret: String::new(),
        ..PlatformConfig::default()
    };
    CloudFoundryClient::new(&config).unwrap()
}

#[tokio::test]
async fn test_password_grant_returns_bearer_token() {
    let server = MockServer::start().await;
    let client = platform(&server).await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(basic_auth("cf", ""))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=admin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc123",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.authenticate().await.unwrap(), "bearer abc123");
}

#[tokio::test]
async fn test_client_credentials_grant_without_username() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "token_endpoint": server.uri() })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(basic_auth("exporter", "s3cret"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "xyz",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;

    let config = PlatformConfig {
        api_endpoint: server.uri(),
        client_id: "exporter".to_string(),
        client_secret: "s3cret".to_string(),
        ..PlatformConfig::default()
    };
    let client = CloudFoundryClient::new(&config).unwrap();

    assert_eq!(client.authenticate().await.unwrap(), "bearer xyz");
}

#[tokio::test]
async fn test_rejected_credentials_are_an_auth_error() {
    let server = MockServer::start().await;
    let client = platform(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.authenticate().await.unwrap_err();

    assert!(err.is_auth());
}

#[tokio::test]
async fn test_lists_started_apps_across_pages() {
    let server = MockServer::start().await;
    let client = platform(&server).await;

    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .and(query_param("page", "2"))
        .and(header("authorization", "bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next_url": null,
            "resources": [app("g3", "worker", 1, "STARTED")]
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .and(header("authorization", "bearer abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next_url": "/v2/apps?inline-relations-depth=2&results-per-page=100&page=2",
            "resources": [
                app("g1", "web", 3, "STARTED"),
                app("g2", "stopped-app", 1, "STOPPED")
            ]
        })))
        .mount(&server)
        .await;

    let workloads = client.list_workloads("bearer abc123").await.unwrap();

    let names: Vec<&str> = workloads.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["web", "worker"]);
    let web = &workloads[0];
    assert_eq!(web.guid.as_str(), "g1");
    assert_eq!(web.instances, 3);
    assert_eq!(web.organisation, "acme");
    assert_eq!(web.space, "dev");
    assert_eq!(web.kind, WorkloadKind::App);
}

#[tokio::test]
async fn test_lists_service_instances() {
    let server = MockServer::start().await;
    let client = platform(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/service_instances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [{
                "metadata": { "guid": "s1" },
                "entity": { "name": "db" }
            }]
        })))
        .mount(&server)
        .await;

    let services = client.list_services("bearer abc123").await.unwrap();

    assert_eq!(services.len(), 1);
    assert_eq!(services[0].name, "db");
    assert_eq!(services[0].instances, 1);
    assert_eq!(services[0].kind, WorkloadKind::Service);
    assert_eq!(services[0].space, "");
}

#[tokio::test]
async fn test_expired_token_is_an_auth_error() {
    let server = MockServer::start().await;
    let client = platform(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Invalid auth token"
        })))
        .mount(&server)
        .await;

    let err = client.list_workloads("bearer stale").await.unwrap_err();

    assert!(err.is_auth());
}

#[tokio::test]
async fn test_server_error_is_a_discovery_error() {
    let server = MockServer::start().await;
    let client = platform(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client.list_workloads("bearer abc123").await.unwrap_err();

    assert_eq!(err.category(), "discovery");
    assert!(!err.is_auth());
}
