//! HTTP client origin against a mock server

#![cfg(feature = "http")]

mod common;

use edgeflow_connectors::http::HTTP_CLIENT_ORIGIN;
use edgeflow_core::{
    stages, Field, RecordBatchMaker, RuntimeContext, StageConfig, StageError,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{basic_stage, init_stage, produce, runtime};

fn polling(uri: &str) -> StageConfig {
    StageConfig::default()
        .with("conf.resourceUrl", uri)
        .with("conf.httpMethod", "GET")
        .with("conf.httpMode", "POLLING")
        .with("conf.pollingInterval", 0.0)
        .with("conf.dataFormat", "JSON")
}

#[test]
fn test_polling_json_body() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"success"}{"status":"failure"}"#))
            .mount(&server)
            .await;
        server
    });

    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, polling(&format!("{}/stream", server.uri())));
    let (offset, records) = produce(&mut origin, 1000);

    assert_eq!(offset.as_deref(), Some("http"));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("/status"), Some(&Field::from("success")));
    assert_eq!(records[1].get("/status"), Some(&Field::from("failure")));
    assert_eq!(context.sink().error_count(), 0);
    origin.destroy();
}

#[test]
fn test_polling_text_lines() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("line1\n line2\n line3"))
            .mount(&server)
            .await;
        server
    });

    let config = polling(&server.uri())
        .with("conf.dataFormat", "TEXT")
        .with("conf.dataFormatConfig.textMaxLineLen", 1024.0);
    let (mut origin, _context) = basic_stage(HTTP_CLIENT_ORIGIN, config);
    let (_, records) = produce(&mut origin, 1000);

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].get("/text"), Some(&Field::from("line1")));
    assert_eq!(records[2].get("/text"), Some(&Field::from(" line3")));
}

#[test]
fn test_streaming_caps_at_max_batch_size() {
    let body: String = (0..30).map(|i| format!("{{\"n\":{}}}\n", i)).collect();
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    });

    let config = polling(&server.uri())
        .with("conf.httpMode", "STREAMING")
        .with("conf.basic.maxBatchSize", 5.0);
    let (mut origin, _context) = basic_stage(HTTP_CLIENT_ORIGIN, config);

    let (_, first) = produce(&mut origin, 1000);
    assert_eq!(first.len(), 5);
    assert_eq!(first[0].get("/n"), Some(&Field::Integer(0)));

    // the open response is resumed, no second request
    let (_, second) = produce(&mut origin, 1000);
    assert_eq!(second.len(), 5);
    assert_eq!(second[0].get("/n"), Some(&Field::Integer(5)));
    let requests = rt.block_on(server.received_requests()).unwrap();
    assert_eq!(requests.len(), 1);
}

#[test]
fn test_polling_server_error_is_reported() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Sample Server Error\n"))
            .mount(&server)
            .await;
        server
    });

    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, polling(&server.uri()));
    let (offset, records) = produce(&mut origin, 1000);

    assert_eq!(offset.as_deref(), Some("http"));
    assert!(records.is_empty());
    assert_eq!(
        context.sink().error_messages(),
        vec!["Error fetching resource. Status Code: 500 Internal Server Error, Reason: Sample Server Error\n"]
    );
}

#[test]
fn test_streaming_server_error_is_returned() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;
        server
    });

    let config = polling(&server.uri()).with("conf.httpMode", "STREAMING");
    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, config);
    let mut maker = RecordBatchMaker::new();
    let err = origin.produce(None, 1000, &mut maker).unwrap_err();

    assert!(matches!(err, StageError::Status { .. }));
    assert!(err.to_string().starts_with("Error fetching resource. Status Code: 503"));
    assert_eq!(context.sink().error_count(), 0);
}

#[test]
fn test_invalid_host_is_sunk() {
    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, polling("http://invalidURL"));
    let (offset, records) = produce(&mut origin, 1000);

    assert_eq!(offset.as_deref(), Some("http"));
    assert!(records.is_empty());
    let messages = context.sink().error_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Error executing request: "), "{}", messages[0]);
}

#[test]
fn test_batch_mode_is_fatal() {
    let config = polling("http://localhost:1/").with("conf.httpMode", "BATCH");
    let (mut origin, _context) = basic_stage(HTTP_CLIENT_ORIGIN, config);
    let mut maker = RecordBatchMaker::new();
    let err = origin.produce(None, 10, &mut maker).unwrap_err();
    assert_eq!(err.to_string(), "Batch Mode is not supported");
}

#[test]
fn test_zero_batch_size_sends_nothing() {
    let rt = runtime();
    let server = rt.block_on(MockServer::start());

    let (mut origin, _context) = basic_stage(HTTP_CLIENT_ORIGIN, polling(&server.uri()));
    let (offset, records) = produce(&mut origin, 0);

    assert_eq!(offset.as_deref(), Some("http"));
    assert!(records.is_empty());
    assert!(rt.block_on(server.received_requests()).unwrap().is_empty());
}

#[test]
fn test_truncated_json_reports_one_parse_error() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"a":1} {"b":"#))
            .mount(&server)
            .await;
        server
    });

    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, polling(&server.uri()));
    let (_, records) = produce(&mut origin, 1000);

    assert_eq!(records.len(), 1);
    let messages = context.sink().error_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Failed to parse raw data: "));
    assert!(messages[0].contains("unexpected EOF"));
}

#[test]
fn test_headers_and_basic_auth() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("X-Api-Key", "secret"))
            .and(header("Authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        server
    });

    let config = polling(&server.uri())
        .with("conf.headers", json!([{"key": "X-Api-Key", "value": "${apiKey}"}]))
        .with("conf.client.authType", "BASIC")
        .with("conf.client.basicAuth.username", "user")
        .with("conf.client.basicAuth.password", "pass");
    let context = RuntimeContext::new("http", config).with_parameter("apiKey", "secret");
    let (mut origin, context) = init_stage(stages::BASIC_LIBRARY, HTTP_CLIENT_ORIGIN, context);
    let (_, records) = produce(&mut origin, 1000);

    assert_eq!(context.sink().error_messages(), Vec::<String>::new());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("/ok"), Some(&Field::Boolean(true)));
}

#[test]
fn test_empty_headers_map_is_legal() {
    let config = polling("http://localhost:1/").with("conf.headers", json!({}));
    let (origin, _context) = basic_stage(HTTP_CLIENT_ORIGIN, config);
    drop(origin);
}

#[test]
fn test_malformed_url_is_an_init_issue() {
    edgeflow_connectors::register_all();
    let stage = edgeflow_core::registry::create_stage(stages::BASIC_LIBRARY, HTTP_CLIENT_ORIGIN);
    let mut instance = edgeflow_core::StageInstance::new(stage);
    let context = std::sync::Arc::new(RuntimeContext::new("http", polling("not a url")));
    let issues = instance.init(context).unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].config_name.as_deref(), Some("conf.resourceUrl"));
}

#[test]
fn test_expression_method_is_an_init_issue() {
    edgeflow_connectors::register_all();
    let stage = edgeflow_core::registry::create_stage(stages::BASIC_LIBRARY, HTTP_CLIENT_ORIGIN);
    let mut instance = edgeflow_core::StageInstance::new(stage);
    let config = polling("http://localhost:1/").with("conf.httpMethod", "EXPRESSION");
    let issues = instance
        .init(std::sync::Arc::new(RuntimeContext::new("http", config)))
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].config_name.as_deref(), Some("conf.httpMethod"));
}

#[test]
fn test_configured_method_is_sent() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"posted":true}"#))
            .mount(&server)
            .await;
        server
    });
    let config = polling(&server.uri()).with("conf.httpMethod", "POST");
    let (mut origin, context) = basic_stage(HTTP_CLIENT_ORIGIN, config);

    let (_, records) = produce(&mut origin, 10);
    assert_eq!(context.sink().error_count(), 0);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("/posted"), Some(&Field::Boolean(true)));
}
