//! HTTP processor against a mock server

#![cfg(feature = "http")]

mod common;

use edgeflow_connectors::http::HTTP_PROCESSOR;
use edgeflow_core::{stages, Batch, Field, Record, RecordBatchMaker, RuntimeContext, StageConfig, StageInstance};
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use common::{init_stage, runtime};

/// Answers with the method, the `a` query parameter and the decoded body
struct Echo;

impl Respond for Echo {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let a = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "a")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        ResponseTemplate::new(200)
            .insert_header("x-trace", "abc")
            .set_body_json(json!({
                "status": "success",
                "requestMethod": request.method.to_string(),
                "bodyParam": body,
                "a": a,
            }))
    }
}

fn echo_server(rt: &tokio::runtime::Runtime) -> MockServer {
    rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any()).respond_with(Echo).mount(&server).await;
        server
    })
}

fn processor(server: &MockServer, config: StageConfig) -> (StageInstance, std::sync::Arc<RuntimeContext>) {
    let context = RuntimeContext::new("processor", config).with_parameter("url", format!("{}/path", server.uri()));
    init_stage(stages::BASIC_LIBRARY, HTTP_PROCESSOR, context)
}

fn expression_config() -> StageConfig {
    StageConfig::default()
        .with("conf.resourceUrl", "${url+\"?a=\"+record:value('/a')}")
        .with("conf.httpMethod", "EXPRESSION")
        .with("conf.methodExpression", "${record:value('/method')}")
        .with("conf.requestBody", "${record:value('/b')}")
        .with("conf.outputField", "/result")
        .with("conf.dataFormat", "JSON")
}

fn input(a: &str, b: &str, method: &str) -> Record {
    Record::new(
        format!("in::{}", a),
        Field::from(&json!({"a": a, "b": b, "method": method})),
    )
}

#[test]
fn test_expression_method_url_and_body() {
    let rt = runtime();
    let server = echo_server(&rt);
    let (mut stage, context) = processor(&server, expression_config().with("conf.headerOutputLocation", "NONE"));

    let batch = Batch::new(None, vec![input("1", "hello", "post"), input("2", "world", "PUT")]);
    let mut maker = RecordBatchMaker::new();
    stage.process(&batch, &mut maker).unwrap();
    let out = maker.into_batch(None).into_records();

    assert_eq!(context.sink().error_count(), 0);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].get("/result/status"), Some(&Field::from("success")));
    assert_eq!(out[0].get("/result/requestMethod"), Some(&Field::from("POST")));
    assert_eq!(out[0].get("/result/bodyParam"), Some(&Field::from("hello")));
    assert_eq!(out[0].get("/result/a"), Some(&Field::from("1")));
    assert_eq!(out[1].get("/result/requestMethod"), Some(&Field::from("PUT")));
    assert_eq!(out[1].get("/result/bodyParam"), Some(&Field::from("world")));
    // input fields survive
    assert_eq!(out[1].get("/b"), Some(&Field::from("world")));
    assert!(out[0].attribute("x-trace").is_none());
}

#[test]
fn test_response_headers_as_attributes() {
    let rt = runtime();
    let server = echo_server(&rt);
    let config = expression_config()
        .with("conf.headerOutputLocation", "HEADER")
        .with("conf.headerAttributePrefix", "http-");
    let (mut stage, _context) = processor(&server, config);

    let batch = Batch::new(None, vec![input("1", "x", "GET")]);
    let mut maker = RecordBatchMaker::new();
    stage.process(&batch, &mut maker).unwrap();
    let out = maker.into_batch(None).into_records();

    assert_eq!(out[0].attribute("http-x-trace"), Some("abc"));
}

#[test]
fn test_response_headers_as_field() {
    let rt = runtime();
    let server = echo_server(&rt);
    let config = expression_config()
        .with("conf.headerOutputLocation", "FIELD")
        .with("conf.headerOutputField", "/headers");
    let (mut stage, _context) = processor(&server, config);

    let batch = Batch::new(None, vec![input("1", "x", "GET")]);
    let mut maker = RecordBatchMaker::new();
    stage.process(&batch, &mut maker).unwrap();
    let out = maker.into_batch(None).into_records();

    assert_eq!(out[0].get("/headers/x-trace"), Some(&Field::from("abc")));
}

#[test]
fn test_failed_request_goes_to_error() {
    let rt = runtime();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&server)
            .await;
        server
    });
    let config = StageConfig::default()
        .with("conf.resourceUrl", "${url}")
        .with("conf.httpMethod", "GET")
        .with("conf.outputField", "/result");
    let (mut stage, context) = processor(&server, config);

    let batch = Batch::new(None, vec![input("1", "x", "GET")]);
    let mut maker = RecordBatchMaker::new();
    stage.process(&batch, &mut maker).unwrap();

    assert!(maker.into_batch(None).is_empty());
    let errors = context.sink().error_records();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].header().source_id, "in::1");
    assert_eq!(
        errors[0].header().error_message.as_deref(),
        Some("Error fetching resource. Status Code: 404 Not Found, Reason: missing")
    );
}

#[test]
fn test_missing_output_field_is_an_issue() {
    edgeflow_connectors::register_all();
    let stage = edgeflow_core::registry::create_stage(stages::BASIC_LIBRARY, HTTP_PROCESSOR);
    let mut instance = StageInstance::new(stage);
    let config = StageConfig::default()
        .with("conf.resourceUrl", "http://localhost/")
        .with("conf.httpMethod", "EXPRESSION")
        .with("conf.outputField", "");
    let issues = instance
        .init(std::sync::Arc::new(RuntimeContext::new("processor", config)))
        .unwrap();
    let names: Vec<_> = issues.iter().filter_map(|i| i.config_name.as_deref()).collect();
    assert_eq!(names, vec!["conf.outputField", "conf.methodExpression"]);
}
