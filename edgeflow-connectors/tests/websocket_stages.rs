//! WebSocket origin and destination against a local server

#![cfg(feature = "websocket")]

mod common;

use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use edgeflow_connectors::websocket::{WEBSOCKET_CLIENT_DESTINATION, WEBSOCKET_CLIENT_ORIGIN};
use edgeflow_core::{Batch, Field, Record, RecordBatchMaker, StageConfig, StageError};
use serde_json::{json, Value};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

use common::basic_stage;

/// Server that waits for the subscription, pushes `messages`, then closes
fn feed(messages: Vec<&'static str>) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut socket = tungstenite::accept(stream).unwrap();
        if let Ok(Message::Text(subscription)) = socket.read() {
            let _ = tx.send(subscription.to_string());
        }
        for message in messages {
            socket.send(Message::text(message)).unwrap();
        }
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .unwrap();
        while socket.read().is_ok() {}
    });
    (format!("ws://127.0.0.1:{}/feed", port), rx)
}

#[test]
fn test_origin_streams_until_close() {
    let (url, subscriptions) = feed(vec![r#"{"v":1} {"v":2}"#, r#"{"v":3}"#]);
    let config = StageConfig::default()
        .with("conf.resourceUrl", url)
        .with("conf.requestBody", "subscribe")
        .with("conf.maxWaitTime", 200.0);
    let (mut origin, context) = basic_stage(WEBSOCKET_CLIENT_ORIGIN, config);

    assert_eq!(
        subscriptions.recv_timeout(Duration::from_secs(5)).unwrap(),
        "subscribe"
    );

    let mut records: Vec<Record> = Vec::new();
    let mut stopped = None;
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let mut maker = RecordBatchMaker::new();
        match origin.produce(None, 10, &mut maker) {
            Ok(offset) => {
                assert_eq!(offset.as_deref(), Some("webSocket"));
                records.extend(maker.into_batch(None).into_records());
            }
            Err(err) => {
                stopped = Some(err);
                break;
            }
        }
    }

    let values: Vec<_> = records.iter().map(|r| r.get("/v").cloned()).collect();
    assert_eq!(
        values,
        vec![Some(Field::Integer(1)), Some(Field::Integer(2)), Some(Field::Integer(3))]
    );
    assert_eq!(records[0].header().source_id, "webSocket-0::0");
    assert_eq!(records[1].header().source_id, "webSocket-0::1");
    assert_eq!(records[2].header().source_id, "webSocket-1::0");

    assert!(matches!(stopped, Some(StageError::Transport(_))));
    let errors = context.sink().take_errors();
    assert!(errors.iter().any(|e| matches!(
        e,
        StageError::ConnectionClosed { code: 1000, message } if message == "bye"
    )));
    origin.destroy();
}

#[test]
fn test_origin_waits_for_data() {
    let (url, _subscriptions) = feed(Vec::new());
    let config = StageConfig::default()
        .with("conf.resourceUrl", url)
        .with("conf.requestBody", "subscribe")
        .with("conf.maxWaitTime", 50.0);
    let (mut origin, _context) = basic_stage(WEBSOCKET_CLIENT_ORIGIN, config);

    let mut maker = RecordBatchMaker::new();
    let offset = origin.produce(None, 0, &mut maker).unwrap();
    assert_eq!(offset.as_deref(), Some("webSocket"));
    assert!(maker.into_batch(None).is_empty());
    origin.destroy();
}

#[test]
fn test_destination_sends_json_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut socket = tungstenite::accept(stream).unwrap();
        while let Ok(message) = socket.read() {
            if let Message::Text(text) = message {
                if tx.send(text.to_string()).is_err() {
                    break;
                }
            }
        }
    });

    let config = StageConfig::default().with("conf.resourceUrl", format!("ws://127.0.0.1:{}/sink", port));
    let (mut destination, context) = basic_stage(WEBSOCKET_CLIENT_DESTINATION, config);
    let batch = Batch::new(
        None,
        vec![
            Record::new("r::0", Field::from(&json!({"id": 0}))),
            Record::new("r::1", Field::from(&json!({"id": 1, "tags": ["a"]}))),
        ],
    );
    destination.write(&batch).unwrap();
    assert_eq!(context.sink().error_count(), 0);

    let first: Value = serde_json::from_str(&rx.recv_timeout(Duration::from_secs(5)).unwrap()).unwrap();
    let second: Value = serde_json::from_str(&rx.recv_timeout(Duration::from_secs(5)).unwrap()).unwrap();
    assert_eq!(first, json!({"id": 0}));
    assert_eq!(second, json!({"id": 1, "tags": ["a"]}));
    destination.destroy();
}

#[test]
fn test_unreachable_endpoint_is_an_issue() {
    edgeflow_connectors::register_all();
    let stage =
        edgeflow_core::registry::create_stage(edgeflow_core::stages::BASIC_LIBRARY, WEBSOCKET_CLIENT_DESTINATION);
    let mut instance = edgeflow_core::StageInstance::new(stage);
    // bound then dropped, so nothing listens there
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let config = StageConfig::default().with("conf.resourceUrl", format!("ws://127.0.0.1:{}/", port));
    let issues = instance
        .init(std::sync::Arc::new(edgeflow_core::RuntimeContext::new("ws", config)))
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].config_name.as_deref(), Some("conf.resourceUrl"));
}
