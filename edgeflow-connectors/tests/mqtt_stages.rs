//! MQTT origin and destination against a minimal local broker

#![cfg(feature = "mqtt")]

mod common;

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use edgeflow_connectors::mqtt::{MQTT_CLIENT_DESTINATION, MQTT_CLIENT_ORIGIN, MQTT_OFFSET};
use edgeflow_core::{Batch, Field, Record, StageConfig};
use serde_json::{json, Value};

use common::{basic_stage, produce};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 1];
    stream.read_exact(&mut header)?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte)?;
        len |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok((header[0], body))
}

fn write_packet(stream: &mut TcpStream, header: u8, body: &[u8]) -> io::Result<()> {
    let mut packet = vec![header];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(body);
    stream.write_all(&packet)
}

/// Topic, packet id (QoS > 0 only) and payload of a PUBLISH body
fn split_publish(header: u8, body: &[u8]) -> (String, Option<u16>, Vec<u8>) {
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
    let mut rest = &body[2 + topic_len..];
    let packet_id = if (header >> 1) & 0x03 > 0 {
        let id = u16::from_be_bytes([rest[0], rest[1]]);
        rest = &rest[2..];
        Some(id)
    } else {
        None
    };
    (topic, packet_id, rest.to_vec())
}

/// Broker for one client
///
/// Acknowledges CONNECT, SUBSCRIBE, QoS 1 PUBLISH and PINGREQ, sends
/// `publishes` once the subscription is in, and forwards every packet it
/// reads.
fn broker(publishes: Vec<(&'static str, &'static str)>) -> (String, mpsc::Receiver<(u8, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        while let Ok((header, body)) = read_packet(&mut stream) {
            match header >> 4 {
                CONNECT => write_packet(&mut stream, 0x20, &[0x00, 0x00]).unwrap(),
                SUBSCRIBE => {
                    let granted = *body.last().unwrap();
                    write_packet(&mut stream, 0x90, &[body[0], body[1], granted]).unwrap();
                    for (topic, payload) in &publishes {
                        let mut publish = (topic.len() as u16).to_be_bytes().to_vec();
                        publish.extend_from_slice(topic.as_bytes());
                        publish.extend_from_slice(payload.as_bytes());
                        write_packet(&mut stream, 0x30, &publish).unwrap();
                    }
                }
                PUBLISH => {
                    if let (_, Some(id), _) = split_publish(header, &body) {
                        write_packet(&mut stream, 0x40, &id.to_be_bytes()).unwrap();
                    }
                }
                PINGREQ => write_packet(&mut stream, 0xD0, &[]).unwrap(),
                _ => {}
            }
            let last = header >> 4 == DISCONNECT;
            if tx.send((header, body)).is_err() || last {
                break;
            }
        }
    });
    (format!("tcp://127.0.0.1:{}", port), rx)
}

fn wait_for(packets: &mpsc::Receiver<(u8, Vec<u8>)>, kind: u8) -> Option<(u8, Vec<u8>)> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match packets.recv_timeout(remaining) {
            Ok(packet) if packet.0 >> 4 == kind => return Some(packet),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

#[test]
fn test_origin_parses_each_publish_under_its_topic() {
    let (url, packets) = broker(vec![
        ("sensors/a", r#"{"v":1} {"v":2}"#),
        ("sensors/b", r#"{"v":3}"#),
        ("sensors/c", r#"{"v":"#),
    ]);
    let config = StageConfig::default()
        .with("commonConf.brokerUrl", url)
        .with("commonConf.clientId", "origin-test")
        .with("commonConf.qos", 1.0)
        .with("conf.topicFilter", json!(["sensors/#"]))
        .with("conf.dataFormat", "JSON")
        .with("conf.maxWaitTime", 200.0);
    let (mut origin, context) = basic_stage(MQTT_CLIENT_ORIGIN, config);

    let mut records: Vec<Record> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline && (records.len() < 3 || context.sink().error_count() == 0) {
        let (offset, batch) = produce(&mut origin, 10);
        assert_eq!(offset.as_deref(), Some(MQTT_OFFSET));
        records.extend(batch);
    }

    let ids: Vec<&str> = records.iter().map(|r| r.header().source_id.as_str()).collect();
    assert_eq!(ids, vec!["sensors/a::0", "sensors/a::1", "sensors/b::0"]);
    let values: Vec<_> = records.iter().map(|r| r.get("/v").cloned()).collect();
    assert_eq!(
        values,
        vec![Some(Field::Integer(1)), Some(Field::Integer(2)), Some(Field::Integer(3))]
    );
    assert_eq!(
        context.sink().error_messages(),
        vec!["Failed to parse raw data: unexpected EOF"]
    );

    let (_, subscribe) = wait_for(&packets, SUBSCRIBE).unwrap();
    let filter_len = u16::from_be_bytes([subscribe[2], subscribe[3]]) as usize;
    assert_eq!(&subscribe[4..4 + filter_len], b"sensors/#");
    // requested QoS 1
    assert_eq!(subscribe[4 + filter_len], 1);

    origin.destroy();
    assert!(wait_for(&packets, DISCONNECT).is_some());
}

#[test]
fn test_destination_publishes_json_with_qos_and_retain() {
    let (url, packets) = broker(Vec::new());
    let config = StageConfig::default()
        .with("commonConf.brokerUrl", url)
        .with("commonConf.clientId", "destination-test")
        .with("commonConf.qos", 1.0)
        .with("conf.topic", "out/readings")
        .with("conf.retained", true);
    let (mut destination, context) = basic_stage(MQTT_CLIENT_DESTINATION, config);

    let batch = Batch::new(
        None,
        vec![
            Record::new("r::0", Field::from(&json!({"id": 0, "temp": 21.5}))),
            Record::new("r::1", Field::from(&json!({"id": 1, "temp": 22.0}))),
        ],
    );
    destination.write(&batch).unwrap();

    let mut published = Vec::new();
    for _ in 0..2 {
        let (header, body) = wait_for(&packets, PUBLISH).unwrap();
        assert_eq!((header >> 1) & 0x03, 1, "QoS bits");
        assert_eq!(header & 0x01, 1, "retain flag");
        let (topic, packet_id, payload) = split_publish(header, &body);
        assert_eq!(topic, "out/readings");
        assert!(packet_id.is_some());
        published.push(serde_json::from_slice::<Value>(&payload).unwrap());
    }
    assert_eq!(published, vec![json!({"id": 0, "temp": 21.5}), json!({"id": 1, "temp": 22.0})]);
    assert!(context.sink().error_records().is_empty());

    destination.destroy();
    assert!(wait_for(&packets, DISCONNECT).is_some());
}

#[test]
fn test_origin_requires_a_topic_filter() {
    edgeflow_connectors::register_all();
    let stage = edgeflow_core::registry::create_stage(edgeflow_core::stages::BASIC_LIBRARY, MQTT_CLIENT_ORIGIN);
    let mut instance = edgeflow_core::StageInstance::new(stage);
    let config = StageConfig::default().with("commonConf.brokerUrl", "tcp://127.0.0.1:1");
    let issues = instance
        .init(std::sync::Arc::new(edgeflow_core::RuntimeContext::new("mqtt", config)))
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].config_name.as_deref(), Some("conf.topicFilter"));
}
