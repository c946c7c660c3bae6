//! Protocol Stages for Edge Data Collection
//!
//! ## Overview
//!
//! This crate provides the stages that talk to the outside world. Each
//! protocol sits behind its own cargo feature so constrained builds only
//! carry the transports they use.
//!
//! | Feature | Stages | Transport |
//! |---------|--------|-----------|
//! | `http` | client origin, processor, client destination | `ureq` + rustls |
//! | `mqtt` | client origin, client destination | `rumqttc` (sync client) |
//! | `websocket` | client origin, client destination | `tungstenite` |
//! | `coap` | client destination | `coap-lite` over UDP |
//! | `sensor` | sensor reader origin | Linux i2c-dev, thermal pseudo-files |
//!
//! ## Protocol Selection Guide
//!
//! ### HTTP
//!
//! **When to use:**
//! - Integration with existing web services
//! - Per-record enrichment (lookups keyed by record fields)
//! - Complex authentication (Digest, OAuth 1.0a)
//!
//! **Modes:** polling (errors are reported and swallowed), streaming (one
//! long response read across batches).
//!
//! ### MQTT
//!
//! **When to use:**
//! - Reliable networks with a broker in place
//! - Pub/sub fan-in from many devices
//! - QoS guarantees required
//!
//! ### WebSocket
//!
//! **When to use:**
//! - Server pushes a continuous feed
//! - Firewall-friendly long-lived connection
//!
//! ### CoAP
//!
//! **When to use:**
//! - Constrained networks (6LoWPAN, NB-IoT)
//! - UDP is acceptable
//! - Confirmable delivery without a broker
//!
//! ## Push-Based Origins
//!
//! MQTT and WebSocket deliver data when the network says so, while the
//! runner asks for batches when it is ready. Both origins run the network
//! on a producer thread and hand records over through
//! [`bridge::PushPullBridge`], which keeps offer order and never sends
//! after shutdown.
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgeflow_core::{registry, stages, RecordBatchMaker, RuntimeContext, StageConfig, StageInstance};
//!
//! edgeflow_connectors::register_all();
//!
//! let stage = registry::create_stage(stages::BASIC_LIBRARY, edgeflow_connectors::http::HTTP_CLIENT_ORIGIN);
//! let config = StageConfig::default()
//!     .with("conf.resourceUrl", "http://gateway.local/readings")
//!     .with("conf.pollingInterval", 0.0);
//! let mut origin = StageInstance::new(stage);
//! let issues = origin.init(Arc::new(RuntimeContext::new("http", config))).unwrap();
//! assert!(issues.is_empty());
//!
//! let mut maker = RecordBatchMaker::new();
//! let offset = origin.produce(None, 1000, &mut maker).unwrap();
//! assert_eq!(offset.as_deref(), Some("http"));
//! ```

#![deny(unsafe_code)]

pub mod bridge;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "coap")]
pub mod coap;

#[cfg(feature = "sensor")]
pub mod sensor;

// Re-export common types
pub use bridge::{BridgeError, PushPullBridge, RecordPublisher};

#[cfg(feature = "http")]
pub use http::{HttpClient, HttpClientDestination, HttpClientOrigin, HttpError, HttpProcessor};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttClientDestination, MqttClientOrigin, MqttError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketClientDestination, WebSocketClientOrigin, WebSocketError};

#[cfg(feature = "coap")]
pub use coap::{CoapClientDestination, CoapError};

#[cfg(feature = "sensor")]
pub use sensor::{SensorError, SensorReaderOrigin};

use edgeflow_core::{registry, stages, Stage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register every stage of this crate and of `edgeflow-core`
///
/// Safe to call more than once; later registrations replace earlier ones.
pub fn register_all() {
    stages::register_basic_stages();

    #[cfg(feature = "http")]
    {
        registry::register(stages::BASIC_LIBRARY, http::HTTP_CLIENT_ORIGIN, || {
            Stage::Origin(Box::new(HttpClientOrigin::new()))
        });
        registry::register(stages::BASIC_LIBRARY, http::HTTP_PROCESSOR, || {
            Stage::Processor(Box::new(HttpProcessor::new()))
        });
        registry::register(stages::BASIC_LIBRARY, http::HTTP_CLIENT_DESTINATION, || {
            Stage::Destination(Box::new(HttpClientDestination::new()))
        });
    }

    #[cfg(feature = "mqtt")]
    {
        registry::register(stages::BASIC_LIBRARY, mqtt::MQTT_CLIENT_ORIGIN, || {
            Stage::Origin(Box::new(MqttClientOrigin::new()))
        });
        registry::register(stages::BASIC_LIBRARY, mqtt::MQTT_CLIENT_DESTINATION, || {
            Stage::Destination(Box::new(MqttClientDestination::new()))
        });
    }

    #[cfg(feature = "websocket")]
    {
        registry::register(stages::BASIC_LIBRARY, websocket::WEBSOCKET_CLIENT_ORIGIN, || {
            Stage::Origin(Box::new(WebSocketClientOrigin::new()))
        });
        registry::register(stages::BASIC_LIBRARY, websocket::WEBSOCKET_CLIENT_DESTINATION, || {
            Stage::Destination(Box::new(WebSocketClientDestination::new()))
        });
    }

    #[cfg(feature = "coap")]
    registry::register(stages::BASIC_LIBRARY, coap::COAP_CLIENT_DESTINATION, || {
        Stage::Destination(Box::new(CoapClientDestination::new()))
    });

    #[cfg(feature = "sensor")]
    registry::register(stages::SENSOR_LIBRARY, sensor::SENSOR_READER_ORIGIN, || {
        Stage::Origin(Box::new(SensorReaderOrigin::new()))
    });
}

/// Resolve `${}` parameters in configured headers
///
/// Values that fail to resolve are sent verbatim and reported once.
#[cfg(any(feature = "http", feature = "websocket"))]
pub(crate) fn resolve_headers(
    context: &dyn edgeflow_core::StageContext,
    headers: &edgeflow_core::HeaderList,
) -> Vec<(String, String)> {
    headers
        .pairs()
        .into_iter()
        .map(|(name, value)| match context.resolved_value(&value) {
            Ok(resolved) => (name, resolved.to_text()),
            Err(err) => {
                context.report_error(err.into());
                (name, value)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_register_all_is_idempotent() {
        register_all();
        register_all();
        let keys = registry::registered_stages();
        let basic = keys
            .iter()
            .filter(|k| k.library == stages::BASIC_LIBRARY && k.stage_name == stages::IDENTITY_PROCESSOR)
            .count();
        assert_eq!(basic, 1);
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_stages_registered() {
        register_all();
        let stage = registry::create_stage(stages::BASIC_LIBRARY, http::HTTP_PROCESSOR);
        assert_eq!(stage.kind(), edgeflow_core::StageKind::Processor);
    }

    #[cfg(feature = "sensor")]
    #[test]
    fn test_sensor_lives_in_sensor_library() {
        register_all();
        assert!(registry::try_create_stage(stages::SENSOR_LIBRARY, sensor::SENSOR_READER_ORIGIN).is_ok());
        assert!(registry::try_create_stage(stages::BASIC_LIBRARY, sensor::SENSOR_READER_ORIGIN).is_err());
    }
}
