//! MQTT Stages - Broker Integration
//!
//! ## Overview
//!
//! | Stage | Role |
//! |-------|------|
//! | [`MqttClientOrigin`] | Subscribes to topic filters, hands messages to `produce` through a [`PushPullBridge`](crate::bridge::PushPullBridge) |
//! | [`MqttClientDestination`] | Publishes each record as JSON |
//!
//! Both stages read the broker connection from `commonConf.*`
//! ([`MqttCommonConfig`]) and drive a `rumqttc` synchronous client. The
//! network event loop always runs on a stage-owned thread: the bridge
//! producer for the origin, a driver thread for the destination.
//!
//! ## Broker URL
//!
//! ```text
//! tcp://host[:1883]     plain TCP
//! ssl://host[:8883]     TLS with the bundled web PKI roots
//! ```

mod config;
mod destination;
mod origin;

use std::time::{Duration, Instant};

use log::debug;
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Transport};
use thiserror::Error;
use url::Url;

pub use config::{MqttCommonConfig, MqttDestinationConfig, MqttOriginConfig, MqttQos};
pub use destination::MqttClientDestination;
pub use origin::{MqttClientOrigin, MQTT_OFFSET};

/// MQTT subscriber origin
pub const MQTT_CLIENT_ORIGIN: &str = "edgeflow_stage_origin_mqtt_MqttClientSource";
/// MQTT publisher destination
pub const MQTT_CLIENT_DESTINATION: &str = "edgeflow_stage_destination_mqtt_MqttClientTarget";

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;
/// Longest wait for a queued DISCONNECT to reach the broker
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// MQTT errors
#[derive(Debug, Error)]
pub enum MqttError {
    /// Broker URL could not be used
    #[error("invalid broker URL '{url}': {message}")]
    InvalidBrokerUrl {
        /// Configured URL
        url: String,
        /// What is wrong with it
        message: String,
    },

    /// Request could not be queued
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Connection to the broker failed
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// Open a client from the common broker options
///
/// Nothing touches the network until the returned [`Connection`] is polled.
pub fn connect(common: &MqttCommonConfig, default_client_id: &str) -> Result<(Client, Connection), MqttError> {
    let invalid = |message: String| MqttError::InvalidBrokerUrl {
        url: common.broker_url.clone(),
        message,
    };
    let url = Url::parse(&common.broker_url).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?
        .to_string();
    let (tls, default_port) = match url.scheme() {
        "tcp" | "mqtt" => (false, 1883),
        "ssl" | "mqtts" => (true, 8883),
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };
    let port = url.port().unwrap_or(default_port);

    let client_id = if common.client_id.is_empty() {
        default_client_id
    } else {
        common.client_id.as_str()
    };
    let mut options = MqttOptions::new(client_id, host, port);
    options
        .set_keep_alive(Duration::from_secs(common.keep_alive.max(5)))
        .set_clean_session(common.clean_session);
    if !common.username.is_empty() {
        options.set_credentials(common.username.clone(), common.password.clone());
    }
    if tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    Ok(Client::new(options, REQUEST_CAPACITY))
}

/// Poll until the queued DISCONNECT is written or the connection gives up
fn flush_disconnect(connection: &mut Connection) {
    let deadline = Instant::now() + DISCONNECT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("DISCONNECT not sent within {:?}", DISCONNECT_TIMEOUT);
            return;
        }
        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return,
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return,
        }
    }
}
