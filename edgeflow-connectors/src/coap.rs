//! CoAP Destination - Lightweight Protocol for Constrained Networks
//!
//! ## Overview
//!
//! Sends one CoAP request per record, JSON payload, over UDP. Message
//! building goes through `coap-lite`; the transport is a connected
//! `UdpSocket` owned by the stage.
//!
//! ## Reliability
//!
//! ```text
//! CONFIRMABLE      send ──▶ wait ackTimeout ──▶ ACK (matching id) ──▶ done
//!                    ▲            │ timeout
//!                    └── ×2 ◀─────┘ up to maxRetransmit times
//!
//! NONCONFIRMABLE   send ──▶ done
//! ```
//!
//! Each stage instance keeps its own message-id counter. It starts at a
//! random value and wraps at `u16::MAX`; it only advances after a send
//! went through.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgeflow_core::{registry, stages, RuntimeContext, StageConfig, StageInstance};
//!
//! edgeflow_connectors::register_all();
//! let stage = registry::create_stage(stages::BASIC_LIBRARY, edgeflow_connectors::coap::COAP_CLIENT_DESTINATION);
//! let config = StageConfig::default()
//!     .with("conf.resourceUrl", "coap://gateway.local:5683/sensors/temp")
//!     .with("conf.requestType", "NONCONFIRMABLE");
//! let mut instance = StageInstance::new(stage);
//! instance.init(Arc::new(RuntimeContext::new("coap", config))).unwrap();
//! ```

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use coap_lite::{CoapOption, ContentFormat, MessageClass, MessageType, Packet, RequestType};
use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use edgeflow_core::{Batch, Destination, Issue, Lifecycle, StageBase, StageContext, StageError, StageResult};

/// CoAP client destination
pub const COAP_CLIENT_DESTINATION: &str = "edgeflow_stage_destination_coap_CoapClientDestination";

const DEFAULT_PORT: u16 = 5683;
const MAX_DATAGRAM: usize = 1152;

/// CoAP errors
#[derive(Debug, Error)]
pub enum CoapError {
    /// Endpoint URL could not be used
    #[error("invalid CoAP URL '{url}': {message}")]
    InvalidUrl {
        /// Configured URL
        url: String,
        /// What is wrong with it
        message: String,
    },

    /// Message could not be encoded or decoded
    #[error("invalid CoAP message: {0}")]
    InvalidMessage(String),

    /// Socket failure
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// No ACK after the last retransmission
    #[error("no acknowledgement after {0} transmissions")]
    MaxRetransmissions(u32),

    /// Peer rejected the message
    #[error("message {0} was reset by the peer")]
    Reset(u16),

    /// Peer answered with an error code
    #[error("request failed with code {0}")]
    Response(String),
}

/// Request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoapMethod {
    /// GET
    Get,
    /// POST
    #[default]
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl From<CoapMethod> for RequestType {
    fn from(method: CoapMethod) -> Self {
        match method {
            CoapMethod::Get => RequestType::Get,
            CoapMethod::Post => RequestType::Post,
            CoapMethod::Put => RequestType::Put,
            CoapMethod::Delete => RequestType::Delete,
        }
    }
}

/// Reliability of each request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoapRequestType {
    /// Wait for an ACK, retransmit on timeout
    #[default]
    Confirmable,
    /// Fire and forget
    Nonconfirmable,
}

impl From<CoapRequestType> for MessageType {
    fn from(kind: CoapRequestType) -> Self {
        match kind {
            CoapRequestType::Confirmable => MessageType::Confirmable,
            CoapRequestType::Nonconfirmable => MessageType::NonConfirmable,
        }
    }
}

/// Destination options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoapDestinationConfig {
    /// `coap://host[:port]/path[?query]`
    pub resource_url: String,
    /// Request method
    pub coap_method: CoapMethod,
    /// Confirmable or not
    pub request_type: CoapRequestType,
    /// Initial ACK timeout in milliseconds, doubled on every retransmission
    pub ack_timeout_millis: u64,
    /// Retransmissions after the first send
    pub max_retransmit: u32,
}

impl Default for CoapDestinationConfig {
    fn default() -> Self {
        Self {
            resource_url: String::new(),
            coap_method: CoapMethod::default(),
            request_type: CoapRequestType::default(),
            ack_timeout_millis: 2000,
            max_retransmit: 4,
        }
    }
}

/// Resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapEndpoint {
    /// Peer address
    pub address: SocketAddr,
    /// Host as written in the URL
    pub host: String,
    /// Uri-Path segments
    pub path: Vec<String>,
    /// Uri-Query entries
    pub query: Vec<String>,
}

impl CoapEndpoint {
    /// Parse and resolve a `coap://` URL
    pub fn parse(resource_url: &str) -> Result<Self, CoapError> {
        let invalid = |message: String| CoapError::InvalidUrl {
            url: resource_url.to_string(),
            message,
        };
        let url = Url::parse(resource_url).map_err(|e| invalid(e.to_string()))?;
        if url.scheme() != "coap" {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let address = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("host did not resolve".to_string()))?;

        let path = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let query = url
            .query()
            .map(|q| q.split('&').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Self {
            address,
            host,
            path,
            query,
        })
    }
}

/// Build a request packet
pub fn build_request(
    endpoint: &CoapEndpoint,
    method: CoapMethod,
    kind: CoapRequestType,
    message_id: u16,
    payload: Vec<u8>,
) -> Packet {
    let mut packet = Packet::new();
    packet.header.set_type(kind.into());
    packet.header.code = MessageClass::Request(method.into());
    packet.header.message_id = message_id;
    packet.set_token(message_id.to_be_bytes().to_vec());
    for segment in &endpoint.path {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    for entry in &endpoint.query {
        packet.add_option(CoapOption::UriQuery, entry.as_bytes().to_vec());
    }
    if !payload.is_empty() {
        packet.set_content_format(ContentFormat::ApplicationJSON);
        packet.payload = payload;
    }
    packet
}

/// `class.detail` rendering of a response code, e.g. `4.04`
fn code_string(code: MessageClass) -> String {
    let raw = u8::from(code);
    format!("{}.{:02}", raw >> 5, raw & 0x1f)
}

/// Blocking UDP client bound to one endpoint
#[derive(Debug)]
pub struct CoapClient {
    socket: UdpSocket,
    endpoint: CoapEndpoint,
    ack_timeout: Duration,
    max_retransmit: u32,
}

impl CoapClient {
    /// Bind an ephemeral socket and connect it to the endpoint
    pub fn connect(endpoint: CoapEndpoint, ack_timeout: Duration, max_retransmit: u32) -> Result<Self, CoapError> {
        let local: SocketAddr = if endpoint.address.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(endpoint.address)?;
        Ok(Self {
            socket,
            endpoint,
            ack_timeout: ack_timeout.max(Duration::from_millis(1)),
            max_retransmit,
        })
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &CoapEndpoint {
        &self.endpoint
    }

    /// Send a packet; confirmable packets wait for their ACK
    ///
    /// Returns the payload of a piggybacked response, empty otherwise.
    pub fn send(&self, packet: &Packet) -> Result<Vec<u8>, CoapError> {
        let bytes = packet
            .to_bytes()
            .map_err(|e| CoapError::InvalidMessage(format!("{:?}", e)))?;
        let message_id = packet.header.message_id;

        if packet.header.get_type() != MessageType::Confirmable {
            self.socket.send(&bytes)?;
            return Ok(Vec::new());
        }

        let mut timeout = self.ack_timeout;
        let mut buffer = [0u8; MAX_DATAGRAM];
        for attempt in 0..=self.max_retransmit {
            if attempt > 0 {
                debug!("retransmitting message {} (attempt {})", message_id, attempt);
            }
            self.socket.send(&bytes)?;
            self.socket.set_read_timeout(Some(timeout))?;
            loop {
                let n = match self.socket.recv(&mut buffer) {
                    Ok(n) => n,
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                    Err(e) => return Err(e.into()),
                };
                let response = match Packet::from_bytes(&buffer[..n]) {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("ignoring malformed datagram: {:?}", e);
                        continue;
                    }
                };
                if response.header.message_id != message_id {
                    continue;
                }
                match response.header.get_type() {
                    MessageType::Reset => return Err(CoapError::Reset(message_id)),
                    MessageType::Acknowledgement => {
                        if u8::from(response.header.code) >> 5 >= 4 {
                            return Err(CoapError::Response(code_string(response.header.code)));
                        }
                        return Ok(response.payload);
                    }
                    _ => continue,
                }
            }
            timeout *= 2;
        }
        Err(CoapError::MaxRetransmissions(self.max_retransmit + 1))
    }
}

/// Sends each record as a JSON CoAP request
pub struct CoapClientDestination {
    base: StageBase,
    config: CoapDestinationConfig,
    client: Option<CoapClient>,
    message_id: u16,
}

impl CoapClientDestination {
    /// New, uninitialised destination
    pub fn new() -> Self {
        Self {
            base: StageBase::default(),
            config: CoapDestinationConfig::default(),
            client: None,
            message_id: rand::random(),
        }
    }

    /// Id the next request will carry
    pub fn next_message_id(&self) -> u16 {
        self.message_id
    }
}

impl Default for CoapClientDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for CoapClientDestination {
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        let config: CoapDestinationConfig = match context.stage_config().bind("conf") {
            Ok(config) => config,
            Err(err) => return vec![context.create_config_issue("conf", &err.to_string())],
        };
        let url = match context.resolved_value(&config.resource_url) {
            Ok(url) => url.to_text(),
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        };
        let client = CoapEndpoint::parse(&url).and_then(|endpoint| {
            CoapClient::connect(
                endpoint,
                Duration::from_millis(config.ack_timeout_millis),
                config.max_retransmit,
            )
        });
        match client {
            Ok(client) => {
                info!("coap destination sending to {}", client.endpoint().address);
                self.client = Some(client);
            }
            Err(err) => return vec![context.create_config_issue("conf.resourceUrl", &err.to_string())],
        }
        self.config = config;
        self.base.attach(context);
        Vec::new()
    }

    fn destroy(&mut self) {
        self.client = None;
        self.base.detach();
    }
}

impl Destination for CoapClientDestination {
    fn write(&mut self, batch: &Batch) -> StageResult<()> {
        let context = self.base.context()?.clone();
        let Some(client) = &self.client else {
            return Err(StageError::IllegalState {
                operation: "write",
                state: "created",
            });
        };
        for record in batch.records() {
            let payload = match record.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    context.to_error(StageError::Serialization(err.to_string()), record.clone());
                    continue;
                }
            };
            let packet = build_request(
                client.endpoint(),
                self.config.coap_method,
                self.config.request_type,
                self.message_id,
                payload,
            );
            match client.send(&packet) {
                Ok(_) => self.message_id = self.message_id.wrapping_add(1),
                Err(err) => {
                    warn!("coap request for '{}' failed: {}", record.header().source_id, err);
                    context.to_error(StageError::Transport(err.to_string()), record.clone());
                }
            }
        }
        Ok(())
    }
}
