//! WebSocket Stages
//!
//! [`WebSocketClientOrigin`] keeps one connection open and hands every
//! text or binary message to `produce` through the push→pull bridge.
//! [`WebSocketClientDestination`] connects at init and writes each record
//! as a JSON text frame.
//!
//! Both use blocking `tungstenite` over a `TcpStream`; `wss://` goes
//! through rustls with the bundled web PKI roots. The origin's socket has a
//! short read timeout so its producer thread notices shutdown between
//! messages.

mod destination;
mod origin;

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::{HeaderName, HeaderValue};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::WebSocket;
use url::Url;

use edgeflow_core::{DataFormat, DataParserConfig, HeaderList};

pub use destination::WebSocketClientDestination;
pub use origin::{WebSocketClientOrigin, WEBSOCKET_OFFSET};

/// WebSocket client origin
pub const WEBSOCKET_CLIENT_ORIGIN: &str = "edgeflow_stage_origin_websocket_WebSocketClientSource";
/// WebSocket client destination
pub const WEBSOCKET_CLIENT_DESTINATION: &str = "edgeflow_stage_destination_websocket_WebSocketClientTarget";

/// Socket type shared by both stages
pub type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// WebSocket errors
#[derive(Debug, Error)]
pub enum WebSocketError {
    /// URL could not be used
    #[error("invalid WebSocket URL '{url}': {message}")]
    InvalidUrl {
        /// Configured URL
        url: String,
        /// What is wrong with it
        message: String,
    },

    /// Header name or value rejected
    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    /// TCP connect failed
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// `host:port`
        address: String,
        /// OS error
        source: std::io::Error,
    },

    /// Handshake or framing failure
    #[error(transparent)]
    Protocol(#[from] tungstenite::Error),
}

/// Origin options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketOriginConfig {
    /// `ws://` or `wss://` endpoint
    pub resource_url: String,
    /// Handshake headers
    pub headers: HeaderList,
    /// Message sent once after connecting
    pub request_body: String,
    /// Payload format
    pub data_format: DataFormat,
    /// Payload format options
    pub data_format_config: DataParserConfig,
    /// Longest wait for the first record of a batch, in milliseconds
    pub max_wait_time: u64,
}

impl Default for WebSocketOriginConfig {
    fn default() -> Self {
        Self {
            resource_url: String::new(),
            headers: HeaderList::default(),
            request_body: String::new(),
            data_format: DataFormat::default(),
            data_format_config: DataParserConfig::default(),
            max_wait_time: 2000,
        }
    }
}

/// Destination options (`conf.*`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketDestinationConfig {
    /// `ws://` or `wss://` endpoint
    pub resource_url: String,
    /// Handshake headers
    pub headers: HeaderList,
}

/// Open a client connection
///
/// `read_timeout` applies to the underlying TCP stream for the lifetime of
/// the socket.
pub fn connect(
    resource_url: &str,
    headers: &[(String, String)],
    read_timeout: Option<Duration>,
) -> Result<Socket, WebSocketError> {
    let invalid = |message: String| WebSocketError::InvalidUrl {
        url: resource_url.to_string(),
        message,
    };
    let url = Url::parse(resource_url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url.host_str().ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;
    let address = format!("{}:{}", host, port);

    let mut request = resource_url.into_client_request()?;
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| WebSocketError::InvalidHeader(name.clone()))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| WebSocketError::InvalidHeader(name.clone()))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let stream = TcpStream::connect(&address).map_err(|source| WebSocketError::Connect {
        address: address.clone(),
        source,
    })?;
    stream
        .set_read_timeout(read_timeout)
        .map_err(|source| WebSocketError::Connect { address, source })?;

    let (socket, response) = tungstenite::client_tls_with_config(request, stream, None, None)
        .map_err(|e| match e {
            tungstenite::HandshakeError::Failure(err) => WebSocketError::Protocol(err),
            tungstenite::HandshakeError::Interrupted(_) => {
                WebSocketError::Protocol(tungstenite::Error::Io(ErrorKind::TimedOut.into()))
            }
        })?;
    log::debug!("websocket handshake with {} answered {}", resource_url, response.status());
    Ok(socket)
}

/// Whether a read failed only because the timeout elapsed
fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::StageConfig;

    #[test]
    fn test_rejects_http_scheme() {
        let err = connect("http://localhost:1/", &[], None).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme 'http'"));
    }

    #[test]
    fn test_origin_defaults() {
        let conf: WebSocketOriginConfig = StageConfig::default()
            .with("conf.resourceUrl", "ws://localhost:9000/feed")
            .bind("conf")
            .unwrap();
        assert_eq!(conf.max_wait_time, 2000);
        assert!(conf.request_body.is_empty());
        assert!(conf.headers.is_empty());
    }

    #[test]
    fn test_timeout_detection() {
        let timeout = tungstenite::Error::Io(ErrorKind::WouldBlock.into());
        assert!(is_timeout(&timeout));
        assert!(!is_timeout(&tungstenite::Error::ConnectionClosed));
    }
}
