//! Auth-aware HTTP transport on top of `ureq`

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use super::auth::Authenticator;
use super::config::ClientConfig;
use super::HttpError;

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method name, e.g. `GET`
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Headers in the order they are sent
    pub headers: Vec<(String, String)>,
    /// Body; `None` sends no body at all
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Request without headers or body
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response with a streaming body
pub struct HttpResponse {
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    body: Box<dyn Read + Send + Sync>,
}

impl HttpResponse {
    fn from_ureq(response: ureq::Response) -> Self {
        let mut headers = Vec::new();
        for name in response.headers_names() {
            for value in response.all(&name) {
                headers.push((name.clone(), value.to_string()));
            }
        }
        Self {
            status: response.status(),
            status_text: response.status_text().to_string(),
            headers,
            body: response.into_reader(),
        }
    }

    /// Numeric status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status line such as `500 Internal Server Error`
    pub fn status_line(&self) -> String {
        format!("{} {}", self.status, self.status_text)
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response headers in arrival order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Take the body reader
    pub fn into_body(self) -> Box<dyn Read + Send + Sync> {
        self.body
    }

    /// Read the whole body as text
    pub fn into_string(mut self) -> Result<String, HttpError> {
        let mut bytes = Vec::new();
        self.body.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// HTTP client used by every HTTP stage
pub struct HttpClient {
    agent: ureq::Agent,
    auth: Authenticator,
}

impl HttpClient {
    /// Build the client; reads the trust store when TLS is enabled
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        let mut builder = ureq::AgentBuilder::new()
            .user_agent(&format!("EdgeFlow/{}", env!("CARGO_PKG_VERSION")));
        if config.connect_timeout_millis > 0 {
            builder = builder.timeout_connect(Duration::from_millis(config.connect_timeout_millis));
        }
        if config.read_timeout_millis > 0 {
            builder = builder.timeout_read(Duration::from_millis(config.read_timeout_millis));
        }
        if config.tls_config.tls_enabled {
            let tls = load_tls_config(&config.tls_config.trust_store_file_path)?;
            builder = builder.tls_config(Arc::new(tls));
            info!("loaded trust store {}", config.tls_config.trust_store_file_path);
        }
        Ok(Self {
            agent: builder.build(),
            auth: Authenticator::from_config(config),
        })
    }

    /// Execute a request
    ///
    /// Non-2xx statuses come back as responses; only transport failures
    /// are errors. A Digest `401` is answered once before returning.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let authorization = self.auth.authorization(&request.method, &request.url)?;
        let response = self.send(request, authorization)?;
        if response.status() != 401 {
            return Ok(response);
        }
        let Some(challenge) = response.header("WWW-Authenticate").map(str::to_string) else {
            return Ok(response);
        };
        match self.auth.answer_challenge(&request.method, &request.url, &challenge)? {
            Some(authorization) => {
                debug!("answering digest challenge for {}", request.url);
                // drain so the connection can be reused
                let _ = response.into_string();
                self.send(request, Some(authorization))
            }
            None => Ok(response),
        }
    }

    fn send(&self, request: &HttpRequest, authorization: Option<String>) -> Result<HttpResponse, HttpError> {
        debug!("{} {}", request.method, request.url);
        let mut call = self.agent.request(&request.method, &request.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        if let Some(authorization) = authorization {
            call = call.set("Authorization", &authorization);
        }
        let result = match &request.body {
            Some(body) => call.send_bytes(body),
            None => call.call(),
        };
        match result {
            Ok(response) => Ok(HttpResponse::from_ureq(response)),
            Err(ureq::Error::Status(_, response)) => Ok(HttpResponse::from_ureq(response)),
            Err(ureq::Error::Transport(transport)) => Err(HttpError::Transport(transport.to_string())),
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").field("auth", &self.auth).finish_non_exhaustive()
    }
}

fn load_tls_config(path: &str) -> Result<rustls::ClientConfig, HttpError> {
    let pem = std::fs::read(path)?;
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(&pem) {
        let cert = cert.map_err(|e| HttpError::Tls(e.to_string()))?;
        roots.add(cert).map_err(|e| HttpError::Tls(e.to_string()))?;
    }
    if roots.is_empty() {
        return Err(HttpError::Tls(format!("no certificates found in {}", path)));
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::config::TlsConfig;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new("POST", "http://localhost/a")
            .header("Content-Type", "application/json")
            .body(b"{}".to_vec());
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn test_missing_trust_store_fails() {
        let config = ClientConfig {
            tls_config: TlsConfig {
                tls_enabled: true,
                trust_store_file_path: "/nonexistent/ca.pem".into(),
            },
            ..ClientConfig::default()
        };
        assert!(matches!(HttpClient::new(&config), Err(HttpError::Io(_))));
    }

    #[test]
    fn test_trust_store_without_certificates_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not a certificate").unwrap();
        let config = ClientConfig {
            tls_config: TlsConfig {
                tls_enabled: true,
                trust_store_file_path: file.path().to_string_lossy().into_owned(),
            },
            ..ClientConfig::default()
        };
        assert!(matches!(HttpClient::new(&config), Err(HttpError::Tls(_))));
    }
}
