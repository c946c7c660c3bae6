//! HTTP Stages - RESTful Integration for Edge Pipelines
//!
//! ## Overview
//!
//! Three stages share one transport ([`HttpClient`]) and one option block
//! (`conf.client.*`):
//!
//! | Stage | Role |
//! |-------|------|
//! | [`HttpClientOrigin`] | Fetches a resource and parses the body into records |
//! | [`HttpProcessor`] | Enriches each record with the response of a per-record request |
//! | [`HttpClientDestination`] | Posts records to an endpoint |
//!
//! ## Origin Dispatch
//!
//! ```text
//!            ┌──────────── POLLING ─────────────┐
//! produce ──▶│ sleep(pollingInterval)           │── errors → report_error, offset "http"
//!            │ request → drain whole body       │
//!            ├──────────── STREAMING ───────────┤
//!            │ resume open body or request      │── errors → Err(...)
//!            │ drain ≤ basic.maxBatchSize       │
//!            ├──────────── BATCH ───────────────┤
//!            │ "Batch Mode is not supported"    │── always Err(...)
//!            └──────────────────────────────────┘
//! ```
//!
//! ## Authentication
//!
//! `NONE`, `BASIC`, `UNIVERSAL` (pre-emptive Basic), `DIGEST` (answers the
//! `401` challenge and caches it) and `OAUTH` (OAuth 1.0a, HMAC-SHA1).
//! A PEM trust store replaces the built-in roots when
//! `tlsConfig.tlsEnabled` is set.
//!
//! ## Compression
//!
//! `httpCompression = GZIP` compresses the processor's request body only.
//! The origin never compresses; response bodies are decoded by the
//! transport.

pub mod auth;
pub mod client;
pub mod config;
mod destination;
mod origin;
mod processor;

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

pub use client::{HttpClient, HttpRequest, HttpResponse};
pub use config::{
    AuthType, ClientConfig, HeaderOutputLocation, HttpCompression, HttpDestinationConfig, HttpMethod, HttpMode,
    HttpOriginConfig, HttpProcessorConfig,
};
pub use destination::HttpClientDestination;
pub use origin::{HttpClientOrigin, HTTP_OFFSET};
pub use processor::HttpProcessor;

/// HTTP client origin
pub const HTTP_CLIENT_ORIGIN: &str = "edgeflow_stage_origin_http_HttpClientOrigin";
/// HTTP processor
pub const HTTP_PROCESSOR: &str = "edgeflow_stage_processor_http_HttpProcessor";
/// HTTP client destination
pub const HTTP_CLIENT_DESTINATION: &str = "edgeflow_stage_destination_http_HttpClientDestination";

/// HTTP transport errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection, DNS or protocol failure
    #[error("{0}")]
    Transport(String),

    /// URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Credentials could not be applied
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Trust store could not be loaded
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Local I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Gzip a request body
pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}
