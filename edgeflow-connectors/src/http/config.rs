//! HTTP stage options
//!
//! All HTTP stages share the `conf.client.*` block ([`ClientConfig`]); the
//! origin, processor and destination add their own options on top.

use serde::Deserialize;

use edgeflow_core::{DataFormat, DataParserConfig, HeaderList};

/// Authentication strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    /// No credentials
    #[default]
    None,
    /// Pre-emptive Basic
    Basic,
    /// Digest challenge/response
    Digest,
    /// Basic, sent with every request
    Universal,
    /// OAuth 1.0a HMAC-SHA1 signatures
    Oauth,
}

/// Request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// PATCH
    Patch,
    /// Method taken from `methodExpression`
    Expression,
}

impl HttpMethod {
    /// Wire name; `None` for [`HttpMethod::Expression`]
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            HttpMethod::Get => Some("GET"),
            HttpMethod::Post => Some("POST"),
            HttpMethod::Put => Some("PUT"),
            HttpMethod::Delete => Some("DELETE"),
            HttpMethod::Head => Some("HEAD"),
            HttpMethod::Patch => Some("PATCH"),
            HttpMethod::Expression => None,
        }
    }
}

/// Request body compression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpCompression {
    /// Body sent as is
    #[default]
    None,
    /// Body gzipped, `Content-Encoding: gzip`
    Gzip,
}

/// Origin dispatch mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpMode {
    /// One request per `produce`, errors are reported and swallowed
    #[default]
    Polling,
    /// Long-lived response read across `produce` calls
    Streaming,
    /// Not supported
    Batch,
}

/// Where the processor puts response headers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderOutputLocation {
    /// Record header attributes, prefixed
    #[default]
    Header,
    /// Map field at `headerOutputField`
    Field,
    /// Dropped
    None,
}

/// Basic/Digest credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasicAuthConfig {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

/// OAuth 1.0a credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuthConfig {
    /// Consumer key
    pub consumer_key: String,
    /// Consumer secret
    pub consumer_secret: String,
    /// Access token, may be empty
    pub token: String,
    /// Access token secret, may be empty
    pub token_secret: String,
}

/// Trust store options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    /// Use the trust store below instead of the built-in roots
    pub tls_enabled: bool,
    /// PEM bundle of trusted certificates
    pub trust_store_file_path: String,
}

/// Shared HTTP client options (`conf.client.*`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Authentication strategy
    pub auth_type: AuthType,
    /// Credentials for Basic, Digest and Universal
    pub basic_auth: BasicAuthConfig,
    /// Credentials for OAuth
    pub oauth: OAuthConfig,
    /// Trust store
    pub tls_config: TlsConfig,
    /// Request body compression
    pub http_compression: HttpCompression,
    /// Connect timeout, 0 disables it
    pub connect_timeout_millis: u64,
    /// Read timeout, 0 disables it
    pub read_timeout_millis: u64,
}

/// Batch limits (`conf.basic.*`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BasicConfig {
    /// Upper bound of records per streaming batch
    pub max_batch_size: usize,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self { max_batch_size: 1000 }
    }
}

/// HTTP client origin options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOriginConfig {
    /// Resource to fetch
    pub resource_url: String,
    /// Request method
    #[serde(default)]
    pub http_method: HttpMethod,
    /// Request headers
    #[serde(default)]
    pub headers: HeaderList,
    /// Optional request body
    #[serde(default)]
    pub request_body: String,
    /// Dispatch mode
    #[serde(default)]
    pub http_mode: HttpMode,
    /// Pause before each polling request, in milliseconds
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    /// Payload format
    #[serde(default)]
    pub data_format: DataFormat,
    /// Payload format options
    #[serde(default)]
    pub data_format_config: DataParserConfig,
    /// Batch limits
    #[serde(default)]
    pub basic: BasicConfig,
    /// Client options
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_polling_interval() -> u64 {
    5000
}

/// HTTP processor options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProcessorConfig {
    /// Request method
    #[serde(default)]
    pub http_method: HttpMethod,
    /// Method expression used with [`HttpMethod::Expression`]
    #[serde(default)]
    pub method_expression: String,
    /// URL template, evaluated per record
    pub resource_url: String,
    /// Header templates
    #[serde(default)]
    pub headers: HeaderList,
    /// Body template, evaluated per record
    #[serde(default)]
    pub request_body: String,
    /// Content-Type template
    #[serde(default = "default_content_type")]
    pub default_request_content_type: String,
    /// Field receiving the parsed response
    pub output_field: String,
    /// Where response headers go
    #[serde(default)]
    pub header_output_location: HeaderOutputLocation,
    /// Prefix for header attributes
    #[serde(default)]
    pub header_attribute_prefix: String,
    /// Field receiving the response headers
    #[serde(default)]
    pub header_output_field: String,
    /// Response format
    #[serde(default)]
    pub data_format: DataFormat,
    /// Response format options
    #[serde(default)]
    pub data_format_config: DataParserConfig,
    /// Client options
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

/// HTTP destination options (`conf.*`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpDestinationConfig {
    /// URL template, evaluated per record
    pub resource_url: String,
    /// Request method
    #[serde(default = "default_destination_method")]
    pub http_method: HttpMethod,
    /// Header templates
    #[serde(default)]
    pub headers: HeaderList,
    /// Send the whole batch as newline-delimited JSON in one request
    #[serde(default)]
    pub one_request_per_batch: bool,
    /// Client options
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_destination_method() -> HttpMethod {
    HttpMethod::Post
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::StageConfig;

    #[test]
    fn test_origin_defaults() {
        let conf: HttpOriginConfig = StageConfig::default()
            .with("conf.resourceUrl", "http://localhost/stream")
            .bind("conf")
            .unwrap();
        assert_eq!(conf.http_method, HttpMethod::Get);
        assert_eq!(conf.http_mode, HttpMode::Polling);
        assert_eq!(conf.polling_interval, 5000);
        assert_eq!(conf.basic.max_batch_size, 1000);
        assert_eq!(conf.client.auth_type, AuthType::None);
        assert!(conf.headers.is_empty());
    }

    #[test]
    fn test_client_options() {
        let conf: ClientConfig = StageConfig::default()
            .with("conf.client.authType", "DIGEST")
            .with("conf.client.basicAuth.username", "user")
            .with("conf.client.httpCompression", "GZIP")
            .with("conf.client.readTimeoutMillis", 2500.0)
            .bind("conf.client")
            .unwrap();
        assert_eq!(conf.auth_type, AuthType::Digest);
        assert_eq!(conf.basic_auth.username, "user");
        assert_eq!(conf.http_compression, HttpCompression::Gzip);
        assert_eq!(conf.read_timeout_millis, 2500);
    }

    #[test]
    fn test_processor_requires_output_field() {
        let err = StageConfig::default()
            .with("conf.resourceUrl", "${url}")
            .bind::<HttpProcessorConfig>("conf")
            .unwrap_err();
        assert!(err.to_string().contains("outputField"));
    }
}
