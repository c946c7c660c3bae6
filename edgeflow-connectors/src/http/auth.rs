//! Request authentication strategies
//!
//! | Strategy | When the header is added |
//! |----------|--------------------------|
//! | Basic / Universal | Every request, pre-emptively |
//! | Digest | After the first `401` challenge; the challenge is cached and reused with an increasing nonce count |
//! | OAuth | Every request, signed with HMAC-SHA1 over method, URL and parameters |

use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use url::Url;

use super::config::{AuthType, ClientConfig};
use super::HttpError;

/// RFC 3986 unreserved characters pass through, everything else is encoded
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

type HmacSha1 = Hmac<Sha1>;

fn encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

fn nonce(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `Authorization` value for Basic credentials
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// Parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection space
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Opaque value echoed back verbatim
    pub opaque: Option<String>,
    /// Offered qop values
    pub qop: Option<String>,
    /// Hash algorithm, only MD5 is supported
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a challenge header; `None` when it is not a Digest challenge
    pub fn parse(header: &str) -> Option<Self> {
        let rest = header.trim().strip_prefix("Digest")?.trim_start();
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop = None;
        let mut algorithm = None;
        for (key, value) in split_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "qop" => qop = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm.unwrap_or_default(),
            nonce: nonce?,
            opaque,
            qop,
            algorithm,
        })
    }

    fn supports_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .is_some_and(|qop| qop.split(',').any(|q| q.trim() == "auth"))
    }
}

/// Split `k1="v1", k2=v2` into pairs, honouring quoted commas
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        pairs.push((key, value));
    }
    pairs
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", Md5::digest(input.as_bytes()))
}

/// Compute the Digest `response` value
pub fn digest_response(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    nc: u32,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    if challenge.supports_auth_qop() {
        md5_hex(&format!(
            "{}:{}:{:08x}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ))
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    }
}

#[derive(Debug, Default)]
struct DigestState {
    challenge: Option<DigestChallenge>,
    nonce_count: u32,
}

/// OAuth 1.0a HMAC-SHA1 signature of a request
///
/// `oauth_params` must not contain `oauth_signature`. Query parameters of
/// `url` are folded into the signature base string.
pub fn oauth1_signature(
    method: &str,
    url: &Url,
    oauth_params: &[(String, String)],
    consumer_secret: &str,
    token_secret: &str,
) -> Result<String, HttpError> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
        .collect();
    params.sort();
    let normalized = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base_url.push_str(&format!(":{}", port));
    }
    base_url.push_str(url.path());

    let base = format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(&base_url),
        encode(&normalized)
    );
    let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
    let mut mac = HmacSha1::new_from_slice(key.as_bytes())
        .map_err(|e| HttpError::Auth(e.to_string()))?;
    mac.update(base.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Authentication strategy bound to its credentials
#[derive(Debug)]
pub enum Authenticator {
    /// No credentials
    None,
    /// Pre-emptive Basic credentials
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Digest credentials with the cached challenge
    Digest {
        /// User name
        username: String,
        /// Password
        password: String,
        /// Last challenge and nonce count
        state: Mutex<DigestStateHandle>,
    },
    /// OAuth 1.0a credentials
    OAuth1 {
        /// Consumer key
        consumer_key: String,
        /// Consumer secret
        consumer_secret: String,
        /// Access token
        token: String,
        /// Access token secret
        token_secret: String,
    },
}

/// Opaque Digest state
#[derive(Debug, Default)]
pub struct DigestStateHandle(DigestState);

impl Authenticator {
    /// Strategy for the configured auth type
    pub fn from_config(config: &ClientConfig) -> Self {
        let basic = &config.basic_auth;
        match config.auth_type {
            AuthType::None => Authenticator::None,
            AuthType::Basic | AuthType::Universal => Authenticator::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            },
            AuthType::Digest => Authenticator::Digest {
                username: basic.username.clone(),
                password: basic.password.clone(),
                state: Mutex::new(DigestStateHandle::default()),
            },
            AuthType::Oauth => Authenticator::OAuth1 {
                consumer_key: config.oauth.consumer_key.clone(),
                consumer_secret: config.oauth.consumer_secret.clone(),
                token: config.oauth.token.clone(),
                token_secret: config.oauth.token_secret.clone(),
            },
        }
    }

    /// `Authorization` value to send up front, if any
    pub fn authorization(&self, method: &str, url: &str) -> Result<Option<String>, HttpError> {
        match self {
            Authenticator::None => Ok(None),
            Authenticator::Basic { username, password } => Ok(Some(basic_header(username, password))),
            Authenticator::Digest {
                username,
                password,
                state,
            } => {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                match state.0.challenge.clone() {
                    Some(challenge) => {
                        state.0.nonce_count += 1;
                        let nc = state.0.nonce_count;
                        Ok(Some(digest_header(&challenge, username, password, method, url, nc)?))
                    }
                    None => Ok(None),
                }
            }
            Authenticator::OAuth1 {
                consumer_key,
                consumer_secret,
                token,
                token_secret,
            } => {
                let url = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
                let mut params = vec![
                    ("oauth_consumer_key".to_string(), consumer_key.clone()),
                    ("oauth_nonce".to_string(), nonce(32)),
                    ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
                    ("oauth_timestamp".to_string(), chrono::Utc::now().timestamp().to_string()),
                    ("oauth_version".to_string(), "1.0".to_string()),
                ];
                if !token.is_empty() {
                    params.push(("oauth_token".to_string(), token.clone()));
                }
                let signature = oauth1_signature(method, &url, &params, consumer_secret, token_secret)?;
                params.push(("oauth_signature".to_string(), signature));
                let header = params
                    .iter()
                    .map(|(k, v)| format!("{}=\"{}\"", encode(k), encode(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(Some(format!("OAuth {}", header)))
            }
        }
    }

    /// Absorb a `401` challenge; returns the header for the retry
    pub fn answer_challenge(
        &self,
        method: &str,
        url: &str,
        www_authenticate: &str,
    ) -> Result<Option<String>, HttpError> {
        let Authenticator::Digest {
            username,
            password,
            state,
        } = self
        else {
            return Ok(None);
        };
        let Some(challenge) = DigestChallenge::parse(www_authenticate) else {
            return Ok(None);
        };
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.0 = DigestState {
            challenge: Some(challenge.clone()),
            nonce_count: 1,
        };
        Ok(Some(digest_header(&challenge, username, password, method, url, 1)?))
    }
}

fn digest_header(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    url: &str,
    nc: u32,
) -> Result<String, HttpError> {
    let parsed = Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
    let uri = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };
    let cnonce = nonce(16);
    let response = digest_response(challenge, username, password, method, &uri, nc, &cnonce);

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, response
    );
    if challenge.supports_auth_qop() {
        header.push_str(&format!(", qop=auth, nc={:08x}, cnonce=\"{}\"", nc, cnonce));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    if let Some(algorithm) = &challenge.algorithm {
        header.push_str(&format!(", algorithm={}", algorithm));
    }
    Ok(header)
}
