//! AWS Signature Version 4 signer for S3 requests
//!
//! Signs an outbound `Request<Bytes>` in place:
//! - Adds `host`, `x-amz-date`, `x-amz-content-sha256` (and
//!   `x-amz-security-token` for temporary credentials)
//! - Writes the `authorization` header last
//! - Leaves method, path, query and body untouched
//!
//! The derived signing key only changes daily and is cached; signatures are
//! computed fresh on every call.

use crate::s3::error::{CredentialsError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use hyper::header::{HeaderValue, AUTHORIZATION, HOST};
use hyper::Request;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers that hop-by-hop infrastructure may rewrite; never signed
const UNSIGNED_HEADERS: &[&str] = &["authorization", "connection", "user-agent", "expect"];

const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";
const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// Static AWS credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Read credentials from the process environment
    ///
    /// Supports both the standard and legacy variable names:
    /// - AWS_ACCESS_KEY_ID / AWS_ACCESS_KEY
    /// - AWS_SECRET_ACCESS_KEY / AWS_SECRET_KEY
    /// - AWS_SESSION_TOKEN / AWS_SECURITY_TOKEN (optional)
    pub fn from_env() -> std::result::Result<Self, CredentialsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through an arbitrary variable lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };

        let access_key_id =
            first(&["AWS_ACCESS_KEY_ID", "AWS_ACCESS_KEY"]).ok_or(CredentialsError::MissingAccessKey)?;
        let secret_access_key = first(&["AWS_SECRET_ACCESS_KEY", "AWS_SECRET_KEY"])
            .ok_or(CredentialsError::MissingSecretKey)?;
        let session_token = first(&["AWS_SESSION_TOKEN", "AWS_SECURITY_TOKEN"]);

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// How non-empty request bodies are hashed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSigning {
    /// `UNSIGNED-PAYLOAD` (skips hashing large uploads)
    #[default]
    Unsigned,
    /// Hex SHA256 of the full body
    Sha256,
}

/// AWS Signature Version 4 signer scoped to one region
pub struct Signer {
    credentials: Credentials,
    region: String,
    service: String,
    payload: PayloadSigning,
    /// Pre-computed "AWS4" + secret_key
    aws4_key: Vec<u8>,
    /// Cached signing key per day: (date_stamp, derived_key)
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl Clone for Signer {
    fn clone(&self) -> Self {
        Self {
            credentials: self.credentials.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
            payload: self.payload,
            aws4_key: self.aws4_key.clone(),
            // Each clone gets its own cache (populated on first use)
            cached_signing_key: Mutex::new(None),
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("credentials", &self.credentials)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("payload", &self.payload)
            .finish()
    }
}

impl Signer {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        let aws4_key = format!("AWS4{}", credentials.secret_access_key).into_bytes();
        Self {
            credentials,
            region: region.into(),
            service: "s3".to_string(),
            payload: PayloadSigning::default(),
            aws4_key,
            cached_signing_key: Mutex::new(None),
        }
    }

    pub fn with_payload_signing(mut self, payload: PayloadSigning) -> Self {
        self.payload = payload;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign a request immediately before it is sent
    pub fn sign(&self, request: &mut Request<Bytes>) -> Result<()> {
        self.sign_at(request, Utc::now())
    }

    /// Sign a request as of `now`
    pub fn sign_at(&self, request: &mut Request<Bytes>, now: DateTime<Utc>) -> Result<()> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        let payload_hash = self.payload_hash(request.body());
        let host = Self::host_header(request);

        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        if let Some(host) = host {
            headers.insert(HOST, HeaderValue::from_str(&host)?);
        }
        headers.insert(X_AMZ_DATE, HeaderValue::from_str(&amz_date)?);
        headers.insert(
            X_AMZ_CONTENT_SHA256,
            HeaderValue::from_str(&payload_hash)?,
        );
        match &self.credentials.session_token {
            Some(token) => {
                headers.insert(X_AMZ_SECURITY_TOKEN, HeaderValue::from_str(token)?);
            }
            None => {
                headers.remove(X_AMZ_SECURITY_TOKEN);
            }
        }

        let canonical = Self::canonical_headers(request);
        let canonical_headers = Self::create_canonical_headers(&canonical);
        let signed_headers = Self::create_signed_headers(&canonical);
        let canonical_query = Self::create_canonical_query_string(request.uri().query().unwrap_or(""));

        // Path is used as-is: keys are already URI-encoded by the bucket client
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method().as_str(),
            request.uri().path(),
            canonical_query,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        tracing::trace!(canonical_request = %canonical_request, "sigv4 canonical request");

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&date_stamp, &string_to_sign);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);

        Ok(())
    }

    fn payload_hash(&self, body: &Bytes) -> String {
        if body.is_empty() {
            return EMPTY_SHA256.to_string();
        }
        match self.payload {
            PayloadSigning::Unsigned => UNSIGNED_PAYLOAD.to_string(),
            PayloadSigning::Sha256 => hex::encode(Sha256::digest(body)),
        }
    }

    /// Host header value from the request URI, default ports stripped
    fn host_header(request: &Request<Bytes>) -> Option<String> {
        let uri = request.uri();
        let host = uri.host()?;
        let default_port = match uri.scheme_str() {
            Some("http") => 80,
            _ => 443,
        };
        Some(match uri.port_u16() {
            Some(port) if port != default_port => format!("{}:{}", host, port),
            _ => host.to_string(),
        })
    }

    /// Lowercase header name -> normalized value, repeated headers comma-joined
    fn canonical_headers(request: &Request<Bytes>) -> BTreeMap<String, String> {
        let mut canonical: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in request.headers() {
            let name = name.as_str();
            if UNSIGNED_HEADERS.contains(&name) {
                continue;
            }
            let value = Self::normalize_value(&String::from_utf8_lossy(value.as_bytes()));
            canonical
                .entry(name.to_string())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        canonical
    }

    /// Trim and collapse runs of inner whitespace to a single space
    fn normalize_value(value: &str) -> String {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn create_canonical_headers(headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v);
            result.push('\n');
        }
        result
    }

    fn create_signed_headers(headers: &BTreeMap<String, String>) -> String {
        headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Create canonical query string (decoded, re-encoded, sorted by name then value)
    fn create_canonical_query_string(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let mut params: Vec<(String, String)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
                let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
                (Self::uri_encode(&key, true), Self::uri_encode(&value, true))
            })
            .collect();

        params.sort_unstable();

        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn calculate_signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let signing_key = {
            let mut cache = self
                .cached_signing_key
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match cache.as_ref() {
                Some((cached_date, cached_key)) if cached_date == date_stamp => *cached_key,
                _ => {
                    let key = self.derive_signing_key(date_stamp);
                    *cache = Some((date_stamp.to_string(), key));
                    key
                }
            }
        };

        hex::encode(Self::hmac_sha256(&signing_key, string_to_sign.as_bytes()))
    }

    /// Derive signing key from date stamp (4 chained HMAC operations)
    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_date = Self::hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
        let k_region = Self::hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = Self::hmac_sha256(&k_region, self.service.as_bytes());
        Self::hmac_sha256(&k_service, b"aws4_request")
    }

    fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
        // HMAC accepts keys of any length, so new_from_slice cannot fail here
        let mut mac = match HmacSha256::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC can take key of any size"),
        };
        mac.update(msg);
        let result = mac.finalize().into_bytes();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    /// URI encode a string (RFC 3986) using hex lookup table
    pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(byte as char);
                }
                b'/' if !encode_slash => {
                    result.push('/');
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        result
    }
}
