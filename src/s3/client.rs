//! Root client object
//!
//! A [`Client`] owns the one shared HTTP transport, the credentials and the
//! addressing options. It is constructed explicitly and hands out
//! [`Bucket`] handles that share its connection pool.

use crate::config::Config;
use crate::s3::bucket::Bucket;
use crate::s3::error::Result;
use crate::s3::signer::{Credentials, PayloadSigning};
use crate::s3::transport::HttpTransport;
use crate::s3::types::{Region, Scheme};
use std::borrow::Cow;

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Addressing and logging options shared by every bucket of a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub scheme: Scheme,
    pub path_style: bool,
    /// Log every request and keep raw failure bodies on errors
    pub diagnostics: bool,
    pub payload_signing: PayloadSigning,
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheme: config.endpoint.scheme,
            path_style: config.endpoint.path_style,
            diagnostics: config.diagnostics,
            payload_signing: config.signing.payload,
        }
    }
}

/// Shared entry point for bucket operations
///
/// Clone is cheap - clones share the same connection pool.
#[derive(Clone)]
pub struct Client {
    transport: HttpTransport,
    credentials: Credentials,
    options: ClientOptions,
}

impl Client {
    pub fn new(transport: HttpTransport, credentials: Credentials, options: ClientOptions) -> Self {
        Self {
            transport,
            credentials,
            options,
        }
    }

    /// Build from configuration and environment credentials
    ///
    /// Fails fast with [`crate::s3::CredentialsError`] when no usable
    /// credentials are set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = Credentials::from_env()?;
        let transport = HttpTransport::new(&config.http)?;
        Ok(Self::new(transport, credentials, ClientOptions::from_config(config)))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Handle for bucket `name` in `region`; no request is sent
    pub fn bucket(&self, name: impl Into<String>, region: &Region) -> Bucket {
        Bucket::with_transport(
            name,
            region.clone(),
            self.transport.clone(),
            self.credentials.clone(),
            self.options,
        )
    }
}

/// Encode an S3 key, preserving forward slashes
/// Returns Cow::Borrowed when no encoding is needed
pub(crate) fn encode_s3_key(key: &str) -> Cow<'_, str> {
    let needs_encoding = key
        .bytes()
        .any(|b| !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'));

    if !needs_encoding {
        return Cow::Borrowed(key);
    }

    let mut result = String::with_capacity(key.len() + 32);
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    Cow::Owned(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::types::RegionCatalog;

    fn client(options: ClientOptions) -> Client {
        let transport = HttpTransport::new(&Default::default()).unwrap();
        Client::new(transport, Credentials::new("AKID", "SECRET", None), options)
    }

    #[test]
    fn test_encode_s3_key_no_encoding() {
        let result = encode_s3_key("path/to/random.dat");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "path/to/random.dat");
    }

    #[test]
    fn test_encode_s3_key_with_encoding() {
        let result = encode_s3_key("path/to/file with spaces+1.dat");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces%2B1.dat");
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.endpoint.scheme = Scheme::Http;
        config.endpoint.path_style = true;
        config.diagnostics = true;

        let options = ClientOptions::from_config(&config);
        assert_eq!(options.scheme, Scheme::Http);
        assert!(options.path_style);
        assert!(options.diagnostics);
        assert_eq!(options.payload_signing, PayloadSigning::Unsigned);
    }

    #[test]
    fn test_bucket_handles_share_client_options() {
        let catalog = RegionCatalog::builtin();
        let region = catalog.get("us-west-2").unwrap();
        let bucket = client(ClientOptions::default()).bucket("s3-bench-us-west-2-1", region);

        assert_eq!(bucket.name(), "s3-bench-us-west-2-1");
        assert_eq!(bucket.region().name, "us-west-2");
        assert_eq!(
            bucket.url(&["random.dat"]),
            "https://s3-bench-us-west-2-1.s3-us-west-2.amazonaws.com/random.dat"
        );
    }

    #[test]
    fn test_client_is_clone() {
        let _clone = client(ClientOptions::default()).clone();
    }
}
