//! Error taxonomy for signed S3 requests
//!
//! Every failure surfaced by the bucket client and the range fetcher lands in
//! [`Error`]. Non-2xx responses become [`BucketError`] so callers can branch on
//! the exact status code (e.g. 409 during bucket creation).

use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for all S3 operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Bucket(#[from] BucketError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A serial read ended with a different byte count than expected
    #[error("GET {url} returned {received} of {expected} bytes")]
    ShortRead {
        url: String,
        expected: u64,
        received: u64,
    },

    /// Network failure from the HTTP client (DNS, refused connection, timeout)
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("response body error: {0}")]
    Body(#[from] hyper::Error),

    #[error("request build error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] hyper::header::InvalidHeaderValue),

    #[error("TLS setup error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl Error {
    /// HTTP status behind this error, looking through range-fetch wrappers
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Bucket(e) => Some(e.status),
            Error::Fetch(FetchError::LengthRequest { source, .. })
            | Error::Fetch(FetchError::Range { source, .. }) => source.status(),
            _ => None,
        }
    }
}

/// No usable signing credentials in the environment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("no access key found (set AWS_ACCESS_KEY_ID or AWS_ACCESS_KEY)")]
    MissingAccessKey,

    #[error("no secret key found (set AWS_SECRET_ACCESS_KEY or AWS_SECRET_KEY)")]
    MissingSecretKey,
}

/// A bucket operation answered with a status outside [200, 300)
#[derive(Error, Debug)]
#[error("{method} {url} failed with status {status}{}", describe_code(.code))]
pub struct BucketError {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    /// `<Code>` from the S3 XML error document, when one was returned
    pub code: Option<String>,
    /// Raw response body, kept only when diagnostics are enabled
    pub body: Option<String>,
}

fn describe_code(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" ({})", code),
        None => String::new(),
    }
}

impl BucketError {
    /// Build from a failed response body
    pub fn from_body(
        method: Method,
        url: impl Into<String>,
        status: StatusCode,
        body: &[u8],
        keep_body: bool,
    ) -> Self {
        Self {
            method,
            url: url.into(),
            status,
            code: parse_error_code(body),
            body: keep_body.then(|| String::from_utf8_lossy(body).into_owned()),
        }
    }
}

/// Concurrent range fetch failures
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("could not determine length of {url}: {reason}")]
    UnknownLength { url: String, reason: String },

    #[error("length request for {url} failed: {source}")]
    LengthRequest {
        url: String,
        #[source]
        source: Box<Error>,
    },

    #[error("range {index} (bytes {start}-{end}) failed: {source}")]
    Range {
        index: usize,
        start: u64,
        end: u64,
        #[source]
        source: Box<Error>,
    },

    /// A 206 whose `Content-Range` does not match the requested window
    #[error("range {index} asked for {requested}, store answered {served}")]
    WrongWindow {
        index: usize,
        requested: String,
        served: String,
    },

    #[error("range {index} ended after {received} of {expected} bytes")]
    Incomplete {
        index: usize,
        expected: u64,
        received: u64,
    },

    #[error("range {index} worker panicked")]
    WorkerPanicked { index: usize },
}

/// Extract `<Code>` from an S3 error document
///
/// Returns `None` for empty or non-XML bodies (HEAD responses, proxies
/// answering with HTML, etc.).
pub fn parse_error_code(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }

    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut current_text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Code" && !current_text.is_empty() {
                    return Some(current_text);
                }
                current_text.clear();
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_code() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchKey</Code>
  <Message>The specified key does not exist.</Message>
  <Key>random.dat</Key>
</Error>"#;
        assert_eq!(parse_error_code(xml).as_deref(), Some("NoSuchKey"));
    }

    #[test]
    fn test_parse_error_code_garbage() {
        assert_eq!(parse_error_code(b""), None);
        assert_eq!(parse_error_code(b"<html><body>502</body></html>"), None);
    }

    #[test]
    fn test_bucket_error_display() {
        let err = BucketError::from_body(
            Method::PUT,
            "https://b.s3.amazonaws.com/",
            StatusCode::CONFLICT,
            b"<Error><Code>BucketAlreadyOwnedByYou</Code></Error>",
            false,
        );
        assert_eq!(
            err.to_string(),
            "PUT https://b.s3.amazonaws.com/ failed with status 409 Conflict (BucketAlreadyOwnedByYou)"
        );
        assert!(err.body.is_none());
    }

    #[test]
    fn test_status_through_fetch_error() {
        let inner = Error::Bucket(BucketError::from_body(
            Method::GET,
            "https://b.e/k",
            StatusCode::FORBIDDEN,
            b"",
            true,
        ));
        let err = Error::Fetch(FetchError::Range {
            index: 2,
            start: 10,
            end: 19,
            source: Box::new(inner),
        });
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }
}
