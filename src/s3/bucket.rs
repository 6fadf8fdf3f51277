//! Operations scoped to one bucket in one region
//!
//! Every call builds a fresh request, signs it through the bucket's
//! [`SignedTransport`], and classifies the response: a status in [200, 300)
//! is success, anything else becomes a [`BucketError`] carrying the status.

use crate::s3::client::{encode_s3_key, ClientOptions};
use crate::s3::error::{BucketError, Error, Result};
use crate::s3::fetch::RangeFetcher;
use crate::s3::signer::{Credentials, Signer};
use crate::s3::stream::ByteStream;
use crate::s3::transport::{HttpTransport, ResponseBody, SignedTransport, Transport};
use crate::s3::types::{Acl, CreateOutcome, Region};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, warn};

const X_AMZ_ACL: &str = "x-amz-acl";
const OCTET_STREAM: &str = "application/octet-stream";

/// One named bucket in one region
///
/// Holds no mutable state: the transport is shared and the name/region are
/// fixed at construction, so a `Bucket` may be used from several tasks.
pub struct Bucket<T = HttpTransport> {
    name: String,
    region: Region,
    transport: Arc<SignedTransport<T>>,
    options: ClientOptions,
}

impl<T> Bucket<T>
where
    T: Transport + 'static,
{
    /// Build a bucket over an arbitrary transport; requests are signed for
    /// `region.name`
    pub fn with_transport(
        name: impl Into<String>,
        region: Region,
        transport: T,
        credentials: Credentials,
        options: ClientOptions,
    ) -> Self {
        let signer =
            Signer::new(credentials, region.name.clone()).with_payload_signing(options.payload_signing);
        Self {
            name: name.into(),
            region,
            transport: Arc::new(SignedTransport::new(transport, signer)),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// URL of `paths` joined with `/` inside this bucket
    ///
    /// Each segment is percent-encoded with slashes preserved; empty segments
    /// are skipped, so `url(&[])` is the bucket root.
    pub fn url(&self, paths: &[&str]) -> String {
        let key = paths
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(encode_s3_key)
            .collect::<Vec<_>>()
            .join("/");

        let scheme = self.options.scheme.as_str();
        let endpoint = self.region.endpoint.trim_end_matches('/');

        if !self.options.path_style {
            return format!("{}://{}.{}/{}", scheme, self.name, endpoint, key);
        }
        if key.is_empty() {
            format!("{}://{}/{}", scheme, endpoint, self.name)
        } else {
            format!("{}://{}/{}/{}", scheme, endpoint, self.name, key)
        }
    }

    /// Build, sign and send one request against `path`, classifying the status
    ///
    /// On success the response is returned with its body unread.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response<ResponseBody>> {
        let url = self.url(&[path]);
        let mut request = Request::builder().method(method.clone()).uri(&url).body(body)?;
        request.headers_mut().extend(headers);

        let response = self.transport.roundtrip(request).await?;
        let status = response.status();

        if self.options.diagnostics {
            info!(method = %method, url = %url, status = status.as_u16(), "request");
        } else {
            debug!(method = %method, url = %url, status = status.as_u16(), "request");
        }

        if status.is_success() {
            return Ok(response);
        }
        Err(reject(method, &url, response, self.options.diagnostics).await)
    }

    /// `execute`, then drain the body so the connection goes back to the pool
    async fn send(&self, method: Method, path: &str, headers: HeaderMap, body: Bytes) -> Result<()> {
        let response = self.execute(method, path, headers, body).await?;
        response.into_body().collect().await?;
        Ok(())
    }

    /// Create the bucket, declaring the region's location constraint if any
    ///
    /// A 409 is treated as success: the bucket exists and is usable. It is
    /// reported as [`CreateOutcome::AlreadyExists`] so callers can still tell
    /// the cases apart.
    pub async fn create(&self) -> Result<CreateOutcome> {
        let mut headers = HeaderMap::new();
        let body = match &self.region.location_constraint {
            Some(constraint) => {
                let xml = create_bucket_configuration(constraint);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
                headers.insert(CONTENT_LENGTH, HeaderValue::from(xml.len()));
                Bytes::from(xml)
            }
            None => Bytes::new(),
        };

        match self.send(Method::PUT, "", headers, body).await {
            Ok(()) => {
                debug!(bucket = %self.name, region = %self.region.name, "bucket created");
                Ok(CreateOutcome::Created)
            }
            Err(Error::Bucket(err)) if err.status == StatusCode::CONFLICT => {
                warn!(
                    bucket = %self.name,
                    region = %self.region.name,
                    code = err.code.as_deref().unwrap_or("-"),
                    "bucket already exists, reusing it"
                );
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    /// Upload `body` to `key` with a canned ACL
    pub async fn put(&self, key: &str, body: Bytes, acl: Acl) -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(X_AMZ_ACL), HeaderValue::from_static(acl.as_str()));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));

        self.send(Method::PUT, key, headers, body).await
    }

    /// Serial GET; the returned stream must be consumed or dropped
    pub async fn get(&self, key: &str) -> Result<ByteStream> {
        let response = self.execute(Method::GET, key, HeaderMap::new(), Bytes::new()).await?;
        Ok(ByteStream::from_body(response.into_body()))
    }

    /// GET through `concurrency` parallel ranged requests
    pub async fn multi_get(&self, key: &str, concurrency: usize) -> Result<ByteStream> {
        RangeFetcher::new(self.transport.clone(), self.url(&[key]), concurrency)
            .with_diagnostics(self.options.diagnostics)
            .fetch()
            .await
    }

    /// Delete `keys` in order, stopping at the first failure
    pub async fn delete(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.send(Method::DELETE, key, HeaderMap::new(), Bytes::new()).await?;
            debug!(bucket = %self.name, key = %key, "object deleted");
        }
        Ok(())
    }

    /// Delete the (empty) bucket itself
    pub async fn delete_bucket(&self) -> Result<()> {
        self.send(Method::DELETE, "", HeaderMap::new(), Bytes::new()).await?;
        debug!(bucket = %self.name, region = %self.region.name, "bucket deleted");
        Ok(())
    }
}

/// Turn a non-2xx response into a [`BucketError`], reading its body
pub(crate) async fn reject(
    method: Method,
    url: &str,
    response: Response<ResponseBody>,
    diagnostics: bool,
) -> Error {
    let status = response.status();
    let body = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return Error::Body(e),
    };

    if diagnostics {
        warn!(
            method = %method,
            url = %url,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "request failed"
        );
    }

    Error::Bucket(BucketError::from_body(method, url, status, &body, diagnostics))
}

fn create_bucket_configuration(constraint: &str) -> String {
    let mut xml = String::with_capacity(160 + constraint.len());
    xml.push_str(r#"<CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
    xml.push_str("<LocationConstraint>");
    xml_escape_into(&mut xml, constraint);
    xml.push_str("</LocationConstraint></CreateBucketConfiguration>");
    xml
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}
