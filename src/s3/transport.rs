//! HTTP transports
//!
//! [`HttpTransport`] is the shared, pooled hyper client. [`SignedTransport`]
//! decorates any [`Transport`] so every request it carries is signed exactly
//! once before delegation.
//!
//! HTTP tuning:
//! - HTTP/1.1 only
//! - Tuned idle pool (1024 idle per host, 90s idle timeout by default)
//! - TCP_NODELAY and TCP keepalive
//! - native-tls (OpenSSL) for TLS

use crate::config::HttpConfig;
use crate::s3::error::Result;
use crate::s3::signer::Signer;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::sync::Arc;
use std::time::Duration;

/// Response body handed back by every transport
pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// A single request/response exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn roundtrip(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn roundtrip(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>> {
        (**self).roundtrip(request).await
    }
}

/// Pooled HTTP(S) client
///
/// Clone is cheap - the underlying hyper client uses Arc internally, so every
/// clone shares one connection pool and is safe for concurrent requests.
#[derive(Clone)]
pub struct HttpTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http.set_keepalive(Some(Duration::from_secs(config.keepalive_secs)));

        let tls = if config.insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()?
        } else {
            TlsConnector::new()?
        };

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .set_host(true)
            .build(https);

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn roundtrip(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>> {
        let response = self.client.request(request.map(Full::new)).await?;
        Ok(response.map(|body| body.boxed_unsync()))
    }
}

/// Signs every request, then hands it to the wrapped transport
///
/// No retries and no response inspection: errors from the inner transport
/// propagate unchanged.
#[derive(Clone)]
pub struct SignedTransport<T> {
    inner: T,
    signer: Arc<Signer>,
}

impl<T: Transport> SignedTransport<T> {
    pub fn new(inner: T, signer: Signer) -> Self {
        Self {
            inner,
            signer: Arc::new(signer),
        }
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }
}

#[async_trait]
impl<T: Transport> Transport for SignedTransport<T> {
    async fn roundtrip(&self, mut request: Request<Bytes>) -> Result<Response<ResponseBody>> {
        self.signer.sign(&mut request)?;
        self.inner.roundtrip(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::signer::Credentials;
    use hyper::header::AUTHORIZATION;
    use hyper::StatusCode;
    use std::sync::Mutex;

    /// Records the requests it sees and answers 200 with an empty body
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Request<Bytes>>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn roundtrip(&self, request: Request<Bytes>) -> Result<Response<ResponseBody>> {
            self.seen.lock().unwrap().push(request);
            let body = Full::new(Bytes::new()).map_err(|never| match never {}).boxed_unsync();
            Ok(Response::builder().status(StatusCode::OK).body(body)?)
        }
    }

    #[tokio::test]
    async fn test_signed_transport_signs_once() {
        let recorder = Arc::new(Recorder::default());
        let signer = Signer::new(Credentials::new("AKID", "SECRET", None), "us-west-2");
        let transport = SignedTransport::new(recorder.clone(), signer);

        let request = Request::builder()
            .method("GET")
            .uri("https://b.s3-us-west-2.amazonaws.com/random.dat")
            .body(Bytes::new())
            .unwrap();
        let response = transport.roundtrip(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let auths: Vec<_> = seen[0].headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(auths.len(), 1);
        let auth = auths[0].to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(auth.contains("/us-west-2/s3/aws4_request"));
        assert_eq!(seen[0].uri().path(), "/random.dat");
    }

    #[test]
    fn test_http_transport_is_clone() {
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let _clone = transport.clone();
    }
}
