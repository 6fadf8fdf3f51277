//! Lazily consumed object bodies
//!
//! Both serial and concurrent reads hand back a [`ByteStream`]. Dropping the
//! stream closes it: a serial GET releases its connection, a multi-range
//! fetch aborts its workers.

use crate::s3::error::{Error, Result};
use crate::s3::transport::ResponseBody;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use http_body_util::BodyExt;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Ordered stream of object bytes
pub struct ByteStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl ByteStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Stream the data frames of a response body
    pub fn from_body(body: ResponseBody) -> Self {
        Self::new(body.into_data_stream().map(|chunk| chunk.map_err(Error::Body)))
    }

    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Read the whole object into memory
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read and discard the whole object, returning its length
    pub async fn drain(mut self) -> Result<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.inner.next().await {
            total += chunk?.len() as u64;
        }
        Ok(total)
    }

    /// Stop reading early and release the underlying resources
    pub fn close(self) {}
}

impl Stream for ByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[tokio::test]
    async fn test_collect_concatenates_chunks() {
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let stream = ByteStream::new(futures::stream::iter(chunks));
        assert_eq!(stream.collect().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_drain_counts_and_surfaces_errors() {
        let body = Full::new(Bytes::from(vec![7u8; 4096]))
            .map_err(|never| match never {})
            .boxed_unsync();
        assert_eq!(ByteStream::from_body(body).drain().await.unwrap(), 4096);

        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(Error::Fetch(crate::s3::FetchError::Incomplete {
                index: 0,
                expected: 10,
                received: 7,
            })),
        ]);
        assert!(ByteStream::new(failing).drain().await.is_err());
    }

    #[tokio::test]
    async fn test_empty() {
        assert!(ByteStream::empty().collect().await.unwrap().is_empty());
    }
}
