//! Concurrent multi-range GET
//!
//! An object is split into N contiguous byte ranges, each fetched by its own
//! worker over a shared signed transport. Workers push chunks into a
//! per-range channel; the consumer drains the channels strictly in ordinal
//! order, so the merged stream matches a serial GET byte for byte no matter
//! which worker finishes first.
//!
//! A supervisor task joins the workers. The first failure aborts the rest and
//! is surfaced on the stream as a terminal error. Dropping the stream aborts
//! the supervisor, which in turn aborts every worker and releases their
//! connections.
//!
//! Stores that ignore `Range` answer the length request with the whole
//! object; that body is streamed as is instead of fanning out.

use crate::s3::bucket::reject;
use crate::s3::error::{Error, FetchError, Result};
use crate::s3::stream::ByteStream;
use crate::s3::transport::{ResponseBody, SignedTransport, Transport};
use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use http_body_util::BodyExt;
use hyper::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use hyper::{Method, Request, StatusCode};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// One worker's share of the object: bytes `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Position of this range in the reassembled output
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Range` header value (inclusive end)
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

/// Split `[0, length)` into at most `workers` contiguous ranges
///
/// Ranges are near-equal, the last one absorbs the remainder. No range is
/// empty: fewer ranges than workers are produced for tiny objects, and an
/// empty object yields none.
pub fn partition(length: u64, workers: usize) -> Vec<ByteRange> {
    if length == 0 {
        return Vec::new();
    }

    let count = (workers.max(1) as u64).min(length);
    let size = length / count;

    (0..count)
        .map(|i| {
            let start = i * size;
            let end = if i + 1 == count { length } else { start + size };
            ByteRange {
                index: i as usize,
                start,
                end,
            }
        })
        .collect()
}

/// Parsed `Content-Range` value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive `first-last` window; `None` for the unsatisfied `*` form
    pub window: Option<(u64, u64)>,
    /// Complete length; `None` when the store sent `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes 0-0/1234`, `bytes */1234` or `bytes 0-0/*`
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (window, total) = rest.rsplit_once('/')?;

        let window = match window.trim() {
            "*" => None,
            window => {
                let (first, last) = window.split_once('-')?;
                let first: u64 = first.trim().parse().ok()?;
                let last: u64 = last.trim().parse().ok()?;
                if last < first {
                    return None;
                }
                Some((first, last))
            }
        };

        let total = match total.trim() {
            "*" => None,
            total => Some(total.parse().ok()?),
        };

        Some(Self { window, total })
    }

    /// The value a store must send for `range` of an object of `total` bytes
    pub fn expected(range: &ByteRange, total: u64) -> Self {
        Self {
            window: Some((range.start, range.end.saturating_sub(1))),
            total: Some(total),
        }
    }
}

/// Total object length from a `Content-Range` value
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    ContentRange::parse(value)?.total
}

fn header_str(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn log_request(diagnostics: bool, url: &str, range: &str, status: StatusCode) {
    if diagnostics {
        info!(method = "GET", url = %url, range = %range, status = status.as_u16(), "request");
    } else {
        debug!(method = "GET", url = %url, range = %range, status = status.as_u16(), "request");
    }
}

/// What the one-byte length request found out
enum Extent {
    /// The store honours ranges; total length of the object
    Ranged(u64),
    /// The store ignored the range and sent the whole object
    Whole { length: u64, body: ResponseBody },
}

impl Extent {
    fn length(&self) -> u64 {
        match self {
            Extent::Ranged(length) | Extent::Whole { length, .. } => *length,
        }
    }
}

/// Fetches one object through N parallel ranged GETs
pub struct RangeFetcher<T> {
    transport: Arc<SignedTransport<T>>,
    url: Arc<str>,
    concurrency: usize,
    diagnostics: bool,
}

impl<T> RangeFetcher<T>
where
    T: Transport + 'static,
{
    pub fn new(transport: Arc<SignedTransport<T>>, url: impl Into<String>, concurrency: usize) -> Self {
        let url: String = url.into();
        Self {
            transport,
            url: Arc::from(url),
            concurrency: concurrency.max(1),
            diagnostics: false,
        }
    }

    /// Log every sub-request at info and keep raw failure bodies
    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Determine the object length with a one-byte ranged GET
    pub async fn content_length(&self) -> Result<u64> {
        Ok(self.extent().await?.length())
    }

    async fn extent(&self) -> Result<Extent> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(&*self.url)
            .header(RANGE, "bytes=0-0")
            .body(Bytes::new())?;

        let response = self.transport.roundtrip(request).await.map_err(|e| {
            Error::Fetch(FetchError::LengthRequest {
                url: self.url.to_string(),
                source: Box::new(e),
            })
        })?;

        let status = response.status();
        log_request(self.diagnostics, &self.url, "bytes=0-0", status);

        let length = match status {
            StatusCode::PARTIAL_CONTENT | StatusCode::RANGE_NOT_SATISFIABLE => {
                header_str(response.headers(), CONTENT_RANGE).and_then(parse_content_range_total)
            }
            StatusCode::OK => {
                let length = header_str(response.headers(), CONTENT_LENGTH)
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| self.unknown_length("200 response without Content-Length"))?;
                return Ok(Extent::Whole {
                    length,
                    body: response.into_body(),
                });
            }
            _ => {
                let err = reject(Method::GET, &self.url, response, self.diagnostics).await;
                return Err(Error::Fetch(FetchError::LengthRequest {
                    url: self.url.to_string(),
                    source: Box::new(err),
                }));
            }
        };

        // Drain the single byte so the connection goes back to the pool
        let _ = response.into_body().collect().await;

        length.map(Extent::Ranged).ok_or_else(|| {
            self.unknown_length(&format!("{} response without usable Content-Range", status))
        })
    }

    fn unknown_length(&self, reason: &str) -> Error {
        Error::Fetch(FetchError::UnknownLength {
            url: self.url.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Start the workers and return the merged stream
    ///
    /// Returns once the length is known and the workers are launched; range
    /// failures surface while the stream is read.
    pub async fn fetch(self) -> Result<ByteStream> {
        let length = match self.extent().await? {
            Extent::Ranged(length) => length,
            Extent::Whole { length, body } => {
                debug!(url = %self.url, length, "store ignored Range, streaming whole object");
                return Ok(ByteStream::new(WholeObject {
                    inner: ByteStream::from_body(body),
                    expected: length,
                    received: 0,
                    finished: false,
                }));
            }
        };
        let ranges = partition(length, self.concurrency);

        debug!(
            url = %self.url,
            length,
            ranges = ranges.len(),
            "multi-range fetch"
        );

        if ranges.is_empty() {
            return Ok(ByteStream::empty());
        }

        let whole_object = ranges.len() == 1;
        let mut jobs = Vec::with_capacity(ranges.len());
        let mut pending = VecDeque::with_capacity(ranges.len());
        for range in ranges {
            let (tx, rx) = mpsc::unbounded_channel();
            jobs.push((range, tx));
            pending.push_back(PendingRange {
                range,
                rx,
                received: 0,
            });
        }

        let (failure_tx, failure_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            self.transport,
            self.url,
            Window {
                total: length,
                whole_object,
            },
            jobs,
            self.diagnostics,
            failure_tx,
        ));

        Ok(ByteStream::new(MergedStream {
            pending,
            failure: Some(failure_rx),
            supervisor: AbortOnDrop(supervisor),
            finished: false,
        }))
    }
}

/// Object facts every range worker checks its response against
#[derive(Debug, Clone, Copy)]
struct Window {
    total: u64,
    /// A single range covers the object, so a plain 200 is acceptable
    whole_object: bool,
}

/// Join workers; forward the first failure and abort the rest
async fn supervise<T>(
    transport: Arc<SignedTransport<T>>,
    url: Arc<str>,
    window: Window,
    jobs: Vec<(ByteRange, mpsc::UnboundedSender<Bytes>)>,
    diagnostics: bool,
    failure: oneshot::Sender<Error>,
) where
    T: Transport + 'static,
{
    let mut workers = JoinSet::new();
    for (range, tx) in jobs {
        let transport = transport.clone();
        let url = url.clone();
        workers.spawn(async move {
            let work = fetch_range(&transport, &url, range, window, diagnostics, tx);
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err @ Error::Fetch(FetchError::Incomplete { .. }))) => Err(err),
                Ok(Err(err)) => Err(Error::Fetch(FetchError::Range {
                    index: range.index,
                    start: range.start,
                    end: range.end,
                    source: Box::new(err),
                })),
                Err(_) => Err(Error::Fetch(FetchError::WorkerPanicked { index: range.index })),
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(url = %url, error = %err, "range worker failed, aborting fetch");
                workers.abort_all();
                let _ = failure.send(err);
                return;
            }
            // Only reachable through abort, which this task never issues itself
            Err(join_err) => {
                debug!(url = %url, error = %join_err, "range worker cancelled");
            }
        }
    }
}

/// Fetch one range and forward its chunks in arrival order
async fn fetch_range<T>(
    transport: &SignedTransport<T>,
    url: &str,
    range: ByteRange,
    window: Window,
    diagnostics: bool,
    tx: mpsc::UnboundedSender<Bytes>,
) -> Result<()>
where
    T: Transport,
{
    let requested = range.header_value();
    let request = Request::builder()
        .method(Method::GET)
        .uri(url)
        .header(RANGE, requested.as_str())
        .body(Bytes::new())?;

    let response = transport.roundtrip(request).await?;
    let status = response.status();
    log_request(diagnostics, url, &requested, status);

    match status {
        StatusCode::PARTIAL_CONTENT => {
            let served = header_str(response.headers(), CONTENT_RANGE);
            if served.and_then(ContentRange::parse) != Some(ContentRange::expected(&range, window.total)) {
                return Err(Error::Fetch(FetchError::WrongWindow {
                    index: range.index,
                    requested,
                    served: served.unwrap_or("no Content-Range").to_string(),
                }));
            }
        }
        StatusCode::OK if window.whole_object => {}
        _ => return Err(reject(Method::GET, url, response, diagnostics).await),
    }

    let mut body = response.into_body().into_data_stream();
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        received += chunk.len() as u64;
        if tx.send(chunk).is_err() {
            // Consumer closed the stream
            debug!(range = range.index, "consumer gone, abandoning range");
            return Ok(());
        }
    }

    if received != range.len() {
        return Err(Error::Fetch(FetchError::Incomplete {
            index: range.index,
            expected: range.len(),
            received,
        }));
    }

    Ok(())
}

/// Whole-object body from a store that ignored `Range`, checked against
/// its `Content-Length`
struct WholeObject {
    inner: ByteStream,
    expected: u64,
    received: u64,
    finished: bool,
}

impl WholeObject {
    fn mismatch(&mut self) -> Poll<Option<Result<Bytes>>> {
        self.finished = true;
        Poll::Ready(Some(Err(Error::Fetch(FetchError::Incomplete {
            index: 0,
            expected: self.expected,
            received: self.received,
        }))))
    }
}

impl Stream for WholeObject {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.received += chunk.len() as u64;
                if this.received > this.expected {
                    return this.mismatch();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) if this.received == this.expected => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => this.mismatch(),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct PendingRange {
    range: ByteRange,
    rx: mpsc::UnboundedReceiver<Bytes>,
    received: u64,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Consumer side: ranges in ordinal order, terminal error on failure
struct MergedStream {
    pending: VecDeque<PendingRange>,
    /// `None` once the supervisor finished without reporting a failure
    failure: Option<oneshot::Receiver<Error>>,
    supervisor: AbortOnDrop,
    finished: bool,
}

impl MergedStream {
    fn fail(&mut self, err: Error) -> Poll<Option<Result<Bytes>>> {
        self.finished = true;
        self.pending.clear();
        self.supervisor.0.abort();
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for MergedStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(failure) = this.failure.as_mut() {
            match failure.poll_unpin(cx) {
                Poll::Ready(Ok(err)) => return this.fail(err),
                // Sender dropped: every worker completed
                Poll::Ready(Err(_)) => this.failure = None,
                Poll::Pending => {}
            }
        }

        loop {
            let Some(front) = this.pending.front_mut() else {
                this.finished = true;
                return Poll::Ready(None);
            };

            match front.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    front.received += chunk.len() as u64;
                    if front.received > front.range.len() {
                        let err = FetchError::Incomplete {
                            index: front.range.index,
                            expected: front.range.len(),
                            received: front.received,
                        };
                        return this.fail(Error::Fetch(err));
                    }
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Poll::Ready(None) if front.received == front.range.len() => {
                    this.pending.pop_front();
                }
                Poll::Ready(None) => {
                    // Short range: its failure is on the way unless the supervisor is done
                    if this.failure.is_some() {
                        return Poll::Pending;
                    }
                    let err = FetchError::Incomplete {
                        index: front.range.index,
                        expected: front.range.len(),
                        received: front.received,
                    };
                    return this.fail(Error::Fetch(err));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
