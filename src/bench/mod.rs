//! Per-region throughput benchmark
//!
//! For every region: create a transient bucket, PUT the payload `runs`
//! times, read it back serially and through the range fetcher, then tear the
//! bucket down. Teardown runs on every exit path of the region routine.

use crate::s3::{self, Acl, Bucket, Client, CreateOutcome, Region, Transport};
use bytes::Bytes;
use futures::FutureExt;
use rand::RngCore;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Key of the benchmark object inside each bucket
pub const OBJECT_KEY: &str = "random.dat";

/// Benchmark knobs shared by every region
#[derive(Debug, Clone)]
pub struct BenchOptions {
    /// Operations per measurement
    pub runs: usize,
    /// Size of the generated payload
    pub payload_bytes: usize,
    /// Workers used by the parallel read
    pub concurrency: usize,
    /// Delete object and bucket when the region finishes
    pub cleanup: bool,
    pub acl: Acl,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            runs: 3,
            payload_bytes: 5000 * 1024,
            concurrency: 4,
            cleanup: true,
            acl: Acl::PublicRead,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Put,
    SerialGet,
    ParallelGet,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Put => "Wrote",
            Operation::SerialGet => "Read (in serial)",
            Operation::ParallelGet => "Read (in parallel)",
        })
    }
}

/// Bytes moved by one operation type over all runs, and how long it took
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub operation: Operation,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Measurement {
    /// Bytes per second; never infinite, even for a zero elapsed time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64().max(1e-9);
        self.bytes as f64 / secs
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {:.3?} ({:.4}k/s)",
            self.operation,
            format_bytes(self.bytes),
            self.elapsed,
            self.throughput() / 1024.0
        )
    }
}

#[derive(Debug, Clone)]
pub struct RegionReport {
    pub region: String,
    pub bucket: String,
    pub measurements: Vec<Measurement>,
}

#[derive(Error, Debug)]
pub enum RegionError {
    /// The bucket could not be provisioned; the region is skipped
    #[error("region {region}: bucket setup failed: {source}")]
    Setup {
        region: String,
        #[source]
        source: s3::Error,
    },

    /// A benchmark operation failed after setup; fatal to the run
    #[error("region {region}: benchmark failed: {source}")]
    Benchmark {
        region: String,
        #[source]
        source: s3::Error,
    },
}

impl RegionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegionError::Benchmark { .. })
    }
}

/// `len` bytes of random data
pub fn random_payload(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}

/// Bucket name unique per region and start time
pub fn bucket_name(region: &str, suffix: impl fmt::Display) -> String {
    format!("s3-bench-{}-{}", region, suffix)
}

/// Nanoseconds since the Unix epoch, used as bucket name suffix
pub fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Benchmark one region end to end
pub async fn run_region(
    client: &Client,
    region: &Region,
    payload: &Bytes,
    opts: &BenchOptions,
) -> Result<RegionReport, RegionError> {
    let bucket = client.bucket(bucket_name(&region.name, unique_suffix()), region);
    run_bucket(&bucket, payload, opts).await
}

/// Benchmark an already-named bucket: create, measure, tear down
pub async fn run_bucket<T>(
    bucket: &Bucket<T>,
    payload: &Bytes,
    opts: &BenchOptions,
) -> Result<RegionReport, RegionError>
where
    T: Transport + 'static,
{
    let region = bucket.region().name.clone();

    match bucket.create().await {
        Ok(CreateOutcome::Created) => info!(region = %region, bucket = %bucket.name(), "created bucket"),
        Ok(CreateOutcome::AlreadyExists) => {}
        Err(source) => return Err(RegionError::Setup { region, source }),
    }

    let measured = with_bucket(bucket, opts.cleanup, async {
        let put = bench_put(bucket, payload, opts).await?;
        let get = bench_get(bucket, payload.len() as u64, opts).await?;
        let multi_get = bench_multi_get(bucket, payload.len() as u64, opts).await?;
        Ok::<_, s3::Error>(vec![put, get, multi_get])
    })
    .await;

    match measured {
        Ok(measurements) => Ok(RegionReport {
            region,
            bucket: bucket.name().to_string(),
            measurements,
        }),
        Err(source) => Err(RegionError::Benchmark { region, source }),
    }
}

/// Run `body`, then tear the bucket down if `cleanup` is set
///
/// Teardown also runs when `body` panics; the panic is resumed afterwards.
/// Teardown failures are logged, never returned.
pub async fn with_bucket<T, F, R>(bucket: &Bucket<T>, cleanup: bool, body: F) -> R
where
    T: Transport + 'static,
    F: Future<Output = R>,
{
    let outcome = AssertUnwindSafe(body).catch_unwind().await;
    if cleanup {
        teardown(bucket).await;
    }
    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

async fn teardown<T>(bucket: &Bucket<T>)
where
    T: Transport + 'static,
{
    if let Err(err) = bucket.delete(&[OBJECT_KEY]).await {
        warn!(bucket = %bucket.name(), error = %err, "failed to delete benchmark object");
    }
    match bucket.delete_bucket().await {
        Ok(()) => info!(bucket = %bucket.name(), "deleted bucket"),
        Err(err) => warn!(bucket = %bucket.name(), error = %err, "failed to delete bucket"),
    }
}

pub async fn bench_put<T>(bucket: &Bucket<T>, payload: &Bytes, opts: &BenchOptions) -> s3::Result<Measurement>
where
    T: Transport + 'static,
{
    let start = Instant::now();
    for _ in 0..opts.runs {
        // Bytes::clone() is cheap (reference-counted, no data copy)
        bucket.put(OBJECT_KEY, payload.clone(), opts.acl).await?;
        info!("Wrote {}", bucket.url(&[OBJECT_KEY]));
    }
    Ok(report(Operation::Put, payload.len() as u64 * opts.runs as u64, start.elapsed()))
}

pub async fn bench_get<T>(bucket: &Bucket<T>, expected: u64, opts: &BenchOptions) -> s3::Result<Measurement>
where
    T: Transport + 'static,
{
    let start = Instant::now();
    for _ in 0..opts.runs {
        let received = bucket.get(OBJECT_KEY).await?.drain().await?;
        check_length(bucket, expected, received)?;
    }
    Ok(report(Operation::SerialGet, expected * opts.runs as u64, start.elapsed()))
}

pub async fn bench_multi_get<T>(
    bucket: &Bucket<T>,
    expected: u64,
    opts: &BenchOptions,
) -> s3::Result<Measurement>
where
    T: Transport + 'static,
{
    let start = Instant::now();
    for _ in 0..opts.runs {
        let received = bucket
            .multi_get(OBJECT_KEY, opts.concurrency)
            .await?
            .drain()
            .await?;
        check_length(bucket, expected, received)?;
    }
    Ok(report(Operation::ParallelGet, expected * opts.runs as u64, start.elapsed()))
}

fn check_length<T>(bucket: &Bucket<T>, expected: u64, received: u64) -> s3::Result<()>
where
    T: Transport + 'static,
{
    if expected == received {
        return Ok(());
    }
    Err(s3::Error::ShortRead {
        url: bucket.url(&[OBJECT_KEY]),
        expected,
        received,
    })
}

fn report(operation: Operation, bytes: u64, elapsed: Duration) -> Measurement {
    let measurement = Measurement {
        operation,
        bytes,
        elapsed,
    };
    info!("{}", measurement);
    measurement
}

/// Human-readable size with 1024-based units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}
