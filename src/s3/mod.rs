//! S3 client module with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 request signing
//! - A signing transport decorator over a pooled hyper client
//! - Bucket operations (create, put, get, multi-range get, delete)
//! - Concurrent range fetching reassembled into one ordered stream

pub mod bucket;
pub mod client;
pub mod error;
pub mod fetch;
pub mod signer;
pub mod stream;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use bucket::Bucket;
pub use client::{Client, ClientOptions};
pub use error::{BucketError, CredentialsError, Error, FetchError, Result};
pub use fetch::{partition, ByteRange, RangeFetcher};
pub use signer::{Credentials, PayloadSigning, Signer};
pub use stream::ByteStream;
pub use transport::{HttpTransport, ResponseBody, SignedTransport, Transport};
pub use types::{Acl, CreateOutcome, Region, RegionCatalog, Scheme};
