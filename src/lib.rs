//! s3bench - S3 region throughput benchmark
//!
//! Measures write, serial read and parallel multi-range read throughput of
//! an S3-compatible store across regions, over a SigV4-signed pooled client.

pub mod bench;
pub mod config;
pub mod s3;

pub use config::Config;
