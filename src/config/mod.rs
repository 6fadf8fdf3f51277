use crate::s3::{PayloadSigning, Region, RegionCatalog, Scheme};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// HTTP client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long an idle pooled connection is kept
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,

    /// Max idle connections kept per host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    /// Skip TLS certificate verification (self-signed test stores only)
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_pool_max_idle() -> usize {
    1024
}

fn default_keepalive() -> u64 {
    90
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            keepalive_secs: default_keepalive(),
            insecure_tls: false,
        }
    }
}

/// How bucket URLs are addressed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub scheme: Scheme,

    /// `<endpoint>/<bucket>/<key>` instead of `<bucket>.<endpoint>/<key>`
    #[serde(default)]
    pub path_style: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Payload hashing for non-empty bodies: unsigned or sha256
    #[serde(default)]
    pub payload: PayloadSigning,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub signing: SigningConfig,

    /// Regions to benchmark, in order (default: built-in AWS catalog)
    #[serde(default)]
    pub regions: RegionCatalog,

    /// Log every request and keep raw failure bodies
    #[serde(default)]
    pub diagnostics: bool,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables on top of the defaults
///
/// A `.env` file is loaded first if one exists. Credentials are not part of
/// [`Config`]; see [`crate::s3::Credentials::from_env`].
pub fn load_from_env() -> Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = Config::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply environment overrides through an arbitrary variable lookup
///
/// - DEBUG (any non-empty value enables diagnostics)
/// - S3BENCH_INSECURE_TLS, S3BENCH_PATH_STYLE (booleans)
/// - S3BENCH_SCHEME (http or https)
/// - S3BENCH_ENDPOINT (single S3-compatible endpoint; region name from
///   S3BENCH_REGION or AWS_REGION, default us-east-1)
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if var("DEBUG").is_some() {
        config.diagnostics = true;
    }

    if let Some(value) = var("S3BENCH_INSECURE_TLS") {
        config.http.insecure_tls = parse_bool("S3BENCH_INSECURE_TLS", &value)?;
    }

    if let Some(value) = var("S3BENCH_PATH_STYLE") {
        config.endpoint.path_style = parse_bool("S3BENCH_PATH_STYLE", &value)?;
    }

    if let Some(value) = var("S3BENCH_SCHEME") {
        config.endpoint.scheme = value
            .trim()
            .parse()
            .map_err(anyhow::Error::msg)
            .context("Invalid S3BENCH_SCHEME")?;
    }

    if let Some(endpoint) = var("S3BENCH_ENDPOINT") {
        let name = var("S3BENCH_REGION")
            .or_else(|| var("AWS_REGION"))
            .unwrap_or_else(|| "us-east-1".to_string());
        let constraint = (name != "us-east-1").then(|| name.clone());
        config.regions = RegionCatalog::new(vec![Region::new(name, endpoint.trim(), constraint)]);
    }

    Ok(())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", name, other),
    }
}

/// Load configuration from an optional YAML file, then apply the environment
///
/// Without a file the built-in defaults are used. Environment overrides
/// always win over file values.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = match config_path {
        Some(path) => load_from_yaml(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}
