use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use regex::Regex;
use s3bench::bench::{self, BenchOptions, RegionReport};
use s3bench::config;
use s3bench::s3::{Acl, Client};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "s3bench")]
#[command(version, about = "Measure S3 throughput across regions", long_about = None)]
struct Cli {
    /// Number of times to run each test
    #[arg(long, default_value_t = 3)]
    runs: usize,

    /// Payload size in KB
    #[arg(long, default_value_t = 5000)]
    payload: usize,

    /// Regex selecting region names to test
    #[arg(long, default_value = ".")]
    filter: String,

    /// Remove the object and bucket after each region
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    cleanup: bool,

    /// Parallel range workers for the multi-range read
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Canned ACL applied to uploaded objects
    #[arg(long, default_value = "public-read")]
    acl: Acl,

    /// Config file path
    #[arg(long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;

    // Diagnostics raise the default level so per-request logs are visible
    let default_level = if config.diagnostics {
        "debug".to_string()
    } else {
        cli.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Range workers run in parallel, so use all cores
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli, config))
}

async fn async_main(cli: Cli, config: config::Config) -> Result<()> {
    let filter = Regex::new(&cli.filter).context(format!("Invalid region filter: {}", cli.filter))?;
    let client = Client::from_config(&config)?;

    let opts = BenchOptions {
        runs: cli.runs,
        payload_bytes: cli.payload * 1024,
        concurrency: cli.concurrency,
        cleanup: cli.cleanup,
        acl: cli.acl,
    };

    let payload = bench::random_payload(opts.payload_bytes);
    info!("Generated {} of payload", bench::format_bytes(payload.len() as u64));
    info!("Running {} iterations per region", opts.runs);

    let mut reports = Vec::new();
    for region in config.regions.matching(&filter) {
        info!("Testing region {}", region.name);

        match bench::run_region(&client, region, &payload, &opts).await {
            Ok(report) => reports.push(report),
            Err(err) if err.is_fatal() => {
                error!("{}", err);
                print_summary(&reports);
                return Err(err.into());
            }
            Err(err) => warn!("{}, skipping", err),
        }
    }

    print_summary(&reports);
    Ok(())
}

fn print_summary(reports: &[RegionReport]) {
    if reports.is_empty() {
        return;
    }

    println!();
    println!("{:<16} {:<20} {:>14} {:>12}", "REGION", "OPERATION", "THROUGHPUT", "ELAPSED");
    for report in reports {
        for m in &report.measurements {
            println!(
                "{:<16} {:<20} {:>14} {:>12}",
                report.region,
                m.operation.to_string(),
                format!("{}/s", bench::format_bytes(m.throughput() as u64)),
                format!("{:.2?}", m.elapsed),
            );
        }
    }
}
