//! slabcache command-line driver
//!
//! Runs a synthetic workload against an in-process cache and prints the
//! resulting statistics, or prints the effective configuration.
//!
//! # Examples
//!
//! ```bash
//! # Run a workload with the default configuration
//! slabcache bench --workers 8 --ops 100000
//!
//! # Use a configuration file
//! slabcache --config slabcache.toml bench --keys 50000
//!
//! # Show the configuration after file and environment overrides
//! SLABCACHE_CLEAR_RATE=0.5 slabcache --config slabcache.toml config
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use slabcache::{Cache, CacheConfig, Error};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// slabcache - embedded key/value cache
#[derive(Parser, Debug)]
#[command(name = "slabcache")]
#[command(version = slabcache::VERSION)]
#[command(about = "Slab-backed key/value cache with stampede protection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(long, global = true, env = "SLABCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic workload and print statistics
    Bench(BenchArgs),

    /// Print the effective configuration
    Config,

    /// Show version
    Version,
}

#[derive(Args, Debug)]
struct BenchArgs {
    /// Concurrent worker tasks
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "10000")]
    ops: usize,

    /// Distinct keys in the workload
    #[arg(short, long, default_value = "10000")]
    keys: usize,

    /// Value size in bytes
    #[arg(long, default_value = "128")]
    value_size: usize,

    /// Entry lifetime in seconds
    #[arg(long, default_value = "10")]
    ttl: u64,

    /// Simulated loader latency in milliseconds
    #[arg(long, default_value = "2")]
    load_latency: u64,

    /// Share of operations that are writes (0-100)
    #[arg(long, default_value = "20")]
    write_percent: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli);

    match cli.command {
        Commands::Bench(ref args) => bench_command(load_config(&cli)?, args).await,
        Commands::Config => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Version => {
            println!("slabcache {}", slabcache::VERSION);
            Ok(())
        }
    }
}

fn setup_logging(cli: &Cli) {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(!cli.no_color),
            )
            .with(filter)
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    match &cli.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(CacheConfig::default()),
    }
}

async fn bench_command(config: CacheConfig, args: &BenchArgs) -> anyhow::Result<()> {
    info!(
        workers = args.workers,
        ops = args.ops,
        keys = args.keys,
        value_size = args.value_size,
        "Starting workload"
    );

    let cache = Cache::new(config)?;
    let ttl = Duration::from_secs(args.ttl);
    let loads = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut workers = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let cache = cache.clone();
        let loads = Arc::clone(&loads);
        let rejected = Arc::clone(&rejected);
        let ops = args.ops;
        let keys = args.keys.max(1);
        let value = Bytes::from(vec![worker as u8; args.value_size]);
        let latency = Duration::from_millis(args.load_latency);
        let write_percent = args.write_percent.min(100);

        workers.push(tokio::spawn(async move {
            for _ in 0..ops {
                let key = format!("bench:{:08}", fastrand::usize(..keys));
                let roll = fastrand::u32(..100);

                let result = if roll < write_percent {
                    cache.set(key.as_bytes(), &value, ttl)
                } else {
                    let loads = Arc::clone(&loads);
                    let value = value.clone();
                    cache
                        .get_or_load(key.as_bytes(), ttl, move |_| async move {
                            loads.fetch_add(1, Ordering::Relaxed);
                            tokio::time::sleep(latency).await;
                            Ok::<_, Error>(value)
                        })
                        .await
                        .map(|_| ())
                };

                match result {
                    Ok(()) => {}
                    Err(Error::CapacityExceeded { .. }) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, "Operation failed"),
                }
            }
        }));
    }

    for worker in workers {
        worker.await?;
    }

    let elapsed = started.elapsed();
    let total_ops = (args.workers * args.ops) as f64;
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (total_ops / elapsed.as_secs_f64().max(f64::EPSILON)) as u64,
        loader_calls = loads.load(Ordering::Relaxed),
        rejected_writes = rejected.load(Ordering::Relaxed),
        "Workload finished"
    );

    let mut stats = cache.stats();
    stats.slab.size_classes.retain(|c| c.allocated_slots > 0);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
