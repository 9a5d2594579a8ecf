//! appsloader - load installed-apps logs into sharded memcached
//!
//! # Usage
//!
//! ```bash
//! # Load everything under the default pattern
//! appsloader
//!
//! # Dry run over a custom pattern, logging to a file
//! appsloader --dry --pattern '/var/log/apps/*.tsv.gz' --log loader.log
//!
//! # Serialization self-check
//! appsloader --test
//! ```

use anyhow::{Context, Result};
use appsloader::codec::PostcardCodec;
use appsloader::config::{DEFAULT_PATTERN, LoaderConfig};
use appsloader::metrics::NORMAL_ERR_RATE;
use appsloader::runner::Runner;
use appsloader::selfcheck::run_selfcheck;
use clap::Parser;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Load gzip-compressed installed-apps logs into memcached shards
#[derive(Parser, Debug)]
#[command(name = "appsloader")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run the serialization self-check and exit
    #[arg(long)]
    test: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "APPSLOADER_LOG")]
    log: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "APPSLOADER_LOG_LEVEL")]
    log_level: String,

    /// Parse and encode everything but send nothing
    #[arg(long, env = "APPSLOADER_DRY")]
    dry: bool,

    /// Glob pattern selecting input files
    #[arg(long, default_value = DEFAULT_PATTERN, env = "APPSLOADER_PATTERN")]
    pattern: String,

    /// IDFA shard address
    #[arg(long, default_value = "127.0.0.1:33013", env = "APPSLOADER_IDFA")]
    idfa: String,

    /// GAID shard address
    #[arg(long, default_value = "127.0.0.1:33014", env = "APPSLOADER_GAID")]
    gaid: String,

    /// ADID shard address
    #[arg(long, default_value = "127.0.0.1:33015", env = "APPSLOADER_ADID")]
    adid: String,

    /// DVID shard address
    #[arg(long, default_value = "127.0.0.1:33016", env = "APPSLOADER_DVID")]
    dvid: String,

    /// Lines per batch
    #[arg(long, default_value_t = appsloader::file::DEFAULT_BATCH_SIZE, env = "APPSLOADER_BATCH_SIZE")]
    batch_size: usize,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long, env = "APPSLOADER_THREADS")]
    threads: Option<usize>,

    /// Error rate at or above which the load is reported as failed
    #[arg(long, default_value_t = NORMAL_ERR_RATE, env = "APPSLOADER_MAX_ERROR_RATE")]
    max_error_rate: f64,
}

impl Cli {
    fn into_config(self) -> LoaderConfig {
        let defaults = LoaderConfig::default();
        let device_memc = BTreeMap::from([
            ("idfa".to_string(), self.idfa),
            ("gaid".to_string(), self.gaid),
            ("adid".to_string(), self.adid),
            ("dvid".to_string(), self.dvid),
        ]);
        LoaderConfig {
            pattern: self.pattern,
            dry_run: self.dry,
            batch_size: self.batch_size,
            max_error_rate: self.max_error_rate,
            threads: self.threads.unwrap_or(defaults.threads),
            device_memc,
            ..defaults
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log.as_deref(), cli.dry)?;

    if cli.test {
        run_selfcheck(&PostcardCodec)?;
        return Ok(());
    }

    let config = cli.into_config();
    info!(
        pattern = config.pattern.as_str(),
        dry_run = config.dry_run,
        routes = ?config.device_memc,
        "memc loader options"
    );

    let summary = Runner::from_config(config)?.run()?;
    info!(summary = summary.to_json()?.as_str(), "run summary");
    Ok(())
}

/// Initialize the tracing subscriber for logging.
///
/// Dry runs also print source locations.
fn init_logging(level: &str, log_file: Option<&Path>, dry: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;
    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_file(dry)
                        .with_line_number(dry),
                )
                .init();
        }
        None => {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_file(dry)
                        .with_line_number(dry),
                )
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["appsloader"]).unwrap();
        let config = cli.into_config();
        let defaults = LoaderConfig::default();
        assert_eq!(config.pattern, defaults.pattern);
        assert_eq!(config.device_memc, defaults.device_memc);
        assert_eq!(config.batch_size, defaults.batch_size);
        assert!(!config.dry_run);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::try_parse_from([
            "appsloader",
            "--dry",
            "--pattern",
            "/tmp/*.gz",
            "--gaid",
            "10.0.0.1:11211",
            "--batch-size",
            "5",
            "--threads",
            "3",
        ])
        .unwrap();
        let config = cli.into_config();
        assert!(config.dry_run);
        assert_eq!(config.pattern, "/tmp/*.gz");
        assert_eq!(config.device_memc["gaid"], "10.0.0.1:11211");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.threads, 3);
    }
}
