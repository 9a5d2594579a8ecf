//! Loader configuration.
//!
//! ```
//! use appsloader::config::LoaderConfig;
//!
//! let config = LoaderConfig {
//!     dry_run: true,
//!     batch_size: 1000,
//!     ..Default::default()
//! };
//! config.validate()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::file::DEFAULT_BATCH_SIZE;
use crate::metrics::NORMAL_ERR_RATE;
use crate::routing::ShardRouter;
use crate::store::Timeouts;
use anyhow::{Result, bail};
use std::collections::BTreeMap;

pub const DEFAULT_PATTERN: &str = "./data/appsinstalled/*.tsv.gz";

/// Default device type -> memcached address table.
pub const DEFAULT_DEVICE_MEMC: [(&str, &str); 4] = [
    ("idfa", "127.0.0.1:33013"),
    ("gaid", "127.0.0.1:33014"),
    ("adid", "127.0.0.1:33015"),
    ("dvid", "127.0.0.1:33016"),
];

#[derive(Clone, Debug, PartialEq)]
pub struct LoaderConfig {
    /// Glob selecting input files.
    pub pattern: String,
    /// Compute everything, send nothing.
    pub dry_run: bool,
    /// Lines per batch.
    pub batch_size: usize,
    /// Runs with an error rate at or above this are reported as failed.
    pub max_error_rate: f64,
    /// Worker pool size shared by file and batch tasks.
    pub threads: usize,
    /// Device type -> shard endpoint.
    pub device_memc: BTreeMap<String, String>,
    pub timeouts: Timeouts,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
            max_error_rate: NORMAL_ERR_RATE,
            threads: num_cpus::get().max(1),
            device_memc: DEFAULT_DEVICE_MEMC
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            timeouts: Timeouts::default(),
        }
    }
}

impl LoaderConfig {
    /// # Errors
    ///
    /// Returns an error for a zero batch size or pool size, an error-rate
    /// threshold outside `(0, 1]`, or an empty endpoint address.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.threads == 0 {
            bail!("thread count must be at least 1");
        }
        if !(self.max_error_rate > 0.0 && self.max_error_rate <= 1.0) {
            bail!("max error rate must be in (0, 1], got {}", self.max_error_rate);
        }
        if let Some((dev_type, _)) = self.device_memc.iter().find(|(_, addr)| addr.is_empty()) {
            bail!("empty memcached address for device type {dev_type}");
        }
        Ok(())
    }

    #[must_use]
    pub fn router(&self) -> ShardRouter {
        ShardRouter::new(self.device_memc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = LoaderConfig::default();
        c.validate().unwrap();
        assert_eq!(c.batch_size, 40_000);
        assert_eq!(c.max_error_rate, 0.01);
        assert_eq!(c.pattern, "./data/appsinstalled/*.tsv.gz");

        let router = c.router();
        assert_eq!(router.len(), 4);
        assert_eq!(router.endpoint("idfa"), Some("127.0.0.1:33013"));
        assert_eq!(router.endpoint("gaid"), Some("127.0.0.1:33014"));
        assert_eq!(router.endpoint("adid"), Some("127.0.0.1:33015"));
        assert_eq!(router.endpoint("dvid"), Some("127.0.0.1:33016"));
    }

    #[test]
    fn rejects_bad_values() {
        let zero_batch = LoaderConfig { batch_size: 0, ..Default::default() };
        assert!(zero_batch.validate().is_err());

        let zero_threads = LoaderConfig { threads: 0, ..Default::default() };
        assert!(zero_threads.validate().is_err());

        let bad_rate = LoaderConfig { max_error_rate: 0.0, ..Default::default() };
        assert!(bad_rate.validate().is_err());

        let mut empty_addr = LoaderConfig::default();
        empty_addr.device_memc.insert("idfa".into(), String::new());
        assert!(empty_addr.validate().is_err());
    }
}
