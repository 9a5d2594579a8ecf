//! Whole-run orchestration.
//!
//! [`Runner::run`] expands the input pattern, loads every matched file on a
//! fixed-size rayon pool and reports the run's error rate. Each file task
//! caps its own outstanding batches at the pool size.

use crate::batch::BatchProcessor;
use crate::codec::{PayloadCodec, PostcardCodec};
use crate::config::LoaderConfig;
use crate::file::FileProcessor;
use crate::io::expand_glob;
use crate::metrics::{Verdict, error_rate, report_error_rate};
use crate::store::{ClientFactory, MemcacheFactory};
use crate::writer::ShardWriter;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub files_total: usize,
    pub files_failed: usize,
    pub processed: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub verdict: Verdict,
}

impl RunSummary {
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Discovers input files and loads them on a fixed-size worker pool.
///
/// File tasks and the batch tasks they spawn share one rayon pool of
/// `config.threads` workers, and each file keeps at most `config.threads`
/// batches outstanding, so both threads and buffered batches stay bounded
/// however large the input is.
pub struct Runner<F: ClientFactory> {
    config: LoaderConfig,
    processor: BatchProcessor<F>,
}

impl Runner<MemcacheFactory> {
    /// Runner writing to real memcached shards.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: LoaderConfig) -> Result<Self> {
        let factory = MemcacheFactory {
            timeouts: config.timeouts,
        };
        Self::with_factory(config, factory)
    }
}

impl<F: ClientFactory> Runner<F> {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_factory(config: LoaderConfig, factory: F) -> Result<Self> {
        Self::with_codec(config, factory, Box::new(PostcardCodec))
    }

    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_codec(
        config: LoaderConfig,
        factory: F,
        codec: Box<dyn PayloadCodec>,
    ) -> Result<Self> {
        config.validate()?;
        let writer = ShardWriter::new(factory, config.dry_run);
        let processor = BatchProcessor::new(config.router(), codec, writer);
        Ok(Self { config, processor })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn processor(&self) -> &BatchProcessor<F> {
        &self.processor
    }

    /// Load every file matching the configured pattern.
    ///
    /// Fatal per-file failures are logged and counted in the summary without
    /// stopping other files. The verdict is only reported, never enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid or the worker pool cannot
    /// be built.
    pub fn run(&self) -> Result<RunSummary> {
        let files = expand_glob(&self.config.pattern)?;
        info!(
            pattern = self.config.pattern.as_str(),
            files = files.len(),
            threads = self.config.threads,
            dry_run = self.config.dry_run,
            "memc loader started"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .thread_name(|i| format!("appsloader-{i}"))
            .build()
            .context("build worker pool")?;

        let files_failed = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let fp = FileProcessor::new(&self.processor, self.config.batch_size)
                        .with_max_in_flight(self.config.threads);
                    match fp.process(path) {
                        Ok(_) => {
                            report_error_rate(self.processor.counters(), self.config.max_error_rate);
                            0usize
                        }
                        Err(e) => {
                            error!(file = %path.display(), error = %format!("{e:#}"), "failed to process file");
                            1
                        }
                    }
                })
                .sum::<usize>()
        });

        let counters = self.processor.counters();
        let verdict = report_error_rate(counters, self.config.max_error_rate);
        let summary = RunSummary {
            files_total: files.len(),
            files_failed,
            processed: counters.processed(),
            errors: counters.errors(),
            error_rate: error_rate(counters.errors(), counters.processed()),
            verdict,
        };
        info!(
            files = summary.files_total,
            failed = summary.files_failed,
            processed = summary.processed,
            errors = summary.errors,
            verdict = %summary.verdict,
            "memc loader finished"
        );
        Ok(summary)
    }
}

#[cfg(all(test, feature = "compression-gzip"))]
mod tests {
    use super::*;
    use crate::testing::{RecordingFactory, TempDataDir};

    #[test]
    fn runs_all_files_with_bounded_pool() -> Result<()> {
        let dir = TempDataDir::new()?;
        for f in 0..4 {
            let lines: Vec<String> = (0..30)
                .map(|i| format!("idfa\tf{f}d{i}\t1.0\t2.0\t{i}"))
                .collect();
            dir.write(&format!("{f}.tsv.gz"), &lines)?;
        }

        let factory = RecordingFactory::new();
        let config = LoaderConfig {
            pattern: dir.pattern(),
            batch_size: 7,
            threads: 2,
            device_memc: [("idfa".to_string(), "h:1".to_string())].into(),
            ..Default::default()
        };
        let summary = Runner::with_factory(config, factory.clone())?.run()?;

        // 30 lines / 7 per batch = 5 batches per file.
        assert_eq!(summary.files_total, 4);
        assert_eq!(summary.files_failed, 0);
        assert_eq!(summary.processed, 20);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.verdict, Verdict::Acceptable);
        assert_eq!(factory.written("h:1").len(), 120);
        assert_eq!(factory.created("h:1"), 1);
        Ok(())
    }

    #[test]
    fn summary_serializes() -> Result<()> {
        let summary = RunSummary {
            files_total: 1,
            files_failed: 0,
            processed: 100,
            errors: 2,
            error_rate: 0.02,
            verdict: Verdict::HighErrorRate,
        };
        let json: serde_json::Value = serde_json::from_str(&summary.to_json()?)?;
        assert_eq!(json["verdict"], "high_error_rate");
        assert_eq!(json["processed"], 100);
        Ok(())
    }
}
