//! Processing of one input file.
//!
//! The file is decoded as a stream and sliced into batches of at most
//! `batch_size` lines. Batches are spawned onto the current rayon pool inside
//! a [`rayon::scope`], so the file task returns only after all of its
//! batches finished. The file is then renamed with the done marker whether
//! or not any batch reported errors.
//!
//! At most `max_in_flight` spawned batches per file are queued or running at
//! once. When that many are outstanding the reading thread processes the
//! next batch itself before reading further, so a file never holds more than
//! `max_in_flight + 1` decoded batches in memory and a single-worker pool
//! still makes store progress while the file is being read.
//!
//! A decode failure is fatal for the file: the error is returned, batches
//! already dispatched still run to completion, and the file keeps its name.

use crate::batch::BatchProcessor;
use crate::io::{dot_rename, open_lines};
use crate::store::ClientFactory;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Reference batch size.
pub const DEFAULT_BATCH_SIZE: usize = 40_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub renamed_to: PathBuf,
    pub lines: usize,
    pub batches: usize,
    /// Batches the reading thread ran itself because the cap was reached.
    pub inline_batches: usize,
    /// Most spawned batches outstanding at any one time.
    pub peak_in_flight: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct DispatchStats {
    lines: usize,
    batches: usize,
    inline_batches: usize,
    peak_in_flight: usize,
}

pub struct FileProcessor<'a, F: ClientFactory> {
    batches: &'a BatchProcessor<F>,
    batch_size: usize,
    max_in_flight: usize,
}

impl<'a, F: ClientFactory> FileProcessor<'a, F> {
    /// `batch_size` is clamped to at least one line. The in-flight cap
    /// defaults to the size of the current rayon pool.
    pub fn new(batches: &'a BatchProcessor<F>, batch_size: usize) -> Self {
        Self {
            batches,
            batch_size: batch_size.max(1),
            max_in_flight: rayon::current_num_threads(),
        }
    }

    /// Cap on spawned batches outstanding per file, clamped to at least one.
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Load `path` and mark it done.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or decoded, or if the
    /// final rename fails.
    pub fn process(&self, path: &Path) -> Result<FileReport> {
        info!(file = %path.display(), "processing");

        let stats = self.dispatch(path)?;
        let renamed_to = dot_rename(path)?;

        info!(
            file = %path.display(),
            lines = stats.lines,
            batches = stats.batches,
            inline = stats.inline_batches,
            "file done"
        );
        Ok(FileReport {
            path: path.to_path_buf(),
            renamed_to,
            lines: stats.lines,
            batches: stats.batches,
            inline_batches: stats.inline_batches,
            peak_in_flight: stats.peak_in_flight,
        })
    }

    /// Stream `path` into batches and wait for all of them.
    fn dispatch(&self, path: &Path) -> Result<DispatchStats> {
        let mut reader = open_lines(path)?;
        let batches = self.batches;
        let batch_size = self.batch_size;
        let max_in_flight = self.max_in_flight;
        let outstanding = AtomicUsize::new(0);
        let in_flight = &outstanding;

        rayon::scope(|s| -> Result<DispatchStats> {
            let submit = |full: Vec<String>, stats: &mut DispatchStats| {
                stats.batches += 1;
                if in_flight.load(Ordering::Acquire) >= max_in_flight {
                    debug!(file = %path.display(), batch = stats.batches, "pool saturated, running inline");
                    stats.inline_batches += 1;
                    batches.process(&full);
                    return;
                }

                let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                stats.peak_in_flight = stats.peak_in_flight.max(now);
                debug!(file = %path.display(), batch = stats.batches, in_flight = now, "dispatch");
                s.spawn(move |_| {
                    batches.process(&full);
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                });
            };

            let mut stats = DispatchStats::default();
            let mut batch: Vec<String> = Vec::with_capacity(batch_size);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                let n = reader
                    .read_until(b'\n', &mut buf)
                    .with_context(|| format!("read {} after line {}", path.display(), stats.lines))?;
                if n == 0 {
                    break;
                }
                stats.lines += 1;
                batch.push(String::from_utf8_lossy(&buf).into_owned());

                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    submit(full, &mut stats);
                }
            }

            if !batch.is_empty() {
                submit(batch, &mut stats);
            }

            Ok(stats)
        })
    }
}

#[cfg(all(test, feature = "compression-gzip"))]
mod tests {
    use super::*;
    use crate::codec::PostcardCodec;
    use crate::routing::ShardRouter;
    use crate::testing::{RecordingFactory, TempDataDir};
    use crate::writer::ShardWriter;

    fn processor(factory: &RecordingFactory) -> BatchProcessor<RecordingFactory> {
        BatchProcessor::new(
            ShardRouter::new([("idfa", "h:1"), ("gaid", "h:2")]),
            Box::new(PostcardCodec),
            ShardWriter::new(factory.clone(), false),
        )
    }

    #[test]
    fn slices_into_batches_and_renames() -> Result<()> {
        let dir = TempDataDir::new()?;
        let lines: Vec<String> = (0..25).map(|i| format!("idfa\td{i}\t1.0\t2.0\t{i}")).collect();
        let path = dir.write("a.tsv.gz", &lines)?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        let report = FileProcessor::new(&bp, 10).process(&path)?;

        assert_eq!(report.lines, 25);
        assert_eq!(report.batches, 3);
        assert!(!path.exists());
        assert_eq!(report.renamed_to, dir.path().join(".a.tsv.gz"));
        assert!(report.renamed_to.exists());
        // One idfa shard write per batch.
        assert_eq!(bp.counters().processed(), 3);
        assert_eq!(factory.written("h:1").len(), 25);
        Ok(())
    }

    fn single_worker_pool() -> Result<rayon::ThreadPool> {
        Ok(rayon::ThreadPoolBuilder::new().num_threads(1).build()?)
    }

    #[test]
    fn single_worker_runs_batches_while_reading() -> Result<()> {
        let dir = TempDataDir::new()?;
        let lines: Vec<String> = (0..100).map(|i| format!("idfa\td{i}\t1.0\t2.0\t{i}")).collect();
        let path = dir.write("a.tsv.gz", &lines)?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        let pool = single_worker_pool()?;
        let report = pool.install(|| FileProcessor::new(&bp, 10).process(&path))?;

        // The only worker is the reader: the first spawned batch waits for
        // the scope to join, every later one runs inline.
        assert_eq!(report.batches, 10);
        assert_eq!(report.peak_in_flight, 1);
        assert_eq!(report.inline_batches, 9);
        assert_eq!(factory.written("h:1").len(), 100);
        assert_eq!(bp.counters().processed(), 10);
        Ok(())
    }

    #[test]
    fn in_flight_batches_stay_under_cap() -> Result<()> {
        let dir = TempDataDir::new()?;
        let lines: Vec<String> = (0..2_000)
            .map(|i| format!("{}\td{i}\t1.0\t2.0\t{i}", if i % 2 == 0 { "idfa" } else { "gaid" }))
            .collect();
        let path = dir.write("big.tsv.gz", &lines)?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build()?;
        let report = pool.install(|| FileProcessor::new(&bp, 10).with_max_in_flight(2).process(&path))?;

        assert_eq!(report.batches, 200);
        assert!(report.peak_in_flight <= 2, "peak={}", report.peak_in_flight);
        assert_eq!(factory.total_keys(), 2_000);
        assert_eq!(bp.counters().processed(), 400);
        Ok(())
    }

    #[test]
    fn renamed_even_when_everything_fails() -> Result<()> {
        let dir = TempDataDir::new()?;
        let path = dir.write("bad.tsv.gz", &["nonsense", "more\tnonsense"])?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        let report = FileProcessor::new(&bp, 10).process(&path)?;

        assert_eq!(bp.counters().errors(), 2);
        assert!(report.renamed_to.exists());
        Ok(())
    }

    #[test]
    fn empty_file_dispatches_nothing() -> Result<()> {
        let dir = TempDataDir::new()?;
        let empty: [&str; 0] = [];
        let path = dir.write("empty.tsv.gz", &empty)?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        let report = FileProcessor::new(&bp, 10).process(&path)?;

        assert_eq!(report.batches, 0);
        assert!(report.renamed_to.exists());
        Ok(())
    }

    #[test]
    fn corrupt_file_is_fatal_and_not_renamed() -> Result<()> {
        let dir = TempDataDir::new()?;
        let lines: Vec<String> = (0..500).map(|i| format!("idfa\td{i}\t1.0\t2.0\t{i}")).collect();
        let path = dir.write("corrupt.tsv.gz", &lines)?;
        let mut raw = std::fs::read(&path)?;
        let mid = raw.len() / 2;
        for b in &mut raw[mid..] {
            *b ^= 0xff;
        }
        std::fs::write(&path, raw)?;

        let factory = RecordingFactory::new();
        let bp = processor(&factory);
        assert!(FileProcessor::new(&bp, 10).process(&path).is_err());
        assert!(path.exists());
        Ok(())
    }
}
