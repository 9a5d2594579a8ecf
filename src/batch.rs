//! Processing of one batch of raw lines.
//!
//! A batch is parsed, routed and encoded into a [`ShardGroup`], then each
//! shard in the group gets exactly one [`ShardWriter::write`] call. The run
//! counters measure shard writes, not records: a batch touching three shards
//! adds at most three to `processed + errors` from the write phase, plus one
//! error per rejected line or unencodable record.
//!
//! Lines whose device type has no route are logged and dropped without
//! counting as errors.

use crate::codec::{PayloadCodec, serialize};
use crate::metrics::RunCounters;
use crate::record::parse_apps_installed;
use crate::routing::ShardRouter;
use crate::store::ClientFactory;
use crate::writer::ShardWriter;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Endpoint address -> (store key -> encoded payload).
///
/// Keys are unique per shard; a later line with the same key replaces the
/// earlier payload.
pub type ShardGroup = HashMap<String, HashMap<String, Vec<u8>>>;

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub lines: usize,
    pub blank: usize,
    pub rejected: usize,
    pub unknown_device: usize,
    pub encode_failed: usize,
    pub shards_written: usize,
    pub shards_failed: usize,
}

pub struct BatchProcessor<F: ClientFactory> {
    router: ShardRouter,
    codec: Box<dyn PayloadCodec>,
    writer: ShardWriter<F>,
    counters: RunCounters,
}

impl<F: ClientFactory> BatchProcessor<F> {
    pub fn new(router: ShardRouter, codec: Box<dyn PayloadCodec>, writer: ShardWriter<F>) -> Self {
        Self {
            router,
            codec,
            writer,
            counters: RunCounters::new(),
        }
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn writer(&self) -> &ShardWriter<F> {
        &self.writer
    }

    /// Parse, route and encode `lines` into per-shard groups.
    ///
    /// Rejected lines and encode failures bump the error counter here.
    pub fn group<S: AsRef<str>>(&self, lines: &[S], report: &mut BatchReport) -> ShardGroup {
        let mut group = ShardGroup::new();

        for line in lines {
            report.lines += 1;
            let line = line.as_ref();
            if line.trim().is_empty() {
                report.blank += 1;
                continue;
            }

            let rec = match parse_apps_installed(line) {
                Ok(rec) => rec,
                Err(e) => {
                    debug!(error = %e, line, "rejected line");
                    report.rejected += 1;
                    self.counters.inc_errors();
                    continue;
                }
            };

            let Some(addr) = self.router.endpoint(&rec.dev_type) else {
                warn!(dev_type = rec.dev_type.as_str(), "unknown device type");
                report.unknown_device += 1;
                continue;
            };

            match serialize(&rec, self.codec.as_ref()) {
                Ok((key, packed)) => {
                    group.entry(addr.to_string()).or_default().insert(key, packed);
                }
                Err(e) => {
                    warn!(key = rec.key().as_str(), error = %e, "cannot encode record");
                    report.encode_failed += 1;
                    self.counters.inc_errors();
                }
            }
        }

        group
    }

    /// Run one batch end to end.
    pub fn process<S: AsRef<str>>(&self, lines: &[S]) -> BatchReport {
        let mut report = BatchReport::default();
        let group = self.group(lines, &mut report);

        for (addr, values) in &group {
            match self.writer.write(addr, values) {
                Ok(()) => {
                    report.shards_written += 1;
                    self.counters.inc_processed();
                }
                Err(_) => {
                    report.shards_failed += 1;
                    self.counters.inc_errors();
                }
            }
        }

        debug!(?report, "batch done");
        report
    }
}
