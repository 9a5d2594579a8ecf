//! Writes one batch's worth of keyed payloads to one shard.

use crate::store::{ClientFactory, ConnectionRegistry, KvClient, StoreError};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct ShardWriter<F: ClientFactory> {
    registry: ConnectionRegistry<F>,
    dry_run: bool,
}

impl<F: ClientFactory> ShardWriter<F> {
    pub fn new(factory: F, dry_run: bool) -> Self {
        Self {
            registry: ConnectionRegistry::new(factory),
            dry_run,
        }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn registry(&self) -> &ConnectionRegistry<F> {
        &self.registry
    }

    /// Write every `(key, payload)` pair of `values` to `addr`.
    ///
    /// In dry-run mode nothing is sent and the call always succeeds; each call
    /// logs one `info` line per shard and one `debug` line per key. Otherwise
    /// the first failing item stops the call; a connection fault also evicts
    /// the cached handle so the next batch for this shard reconnects. Nothing
    /// is retried here and items written before the failure stay written.
    ///
    /// # Errors
    ///
    /// Returns the [`StoreError`] of the first item that failed.
    pub fn write(&self, addr: &str, values: &HashMap<String, Vec<u8>>) -> Result<(), StoreError> {
        let client = self.registry.get_or_create(addr);

        if self.dry_run {
            for (key, value) in values {
                debug!(addr, key = key.as_str(), bytes = value.len(), "dry run: would set");
            }
            info!(addr, items = values.len(), "dry run: would write batch");
            return Ok(());
        }

        for (key, value) in values {
            if let Err(e) = client.set(key, value) {
                if e.is_connection_fault() {
                    warn!(addr, error = %e, "cannot write to memc, dropping connection");
                    self.registry.evict(addr, &client);
                } else {
                    warn!(addr, key = key.as_str(), error = %e, "error setting value in memc");
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturedLogs, Fault, RecordingFactory};

    fn values(n: usize) -> HashMap<String, Vec<u8>> {
        (0..n).map(|i| (format!("idfa:{i}"), vec![i as u8])).collect()
    }

    #[test]
    fn writes_all_items() {
        let factory = RecordingFactory::new();
        let writer = ShardWriter::new(factory.clone(), false);

        writer.write("h:1", &values(3)).unwrap();
        assert_eq!(factory.written("h:1"), values(3));
    }

    #[test]
    fn dry_run_sends_nothing() {
        let factory = RecordingFactory::new();
        let writer = ShardWriter::new(factory.clone(), true);

        writer.write("h:1", &values(5)).unwrap();
        assert_eq!(factory.set_calls(), 0);
        assert!(factory.written("h:1").is_empty());
    }

    #[test]
    fn dry_run_is_visible_at_info() {
        let logs = CapturedLogs::new();
        let writer = ShardWriter::new(RecordingFactory::new(), true);

        logs.capture("info", || writer.write("h:1", &values(3))).unwrap();

        let out = logs.contents();
        assert!(out.contains("dry run: would write batch"), "{out}");
        assert!(out.contains("h:1"), "{out}");
        assert!(out.contains("items=3"), "{out}");
        // Per-key lines stay at debug.
        assert!(!out.contains("would set"), "{out}");
    }

    #[test]
    fn server_fault_aborts_and_evicts() {
        let factory = RecordingFactory::new();
        factory.fail_next("h:1", Fault::Server, 1);
        let writer = ShardWriter::new(factory.clone(), false);

        let err = writer.write("h:1", &values(4)).unwrap_err();
        assert!(err.is_connection_fault());
        // First item failed, the rest were never attempted.
        assert_eq!(factory.set_calls(), 1);
        assert!(!writer.registry().contains("h:1"));

        writer.write("h:1", &values(4)).unwrap();
        assert_eq!(factory.created("h:1"), 2);
        assert_eq!(factory.written("h:1").len(), 4);
    }

    #[test]
    fn client_fault_keeps_connection() {
        let factory = RecordingFactory::new();
        factory.fail_next("h:1", Fault::Client, 1);
        let writer = ShardWriter::new(factory.clone(), false);

        assert!(writer.write("h:1", &values(2)).is_err());
        assert!(writer.registry().contains("h:1"));

        writer.write("h:1", &values(2)).unwrap();
        assert_eq!(factory.created("h:1"), 1);
    }
}
