//! # appsloader
//!
//! Loads gzip-compressed "installed apps" logs into memcached, one shard per
//! device-identifier type.
//!
//! Each input line looks like
//!
//! ```text
//! idfa<TAB>1rfw452y52g2gq4g<TAB>55.55<TAB>42.42<TAB>1423,43,567,3,7,23
//! ```
//!
//! and becomes one write of key `idfa:1rfw452y52g2gq4g` whose value is the
//! encoded `{lat, lon, apps}` payload, sent to the shard configured for
//! `idfa`.
//!
//! ## Pipeline
//!
//! - [`runner::Runner`] expands the input glob and loads files in parallel
//!   on a bounded rayon pool
//! - [`file::FileProcessor`] stream-decodes one file, slices it into batches
//!   and waits for all of them before marking the file done
//! - [`batch::BatchProcessor`] parses ([`record`]), routes ([`routing`]) and
//!   encodes ([`codec`]) a batch into per-shard groups, then writes each group
//!   once through [`writer::ShardWriter`]
//! - [`store`] holds the memcached client and the per-endpoint connection
//!   registry
//! - [`metrics`] tracks processed/error counts and reports the error-rate
//!   verdict
//!
//! ## Quick Start
//!
//! ```no_run
//! use appsloader::config::LoaderConfig;
//! use appsloader::runner::Runner;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = LoaderConfig {
//!     pattern: "./data/appsinstalled/*.tsv.gz".into(),
//!     dry_run: true,
//!     ..Default::default()
//! };
//! let summary = Runner::from_config(config)?.run()?;
//! println!("{}", summary.to_json()?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod file;
pub mod io;
pub mod metrics;
pub mod record;
pub mod routing;
pub mod runner;
pub mod selfcheck;
pub mod store;
pub mod testing;
pub mod writer;

pub use batch::{BatchProcessor, BatchReport, ShardGroup};
pub use codec::{PayloadCodec, PostcardCodec, UserApps};
pub use config::LoaderConfig;
pub use file::FileProcessor;
pub use metrics::{RunCounters, Verdict};
pub use record::{AppsInstalled, ParseError, parse_apps_installed};
pub use routing::ShardRouter;
pub use runner::{RunSummary, Runner};
pub use writer::ShardWriter;
