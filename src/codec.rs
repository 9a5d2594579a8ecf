//! Payload encoding for store values.
//!
//! The value written for each record is the serialized [`UserApps`] message
//! (`lat`, `lon`, `apps`). The binary layout belongs to the codec; callers
//! only rely on a lossless round trip. [`PostcardCodec`] is the default and
//! custom codecs can be plugged in through [`PayloadCodec`].

use crate::record::AppsInstalled;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value stored under `"<dev_type>:<dev_id>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserApps {
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

impl From<&AppsInstalled> for UserApps {
    fn from(rec: &AppsInstalled) -> Self {
        Self {
            lat: rec.lat,
            lon: rec.lon,
            apps: rec.apps.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode UserApps: {0}")]
    Encode(String),

    #[error("failed to decode UserApps: {0}")]
    Decode(String),
}

/// Pluggable payload codec.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// batch task of a run.
pub trait PayloadCodec: Send + Sync {
    /// Human-readable codec name.
    fn name(&self) -> &str;

    fn encode(&self, apps: &UserApps) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<UserApps, CodecError>;
}

/// Compact serde-based codec backed by `postcard`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl PayloadCodec for PostcardCodec {
    fn name(&self) -> &str {
        "postcard"
    }

    fn encode(&self, apps: &UserApps) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(apps).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<UserApps, CodecError> {
        postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Turn a record into its `(key, payload)` pair.
///
/// # Errors
///
/// Returns the codec's error for this record only.
pub fn serialize(
    rec: &AppsInstalled,
    codec: &dyn PayloadCodec,
) -> Result<(String, Vec<u8>), CodecError> {
    let packed = codec.encode(&UserApps::from(rec))?;
    Ok((rec.key(), packed))
}
