//! Parsing of raw installed-apps log lines.
//!
//! Every input line has the shape
//!
//! ```text
//! devtype<TAB>devid<TAB>lat<TAB>lon<TAB>app1,app2,...
//! ```
//!
//! A line either parses into a complete [`AppsInstalled`] or is rejected as a
//! whole with a [`ParseError`] describing why. Individual app tokens that are
//! not unsigned integers are dropped with a warning and never reject the line.
//!
//! # Example
//!
//! ```
//! use appsloader::record::parse_apps_installed;
//!
//! let rec = parse_apps_installed("idfa\tabc\t55.55\t42.42\t1,x,2")?;
//! assert_eq!(rec.key(), "idfa:abc");
//! assert_eq!(rec.apps, vec![1, 2]);
//! # Ok::<(), appsloader::record::ParseError>(())
//! ```

use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Minimum number of tab-separated fields in a valid line.
pub const MIN_FIELDS: usize = 5;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub struct AppsInstalled {
    pub dev_type: String,
    pub dev_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}

impl AppsInstalled {
    /// Store key for this record: `"<dev_type>:<dev_id>"`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }
}

/// Why a line was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected at least 5 tab-separated fields, found {found}")]
    TooFewFields { found: usize },

    #[error("empty device type")]
    EmptyDeviceType,

    #[error("empty device id")]
    EmptyDeviceId,

    /// Latitude or longitude is not a finite float.
    #[error("bad geo coords: lat={lat:?} lon={lon:?}")]
    BadGeo { lat: String, lon: String },
}

/// Parse one line into an [`AppsInstalled`].
///
/// Surrounding whitespace other than tabs is trimmed before splitting, so a
/// trailing tab still marks an empty app list.
///
/// # Errors
///
/// Returns a [`ParseError`] if the line has fewer than five fields, an empty
/// device type or id, or coordinates that are not finite floats.
pub fn parse_apps_installed(line: &str) -> Result<AppsInstalled, ParseError> {
    let parts: Vec<&str> = trim_line(line).split('\t').collect();
    if parts.len() < MIN_FIELDS {
        return Err(ParseError::TooFewFields { found: parts.len() });
    }

    let (dev_type, dev_id, raw_lat, raw_lon, raw_apps) =
        (parts[0], parts[1], parts[2], parts[3], parts[4]);
    if dev_type.is_empty() {
        return Err(ParseError::EmptyDeviceType);
    }
    if dev_id.is_empty() {
        return Err(ParseError::EmptyDeviceId);
    }

    let (Some(lat), Some(lon)) = (parse_coord(raw_lat), parse_coord(raw_lon)) else {
        return Err(ParseError::BadGeo {
            lat: raw_lat.to_string(),
            lon: raw_lon.to_string(),
        });
    };

    Ok(AppsInstalled {
        dev_type: dev_type.to_string(),
        dev_id: dev_id.to_string(),
        lat,
        lon,
        apps: parse_apps(raw_apps, line),
    })
}

impl FromStr for AppsInstalled {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_apps_installed(s)
    }
}

fn trim_line(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() && c != '\t')
}

fn parse_coord(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Comma-separated app ids; bad tokens are skipped, order is kept.
fn parse_apps(raw: &str, line: &str) -> Vec<u32> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',')
        .filter_map(|token| match token.trim().parse::<u32>() {
            Ok(app) => Some(app),
            Err(_) => {
                warn!(token, line, "not all user apps are digits");
                None
            }
        })
        .collect()
}
