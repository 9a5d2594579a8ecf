//! Static device-type to shard endpoint mapping.

use std::collections::{BTreeMap, HashMap};

/// Read-only routing table built once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardRouter {
    routes: HashMap<String, String>,
}

impl ShardRouter {
    pub fn new<I, K, V>(routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Endpoint address for a device type, if the type is routed.
    #[must_use]
    pub fn endpoint(&self, dev_type: &str) -> Option<&str> {
        self.routes.get(dev_type).map(String::as_str)
    }

    /// Distinct endpoint addresses, sorted.
    #[must_use]
    pub fn endpoints(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.routes.values().map(String::as_str).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Sorted view of the table, for logging.
    #[must_use]
    pub fn to_sorted(&self) -> BTreeMap<&str, &str> {
        self.routes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
