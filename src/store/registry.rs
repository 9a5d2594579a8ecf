//! Process-wide cache of one client handle per shard endpoint.
//!
//! Lookups take a read lock; a miss upgrades to the write lock and
//! double-checks, so concurrent first uses of an address all end up holding
//! the same handle. Eviction is conditional on identity: a task that saw a
//! fault on handle `A` only removes the entry if it still maps to `A`, so a
//! successor `B` installed by a racing task survives stale evictions.
//!
//! No lock is ever held across network I/O: handles are created lazily by
//! the [`ClientFactory`] and only dial out inside [`KvClient::set`].
//!
//! [`KvClient::set`]: super::KvClient::set

use super::ClientFactory;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct ConnectionRegistry<F: ClientFactory> {
    factory: F,
    conns: RwLock<HashMap<String, Arc<F::Client>>>,
}

impl<F: ClientFactory> ConnectionRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            conns: RwLock::new(HashMap::new()),
        }
    }

    // Every critical section is a single map operation, so a poisoned lock
    // still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<F::Client>>> {
        self.conns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<F::Client>>> {
        self.conns.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the authoritative handle for `addr`, creating it on first use.
    pub fn get_or_create(&self, addr: &str) -> Arc<F::Client> {
        if let Some(conn) = self.read().get(addr) {
            return Arc::clone(conn);
        }
        let mut conns = self.write();
        Arc::clone(
            conns
                .entry(addr.to_string())
                .or_insert_with(|| Arc::new(self.factory.create(addr))),
        )
    }

    /// Drop `failed` from the cache if it is still the handle for `addr`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn evict(&self, addr: &str, failed: &Arc<F::Client>) -> bool {
        let mut conns = self.write();
        if conns.get(addr).is_some_and(|cur| Arc::ptr_eq(cur, failed)) {
            conns.remove(addr);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, addr: &str) -> bool {
        self.read().contains_key(addr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}
