// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Conflict-resolving IP→identity cache.
//!
//! The cache maps a pod or node IP to its security identity, the source that
//! wrote the mapping, and the owner metadata needed to verify deletions. It
//! is shared between the pod reconciler, the custom-resource and key/value
//! store mirrors, the static configuration loader, and the external identity
//! allocator, all of which may write the same keys concurrently.
//!
//! Two disciplines keep racing writers from clobbering each other:
//!
//! - **Authority arbitration**: an upsert only replaces a live entry when
//!   its source has equal or higher authority (see [`crate::source`]).
//! - **Ownership-verified deletion**: a delete only removes an entry still
//!   recording the exact source and owner the deleter expects, so a late
//!   delete event for a terminated pod cannot remove an entry a newer pod
//!   has since claimed for the same IP.
//!
//! Upserts and deletes additionally report whether the entry's named-port
//! table changed, which callers use to trigger policy recomputation.

use crate::cache_errors::CacheError;
use crate::metrics;
use crate::service::Protocol;
use crate::source::Source;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::RwLock;

/// Numeric security identity attached to an IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(pub u32);

impl Identity {
    /// Placeholder identity for endpoints whose real identity has not yet
    /// been assigned by the allocator.
    pub const UNMANAGED: Identity = Identity(3);
}

/// A named container port: symbolic name → concrete port and protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProto {
    pub port: u16,
    pub proto: Protocol,
}

/// Named-port table attached to a cache entry.
pub type NamedPortMap = BTreeMap<String, PortProto>;

/// Owner metadata recorded on pod-sourced entries; absent for entries
/// written by non-pod sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOwner {
    pub namespace: String,
    pub name: String,
}

/// Value stored per IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub identity: Identity,
    pub source: Source,
    pub owner: Option<EntryOwner>,
    pub host_ip: IpAddr,
    pub named_ports: Option<NamedPortMap>,
    /// Index of the encryption key used for traffic to this IP, if any
    pub encrypt_key: Option<u8>,
}

/// Shared, lock-guarded IP→entry mapping.
#[derive(Debug, Default)]
pub struct IpCache {
    inner: RwLock<HashMap<IpAddr, CacheEntry>>,
}

impl IpCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `entry` for `ip`, arbitrating by source authority.
    ///
    /// The returned boolean reports whether the named-port table differs
    /// between the live entry and the attempted one. It is computed even
    /// when the write itself is rejected: named ports are informational
    /// metadata and callers decide on policy recomputation from the diff,
    /// not from the write outcome.
    ///
    /// The returned result is `Err` when a strictly higher-authority source
    /// holds the entry; the live entry is left untouched in that case.
    pub fn upsert(&self, ip: IpAddr, entry: CacheEntry) -> (bool, Result<(), CacheError>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let (named_ports_changed, rejection) = match inner.get(&ip) {
            Some(existing) => {
                let npc = existing.named_ports != entry.named_ports;
                if entry.source.allows_overwrite_of(existing.source) {
                    (npc, None)
                } else {
                    (
                        npc,
                        Some(CacheError::Overwrite {
                            existing: existing.source,
                            attempted: entry.source,
                        }),
                    )
                }
            }
            None => (entry.named_ports.is_some(), None),
        };

        if let Some(err) = rejection {
            if let CacheError::Overwrite {
                existing,
                attempted,
            } = &err
            {
                metrics::record_overwrite_rejected(*existing, *attempted);
            }
            return (named_ports_changed, Err(err));
        }

        inner.insert(ip, entry);
        (named_ports_changed, Ok(()))
    }

    /// Remove the entry for `ip` if `source` has the authority to do so.
    ///
    /// Returns whether the removal dropped a named-port table (the same
    /// policy-recompute side channel as [`IpCache::upsert`]). A lookup miss
    /// or an authority loss is a no-op returning `false`.
    pub fn delete(&self, ip: IpAddr, source: Source) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let decision = match inner.get(&ip) {
            Some(existing) if source.allows_overwrite_of(existing.source) => {
                Some(existing.named_ports.is_some())
            }
            Some(_) => {
                metrics::record_delete_skipped("authority");
                None
            }
            None => None,
        };
        match decision {
            Some(named_ports_dropped) => {
                inner.remove(&ip);
                named_ports_dropped
            }
            None => false,
        }
    }

    /// Remove the entry for `ip` only if it still records `expected_source`
    /// and the `namespace`/`name` owner the deleter expects.
    ///
    /// This is the guard against IP reuse across pod churn: a stale delete
    /// for a terminated pod finds the IP re-owned and backs off. Refusal is
    /// recorded as a skipped deletion, never surfaced as a failure.
    pub fn delete_on_owner_match(
        &self,
        ip: IpAddr,
        expected_source: Source,
        namespace: &str,
        name: &str,
    ) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let matches = inner.get(&ip).is_some_and(|existing| {
            existing.source == expected_source
                && existing
                    .owner
                    .as_ref()
                    .is_some_and(|o| o.namespace == namespace && o.name == name)
        });

        if matches {
            inner.remove(&ip);
            true
        } else {
            if inner.contains_key(&ip) {
                metrics::record_delete_skipped("owner-mismatch");
            }
            false
        }
    }

    /// Look up the entry for `ip`, if any.
    #[must_use]
    pub fn lookup_by_ip(&self, ip: IpAddr) -> Option<CacheEntry> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ip)
            .cloned()
    }

    /// Number of entries currently cached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "ipcache_tests.rs"]
mod ipcache_tests;
