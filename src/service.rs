// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Host-port service table keyed by frontend address.
//!
//! The table maps a frontend `(address, port, protocol)` tuple to a named
//! service record with an ordered backend list. It is shared between the pod
//! reconciler and the datapath programming subsystem, so all mutation goes
//! through the table's own lock.
//!
//! Ownership discipline: a frontend belongs to exactly one pod's service. An
//! upsert colliding with a live record under a different name is rejected
//! rather than merged, and deletion only proceeds when the caller proves it
//! still owns the record (service name and exact backend set both match).

use crate::cache_errors::ServiceError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::RwLock;

/// L4 protocol of a frontend or backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl FromStr for Protocol {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            // Kubernetes defaults an empty port protocol to TCP
            "TCP" | "" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            other => Err(ServiceError::InvalidProtocol {
                protocol: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        };
        write!(f, "{s}")
    }
}

/// Address a load-balanced service is reachable at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frontend {
    pub addr: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for Frontend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.addr, self.port, self.protocol)
    }
}

/// A single service backend: one pod IP translated to its container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Backend {
    pub addr: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

/// Namespaced service name; host-port services encode the owning pod's name,
/// UID, and port so ownership checks compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind tag for service records; this agent only derives host-port services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    HostPort,
}

/// Traffic policy applied to a service's external and internal scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficPolicy {
    Cluster,
    Local,
}

/// A load-balancer service record keyed by its frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub frontend: Frontend,
    pub name: ServiceName,
    pub kind: ServiceKind,
    pub backends: Vec<Backend>,
    pub ext_traffic_policy: TrafficPolicy,
    pub int_traffic_policy: TrafficPolicy,
    /// Set when an explicit loopback host IP was collapsed into the
    /// unspecified wildcard; the datapath must not expose this externally.
    pub loopback_surrogate: bool,
}

/// Compare two backend lists as sets (order-insignificant).
#[must_use]
pub fn backends_equal(a: &[Backend], b: &[Backend]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();
    a_sorted == b_sorted
}

/// Shared, lock-guarded frontend→service mapping.
#[derive(Debug, Default)]
pub struct ServiceTable {
    inner: RwLock<HashMap<Frontend, ServiceRecord>>,
}

impl ServiceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a service record.
    ///
    /// A record whose frontend is free is inserted (`Ok(true)`); a record
    /// whose frontend is held under the same service name replaces the
    /// holder (`Ok(false)`). A frontend held under a different name is a
    /// conflict: the existing record stays and the upsert is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::FrontendOwned`] on a name conflict.
    pub fn upsert(&self, svc: ServiceRecord) -> Result<bool, ServiceError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.get(&svc.frontend) {
            if existing.name != svc.name {
                return Err(ServiceError::FrontendOwned {
                    frontend: svc.frontend.to_string(),
                    existing: existing.name.to_string(),
                    attempted: svc.name.to_string(),
                });
            }
        }
        let created = inner.insert(svc.frontend, svc).is_none();
        Ok(created)
    }

    /// Delete the record at `frontend` only if the caller still owns it.
    ///
    /// Ownership requires the recorded service name to equal
    /// `expected_name` and the backend set to equal `expected_backends`
    /// exactly. A mismatch means another pod has since claimed the
    /// frontend; the deletion is refused and `false` returned. Refusal is a
    /// correct outcome, not an error.
    pub fn delete_on_owner_match(
        &self,
        frontend: &Frontend,
        expected_name: &ServiceName,
        expected_backends: &[Backend],
    ) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let owned = inner.get(frontend).is_some_and(|existing| {
            existing.name == *expected_name
                && backends_equal(&existing.backends, expected_backends)
        });
        if owned {
            inner.remove(frontend);
        }
        owned
    }

    /// Look up the service record at a frontend, if any.
    #[must_use]
    pub fn get_by_frontend(&self, frontend: &Frontend) -> Option<ServiceRecord> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(frontend)
            .cloned()
    }

    /// Number of records currently in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod service_tests;
