// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Cache, service-table, and reconciler error types for nodenet.
//!
//! This module provides specialized error types for:
//! - Conflict-resolving IP cache writes (authority-losing overwrites)
//! - Host-port service table operations (frontend ownership conflicts)
//! - Pod notification processing (validation failures, aggregated per-IP
//!   write failures)
//!
//! Nothing in here is fatal to the process; every variant is either a
//! local-unit skip-and-log or surfaced for observability on the affected
//! notification only.

use crate::source::{overwrite_disposition, Disposition, Source};
use thiserror::Error;

/// Errors produced by the conflict-resolving IP cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A write lost the authority arbitration against a live entry.
    ///
    /// Returned when an upsert from a strictly lower-authority source hits
    /// an entry held by a higher-authority source. Whether this is an
    /// expected startup race or a real conflict depends on the source pair;
    /// see [`CacheError::is_expected`].
    #[error("existing entry owned by source {existing} cannot be overwritten by source {attempted}")]
    Overwrite {
        /// Source currently holding the entry
        existing: Source,
        /// Source whose write was rejected
        attempted: Source,
    },
}

impl CacheError {
    /// Whether this error arises from a benign, enumerated startup race and
    /// should be suppressed rather than surfaced.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::Overwrite {
                existing,
                attempted,
            } => overwrite_disposition(*existing, *attempted) == Disposition::Suppress,
        }
    }
}

/// Errors produced by the host-port service table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A frontend is already claimed by a service with a different name.
    ///
    /// Backends are never silently merged across owners; the caller skips
    /// the colliding frontend and leaves the existing record in place.
    #[error("frontend {frontend} already owned by service '{existing}', rejected upsert from '{attempted}'")]
    FrontendOwned {
        /// The contested frontend, rendered as `addr:port/proto`
        frontend: String,
        /// Name of the service currently holding the frontend
        existing: String,
        /// Name of the service whose upsert was rejected
        attempted: String,
    },

    /// A protocol string did not parse as TCP, UDP, or SCTP.
    #[error("invalid protocol: {protocol}")]
    InvalidProtocol {
        /// The offending protocol string
        protocol: String,
    },
}

/// Errors produced while processing a single pod notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PodError {
    /// The pod's host IP was absent or failed to parse.
    #[error("no/invalid host IP: {host_ip}")]
    InvalidHostIp {
        /// The raw host IP string from the pod status
        host_ip: String,
    },

    /// One or more per-IP cache writes failed; processing of the remaining
    /// IPs continued and their failures are aggregated here.
    #[error("{}", .errors.join(", "))]
    CacheWrites {
        /// One message per failed IP
        errors: Vec<String>,
    },

    /// Host-port service reconciliation failed for the pod's IPs.
    #[error("cannot upsert host-port services for pod IPs: {pod_ips}")]
    HostPortUpsert {
        /// The pod IP set, rendered for logging
        pod_ips: String,
    },

    /// An endpoint rejected the identity-label update.
    #[error("endpoint {endpoint_id}: {reason}")]
    EndpointLabels {
        /// Local ID of the endpoint
        endpoint_id: u64,
        /// Why the endpoint refused the update
        reason: String,
    },

    /// The requested pod is not in the shadow store after initial sync.
    #[error("pod {namespace}/{name} not found")]
    NotFound {
        /// Pod namespace
        namespace: String,
        /// Pod name
        name: String,
    },
}

/// Composite error type for callers that handle any nodenet failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// IP cache write error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Service table error
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Pod notification processing error
    #[error(transparent)]
    Pod(#[from] PodError),
}
