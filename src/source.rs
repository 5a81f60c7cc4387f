// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Write-source tags and the authority order that arbitrates cache writes.
//!
//! Several subsystems write to the shared IP cache: the Kubernetes pod
//! reconciler, the custom-resource reconciler, the local static
//! configuration loader, and the distributed key/value store mirror. When
//! two sources claim the same IP, the entry belongs to the source with the
//! higher authority. The order is total and fixed.
//!
//! A lower-authority upsert that hits a live higher-authority entry is
//! rejected. Some of those rejections are expected during normal startup
//! races (key/value store and custom-resource propagation is typically
//! faster than the Kubernetes watch); [`overwrite_disposition`] records
//! which pairs are suppressed and which are surfaced as real errors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the subsystem that produced a cache write.
///
/// Variants are declared in ascending authority so that the derived `Ord`
/// is the arbitration order: `KvStore > Local > CustomResource > Kubernetes`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Source {
    /// Entry derived from a Kubernetes pod event
    Kubernetes,
    /// Entry derived from a nodenet custom resource
    CustomResource,
    /// Entry from local static configuration
    Local,
    /// Entry mirrored from the distributed key/value store
    KvStore,
}

impl Source {
    /// Whether a write from `self` may replace a live entry held by `existing`.
    ///
    /// Equal or higher authority always wins; a strictly lower authority
    /// never overwrites.
    #[must_use]
    pub fn allows_overwrite_of(self, existing: Source) -> bool {
        self >= existing
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Kubernetes => "kubernetes",
            Source::CustomResource => "custom-resource",
            Source::Local => "local",
            Source::KvStore => "kvstore",
        };
        write!(f, "{s}")
    }
}

/// How a rejected overwrite should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expected startup race; log at debug and drop
    Suppress,
    /// Unexpected conflict; surface to the caller
    Surface,
}

/// Classify a rejected overwrite by its (existing, attempted) source pair.
///
/// Kubernetes writes racing against faster-propagating sources are routine:
/// the key/value store mirror, local static configuration, and the slimmer
/// custom resources all typically land before the pod watch does. Every
/// other losing combination indicates a misbehaving writer and is surfaced.
#[must_use]
pub fn overwrite_disposition(existing: Source, attempted: Source) -> Disposition {
    match (existing, attempted) {
        (Source::KvStore | Source::Local | Source::CustomResource, Source::Kubernetes) => {
            Disposition::Suppress
        }
        _ => Disposition::Surface,
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod source_tests;
