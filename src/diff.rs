// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Pure pod differ.
//!
//! Compares an old and new pod snapshot and classifies the notification as
//! an add, a delete, or an update with per-category change bits. The differ
//! performs no I/O and takes no locks; the reconciler branches entirely on
//! its output.
//!
//! A pod in a terminal phase is classified as a delete even when no old
//! snapshot exists: orchestrators never emit a genuine delete for
//! long-lived terminal objects (Jobs), and their IPs must still be
//! released.

use crate::constants::{
    BANDWIDTH_PRIORITY, EGRESS_BANDWIDTH, INGRESS_BANDWIDTH, NO_TRACK_PORT, NO_TRACK_PORT_ALIAS,
};
use crate::labels::strip_special_labels;
use crate::pod::PodSnapshot;

/// Per-category annotation change bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnnotationDiff {
    /// Ingress or egress bandwidth limit changed
    pub bandwidth: bool,
    /// Scheduling priority changed
    pub priority: bool,
    /// No-conntrack port changed (either key or its alias)
    pub no_track: bool,
}

impl AnnotationDiff {
    /// Whether any annotation category changed.
    #[must_use]
    pub fn any(self) -> bool {
        self.bandwidth || self.priority || self.no_track
    }
}

/// Change bits for an update notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateDiff {
    pub ips_changed: bool,
    pub spec_changed: bool,
    pub host_ip_changed: bool,
    /// Labels differ after stripping reserved labels from both sides
    pub labels_changed: bool,
    /// UID rotation implies the pod was deleted and recreated under the
    /// same name; treated like a label change for identity purposes
    pub uid_changed: bool,
    pub readiness_changed: bool,
    pub annotations: AnnotationDiff,
}

impl UpdateDiff {
    /// Whether nothing observable changed; the reconciler must short-circuit
    /// before any cache or service write.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !(self.ips_changed
            || self.spec_changed
            || self.host_ip_changed
            || self.labels_changed
            || self.uid_changed
            || self.readiness_changed
            || self.annotations.any())
    }

    /// Whether redirect-policy assignment must be redone: labels, IP set,
    /// or UID changed.
    #[must_use]
    pub fn needs_reassign(&self) -> bool {
        self.labels_changed || self.ips_changed || self.uid_changed
    }

    /// Whether the endpoint's identity labels must be pushed: a genuine
    /// label change or a UID rotation.
    #[must_use]
    pub fn identity_affecting(&self) -> bool {
        self.labels_changed || self.uid_changed
    }
}

/// Classification of one pod notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodDiff {
    /// No previous snapshot; treat as a new pod
    Add,
    /// Terminal phase; release all state regardless of prior snapshot
    Delete,
    /// Previous snapshot exists and the pod is still running
    Update(UpdateDiff),
}

/// Compare each listed annotation key independently in both maps.
fn annotations_equal(keys: &[&str], old: &PodSnapshot, new: &PodSnapshot) -> bool {
    keys.iter()
        .all(|key| old.annotations.get(*key) == new.annotations.get(*key))
}

/// Diff two successive observations of a pod.
#[must_use]
pub fn diff(old: Option<&PodSnapshot>, new: &PodSnapshot) -> PodDiff {
    if !new.is_running() {
        return PodDiff::Delete;
    }

    let Some(old) = old else {
        return PodDiff::Add;
    };

    PodDiff::Update(UpdateDiff {
        ips_changed: !old.ips_equal(new),
        spec_changed: !old.spec_equal(new),
        host_ip_changed: old.host_ip != new.host_ip,
        labels_changed: strip_special_labels(&old.labels) != strip_special_labels(&new.labels),
        uid_changed: old.uid != new.uid,
        readiness_changed: old.ready != new.ready,
        annotations: AnnotationDiff {
            bandwidth: !annotations_equal(&[EGRESS_BANDWIDTH], old, new)
                || !annotations_equal(&[INGRESS_BANDWIDTH], old, new),
            priority: !annotations_equal(&[BANDWIDTH_PRIORITY], old, new),
            no_track: !annotations_equal(&[NO_TRACK_PORT, NO_TRACK_PORT_ALIAS], old, new),
        },
    })
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod diff_tests;
