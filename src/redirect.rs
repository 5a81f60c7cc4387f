// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Local-redirect-policy notification seam.
//!
//! When the local-redirect-policy feature is enabled, the pod reconciler
//! notifies the redirect-policy manager about pod lifecycle so it can
//! reassign redirect backends. The manager itself lives outside this crate;
//! the default implementation ignores the notifications.

use crate::pod::PodSnapshot;
use tracing::trace;

/// Pod lifecycle notifications consumed by the redirect-policy manager.
pub trait RedirectPolicyHooks: Send + Sync {
    fn on_pod_added(&self, pod: &PodSnapshot);

    /// `needs_reassign` is set when labels, the IP set, or the UID changed;
    /// `ready` carries the pod's latest readiness condition.
    fn on_pod_updated(&self, pod: &PodSnapshot, needs_reassign: bool, ready: bool);

    fn on_pod_deleted(&self, pod: &PodSnapshot);
}

/// Default hooks used when no redirect-policy manager is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRedirectPolicy;

impl RedirectPolicyHooks for NoopRedirectPolicy {
    fn on_pod_added(&self, pod: &PodSnapshot) {
        trace!(pod = %pod.key(), "redirect policy: pod added");
    }

    fn on_pod_updated(&self, pod: &PodSnapshot, needs_reassign: bool, ready: bool) {
        trace!(pod = %pod.key(), needs_reassign, ready, "redirect policy: pod updated");
    }

    fn on_pod_deleted(&self, pod: &PodSnapshot) {
        trace!(pod = %pod.key(), "redirect policy: pod deleted");
    }
}
