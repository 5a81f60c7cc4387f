// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Label filtering for pod identity comparison.
//!
//! Pods carry labels the agent itself derives (reserved prefix) and labels
//! injected by the control plane that must not influence identity. Both are
//! stripped before two label sets are compared, so a pod recreated with the
//! same user labels but different derived labels is not treated as changed.

use crate::constants::RESERVED_LABEL_PREFIX;
use std::collections::BTreeMap;

/// Labels injected by Kubernetes controllers that carry no identity meaning.
const IGNORED_LABELS: &[&str] = &[
    "statefulset.kubernetes.io/pod-name",
    "batch.kubernetes.io/controller-uid",
    "batch.kubernetes.io/job-name",
    "controller-uid",
    "job-name",
];

/// Strip reserved-prefix and controller-injected labels from a pod label map.
///
/// Returns a new map; the input is not modified. The result is what identity
/// comparison and endpoint relabeling operate on.
#[must_use]
pub fn strip_special_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|(key, _)| !is_special_label(key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Whether a label key is stripped before identity comparison.
#[must_use]
pub fn is_special_label(key: &str) -> bool {
    key.starts_with(RESERVED_LABEL_PREFIX) || IGNORED_LABELS.contains(&key)
}
