// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Common label, annotation, and datapath constants used across the agent.
//!
//! This module defines the annotation keys the pod reconciler watches for
//! per-category changes, the reserved label prefix stripped before identity
//! comparison, and default datapath configuration values.

// ============================================================================
// Kubernetes Standard Annotations
// https://kubernetes.io/docs/concepts/extend-kubernetes/compute-storage-net/network-plugins/
// ============================================================================

/// Annotation limiting egress bandwidth for a pod (e.g., "10M")
pub const EGRESS_BANDWIDTH: &str = "kubernetes.io/egress-bandwidth";

/// Annotation limiting ingress bandwidth for a pod (e.g., "10M")
pub const INGRESS_BANDWIDTH: &str = "kubernetes.io/ingress-bandwidth";

// ============================================================================
// Nodenet-Specific Annotations
// ============================================================================

/// Annotation setting the traffic scheduling priority for a pod
pub const BANDWIDTH_PRIORITY: &str = "nodenet.io/bandwidth-priority";

/// Annotation disabling connection tracking for a given port on a pod
pub const NO_TRACK_PORT: &str = "nodenet.io/no-track-port";

/// Deprecated alias for [`NO_TRACK_PORT`], still honored on read
pub const NO_TRACK_PORT_ALIAS: &str = "policy.nodenet.io/no-track-port";

// ============================================================================
// Labels
// ============================================================================

/// Prefix of labels the agent derives itself; these never participate in
/// identity comparison and are stripped from pods before diffing.
pub const RESERVED_LABEL_PREFIX: &str = "io.nodenet.k8s";

/// Label key recording which pod a mirrored `NetEndpoint` belongs to
pub const NETENDPOINT_POD_LABEL: &str = "nodenet.io/pod";

// ============================================================================
// Datapath Defaults
// ============================================================================

/// Default lower bound of the reserved NodePort range; host ports inside
/// the range are rejected to avoid collisions with NodePort services.
pub const NODE_PORT_MIN_DEFAULT: u16 = 30000;

/// Default upper bound of the reserved NodePort range
pub const NODE_PORT_MAX_DEFAULT: u16 = 32767;

/// Controller name prefix for the per-endpoint label mirror task
pub const MIRROR_CONTROLLER_PREFIX: &str = "sync-pod-labels-with-net-endpoint";
