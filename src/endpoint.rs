// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Seams to the endpoint subsystem.
//!
//! The reconciler never owns endpoints; it looks them up by pod and pushes
//! label and annotation deltas through the [`Endpoint`] trait. The datapath
//! side (CNI plugin handling) registers endpoints with the
//! [`EndpointRegistry`], which is the production [`EndpointManager`].

use crate::pod::PodKey;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The mirrored identity object an endpoint is backed by, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub namespace: String,
    pub name: String,
}

/// One local workload endpoint.
///
/// Implementations push updates into the datapath; the reconciler only
/// calls them, it never blocks on their effects.
pub trait Endpoint: Send + Sync {
    /// Stable endpoint ID, unique on this node.
    fn id(&self) -> u64;

    /// When the endpoint was created locally. Used to measure how far the
    /// API server's pod events lag behind the CNI events.
    fn created_at(&self) -> Instant;

    /// Replace the endpoint's orchestrator-sourced identity labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is being deleted or the label
    /// transition is rejected.
    fn update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;

    /// Apply new bandwidth annotations (egress, ingress, priority).
    fn update_bandwidth_policy(
        &self,
        egress: Option<&str>,
        ingress: Option<&str>,
        priority: Option<&str>,
    );

    /// Apply the no-conntrack port annotation.
    fn update_no_track_rules(&self, port: Option<&str>);

    /// Request a datapath-less regeneration of the endpoint.
    ///
    /// Returns `false` when the endpoint refused the state transition
    /// (being deleted, or a regeneration is already queued); that is not an
    /// error.
    fn request_regeneration(&self, reason: &str) -> bool;

    /// The `NetEndpoint` object mirroring this endpoint, if one exists yet.
    fn mirror_target(&self) -> Option<MirrorTarget>;
}

/// Lookup seam the reconciler depends on.
pub trait EndpointManager: Send + Sync {
    /// All endpoints currently associated with the given pod.
    fn endpoints_by_pod(&self, namespace: &str, name: &str) -> Vec<Arc<dyn Endpoint>>;
}

/// In-process endpoint registry; the production [`EndpointManager`].
///
/// The datapath side registers endpoints as CNI events arrive and removes
/// them on teardown.
#[derive(Default)]
pub struct EndpointRegistry {
    inner: RwLock<HashMap<PodKey, Vec<Arc<dyn Endpoint>>>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an endpoint with a pod.
    pub fn register(&self, pod: PodKey, endpoint: Arc<dyn Endpoint>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.entry(pod).or_default().push(endpoint);
    }

    /// Remove an endpoint by ID; drops the pod entry when it was the last.
    pub fn unregister(&self, pod: &PodKey, endpoint_id: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut drop_entry = false;
        if let Some(endpoints) = inner.get_mut(pod) {
            endpoints.retain(|ep| ep.id() != endpoint_id);
            drop_entry = endpoints.is_empty();
        }
        if drop_entry {
            inner.remove(pod);
        }
    }
}

impl EndpointManager for EndpointRegistry {
    fn endpoints_by_pod(&self, namespace: &str, name: &str) -> Vec<Arc<dyn Endpoint>> {
        let key = PodKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }
}
