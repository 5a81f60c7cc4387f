// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Label mirror: keep `NetEndpoint` metadata labels in sync with the pod.
//!
//! Every identity-affecting pod change replaces the full label set on the
//! pod's mirrored [`NetEndpoint`](crate::crd::NetEndpoint) object with one
//! atomic JSON patch. The sync runs as a background task keyed by endpoint
//! ID: scheduling a new sync for an endpoint replaces any sync still in
//! flight, so only the latest label set ever wins, and removing the
//! endpoint cancels its task.
//!
//! Failures are retried with exponential backoff until the retry budget is
//! spent; the reconciler loop is never blocked.

use crate::constants::MIRROR_CONTROLLER_PREFIX;
use crate::crd::NetEndpoint;
use crate::endpoint::Endpoint;
use crate::metrics;
use crate::reconcilers::retry::mirror_backoff;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Write seam for the mirror; production patches the API server.
#[async_trait]
pub trait MirrorClient: Send + Sync {
    /// Replace the full label set on a `NetEndpoint` in one atomic patch.
    ///
    /// # Errors
    ///
    /// Returns an error when the patch fails; the caller retries.
    async fn replace_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<()>;
}

/// Production mirror client backed by the Kubernetes API.
pub struct KubeMirrorClient {
    client: Client,
}

impl KubeMirrorClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MirrorClient for KubeMirrorClient {
    async fn replace_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let api: Api<NetEndpoint> = Api::namespaced(self.client.clone(), namespace);
        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            { "op": "replace", "path": "/metadata/labels", "value": labels }
        ]))?;
        api.patch(name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await?;
        Ok(())
    }
}

/// Single-flight, per-endpoint label sync scheduler.
pub struct LabelMirror {
    client: Arc<dyn MirrorClient>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl LabelMirror {
    #[must_use]
    pub fn new(client: Arc<dyn MirrorClient>) -> Self {
        Self {
            client,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a label sync for `endpoint`.
    ///
    /// Any sync already in flight for the same endpoint is cancelled and
    /// replaced; the new task carries the full label set and retries until
    /// it lands or the backoff budget runs out.
    pub fn schedule(&self, endpoint: Arc<dyn Endpoint>, labels: BTreeMap<String, String>) {
        let endpoint_id = endpoint.id();
        let client = self.client.clone();

        let task = tokio::spawn(async move {
            let controller = format!("{MIRROR_CONTROLLER_PREFIX} ({endpoint_id})");
            let mut backoff = mirror_backoff();
            loop {
                let outcome = match endpoint.mirror_target() {
                    Some(target) => client
                        .replace_labels(&target.namespace, &target.name, &labels)
                        .await
                        .map(|()| target),
                    // The backing object can appear later; treat like a
                    // transient failure and retry.
                    None => Err(anyhow::anyhow!("endpoint has no backing NetEndpoint")),
                };

                match outcome {
                    Ok(target) => {
                        metrics::record_mirror_sync("success");
                        debug!(
                            controller,
                            netendpoint = %format!("{}/{}", target.namespace, target.name),
                            "Replaced NetEndpoint labels"
                        );
                        return;
                    }
                    Err(err) => match backoff.next_backoff() {
                        Some(delay) => {
                            metrics::record_mirror_sync("retry");
                            debug!(
                                controller,
                                error = %err,
                                retry_after = ?delay,
                                "NetEndpoint label sync failed, will retry"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            metrics::record_mirror_sync("gave-up");
                            warn!(
                                controller,
                                error = %err,
                                "NetEndpoint label sync failed, retry budget spent"
                            );
                            return;
                        }
                    },
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = tasks.insert(endpoint_id, task) {
            previous.abort();
        }
    }

    /// Cancel and drop the sync task for an endpoint, if any. Called when
    /// the endpoint is destroyed.
    pub fn remove(&self, endpoint_id: u64) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = tasks.remove(&endpoint_id) {
            task.abort();
        }
    }

    /// Number of sync tasks currently tracked (finished tasks are swept on
    /// the next schedule).
    #[must_use]
    pub fn tracked_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod mirror_tests;
