// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! The pod reconciler: one ordered loop from the pod change feed to the
//! shared IP cache and service table.
//!
//! The loop owns a shadow map of the last-observed snapshot per pod; every
//! notification is diffed against it, the diff is applied, and the shadow
//! map is updated. The shadow map is updated even when application fails —
//! reprocessing a permanently failing diff forever would wedge the loop —
//! but the failure is logged and counted.
//!
//! Ordering: notifications for the same pod arrive and are processed in
//! commit order. Downstream effects (policy recompute, label mirroring) run
//! on their own tasks and never block this loop.

use crate::cache_errors::PodError;
use crate::constants::{BANDWIDTH_PRIORITY, EGRESS_BANDWIDTH, INGRESS_BANDWIDTH};
use crate::context::Context;
use crate::diff::{diff, PodDiff, UpdateDiff};
use crate::ipcache::{CacheEntry, EntryOwner, Identity};
use crate::labels::strip_special_labels;
use crate::metrics;
use crate::pod::{PodKey, PodSnapshot};
use crate::reconcilers::hostport;
use crate::source::Source;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// One notification from the pod change feed. Every event carries the full
/// object; the feed is at-least-once and may duplicate or reorder events
/// across different pods.
#[derive(Debug, Clone)]
pub enum PodEvent {
    /// Pod added or updated
    Applied(PodSnapshot),
    /// Pod deleted
    Deleted(PodSnapshot),
    /// The initial list/watch sync has completed
    InitialSyncDone,
}

type ShadowMap = HashMap<PodKey, PodSnapshot>;

/// Read accessor over the reconciler's pod state, gated on initial sync.
#[derive(Clone)]
pub struct PodStore {
    shadow: Arc<RwLock<ShadowMap>>,
    synced: watch::Receiver<bool>,
}

impl PodStore {
    /// Return the last-observed snapshot of a pod, waiting for the initial
    /// sync watermark first so a fresh agent does not answer "not found"
    /// for pods it simply has not listed yet.
    ///
    /// # Errors
    ///
    /// Returns [`PodError::NotFound`] when the pod is absent post-sync.
    pub async fn get_cached_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PodSnapshot, PodError> {
        let mut synced = self.synced.clone();
        while !*synced.borrow() {
            // A dropped sender means the reconciler is gone; answer from
            // whatever state we have.
            if synced.changed().await.is_err() {
                break;
            }
        }

        let key = PodKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.shadow
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or_else(|| PodError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    /// Whether the initial sync watermark has been observed.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }
}

/// The pod event loop and its application logic.
pub struct PodReconciler {
    ctx: Arc<Context>,
    shadow: Arc<RwLock<ShadowMap>>,
    synced_tx: watch::Sender<bool>,
    synced_rx: watch::Receiver<bool>,
}

impl PodReconciler {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        let (synced_tx, synced_rx) = watch::channel(false);
        Self {
            ctx,
            shadow: Arc::new(RwLock::new(HashMap::new())),
            synced_tx,
            synced_rx,
        }
    }

    /// Read accessor sharing this reconciler's shadow state.
    #[must_use]
    pub fn store(&self) -> PodStore {
        PodStore {
            shadow: self.shadow.clone(),
            synced: self.synced_rx.clone(),
        }
    }

    /// Drain the change feed until shutdown is signalled or the feed ends.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<PodEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting pod reconciler");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        None => break,
                        Some(PodEvent::InitialSyncDone) => {
                            if !*self.synced_rx.borrow() {
                                info!("Initial pod sync complete");
                            }
                            self.synced_tx.send_replace(true);
                        }
                        Some(PodEvent::Applied(pod)) => self.apply(pod),
                        Some(PodEvent::Deleted(pod)) => self.handle_deleted(pod),
                    }
                }
            }
        }
        info!("Pod reconciler stopped");
    }

    /// Apply an add/update notification and record the new snapshot.
    pub fn apply(&self, new: PodSnapshot) {
        let key = new.key();
        let old = self
            .shadow
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        let result = match &old {
            None => match diff(None, &new) {
                PodDiff::Delete => {
                    metrics::record_pod_event("delete");
                    self.reconcile_delete(&new)
                }
                _ => {
                    metrics::record_pod_event("add");
                    self.reconcile_add(&new)
                }
            },
            Some(old_pod) => match diff(Some(old_pod), &new) {
                PodDiff::Delete => {
                    metrics::record_pod_event("delete");
                    self.reconcile_delete(&new)
                }
                PodDiff::Add => {
                    metrics::record_pod_event("add");
                    self.reconcile_add(&new)
                }
                PodDiff::Update(d) => {
                    metrics::record_pod_event("update");
                    self.reconcile_update(old_pod, &new, &d)
                }
            },
        };

        // The snapshot is recorded even when application failed, so the
        // loop cannot wedge on a permanently failing diff.
        self.shadow
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), new);

        if let Err(err) = result {
            debug!(pod = %key, error = %err, "Pod notification processed with errors");
        }
    }

    /// Apply a delete notification and drop the shadow entry.
    pub fn handle_deleted(&self, pod: PodSnapshot) {
        let key = pod.key();
        metrics::record_pod_event("delete");

        // The delete event's object may already be stripped of its IPs;
        // the shadow snapshot is the last-known state to clean up from.
        let effective = if pod.pod_ips.is_empty() {
            self.shadow
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&key)
                .cloned()
                .unwrap_or(pod)
        } else {
            pod
        };

        let _ = self.reconcile_delete(&effective);

        self.shadow
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    fn reconcile_add(&self, pod: &PodSnapshot) -> Result<(), PodError> {
        // If endpoints already exist, the CNI event raced ahead of the API
        // server; export how far the API event stream is lagging.
        let endpoints = self.ctx.endpoints.endpoints_by_pod(&pod.namespace, &pod.name);
        match endpoints.iter().map(|ep| ep.created_at()).min() {
            Some(earliest) => metrics::record_event_lag(earliest.elapsed()),
            None => metrics::reset_event_lag(),
        }

        if pod.host_network && !self.ctx.config.enable_local_redirect_policy {
            debug!(pod = %pod.key(), "Skip pod event using host networking");
            return Ok(());
        }

        let mut result = Ok(());
        if !pod.pod_ips.is_empty() {
            result = self.update_pod_host_data(None, pod);

            if self.ctx.config.enable_local_redirect_policy {
                self.ctx.redirect_policy.on_pod_added(pod);
            }
        }

        match &result {
            Err(err) => {
                warn!(pod = %pod.key(), error = %err, "Unable to update ipcache map entry on pod add");
            }
            Ok(()) => debug!(pod = %pod.key(), "Updated ipcache map entry on pod add"),
        }
        result
    }

    fn reconcile_update(
        &self,
        old: &PodSnapshot,
        new: &PodSnapshot,
        d: &UpdateDiff,
    ) -> Result<(), PodError> {
        if new.host_network
            && !self.ctx.config.enable_local_redirect_policy
            && !self.ctx.config.enable_socket_lb_tracing
        {
            debug!(pod = %new.key(), "Skip pod event using host networking");
            return Ok(());
        }

        if d.is_noop() {
            debug!(pod = %new.key(), "Pod update changed nothing, short-circuiting");
            return Ok(());
        }

        let mut result = Ok(());
        if !old.pod_ips.is_empty() || !new.pod_ips.is_empty() {
            result = self.update_pod_host_data(Some(old), new);
            if let Err(err) = &result {
                warn!(pod = %new.key(), error = %err, "Unable to update ipcache map entry on pod update");
            }
        }

        if self.ctx.config.enable_local_redirect_policy
            && (d.needs_reassign() || d.readiness_changed)
        {
            self.ctx
                .redirect_policy
                .on_pod_updated(new, d.needs_reassign(), new.ready);
        }

        if !d.identity_affecting() && !d.annotations.any() {
            debug!(pod = %new.key(), "Pod does not have any annotations nor labels changed");
            return result;
        }

        let endpoints = self.ctx.endpoints.endpoints_by_pod(&new.namespace, &new.name);
        if endpoints.is_empty() {
            // Expected during startup: the endpoint may not exist yet.
            debug!(pod = %new.key(), "Endpoint not found running for the given pod");
            return result;
        }

        let old_labels = strip_special_labels(&old.labels);
        let new_labels = strip_special_labels(&new.labels);

        for endpoint in endpoints {
            if d.identity_affecting() {
                // A UID rotation is handled like a label change: the pod
                // was recreated under the same name and its identity must
                // be refreshed even if the labels read the same.
                if let Err(err) = endpoint.update_labels(&old_labels, &new_labels) {
                    warn!(
                        pod = %new.key(),
                        endpoint = endpoint.id(),
                        error = %err,
                        "Unable to update endpoint labels on pod update"
                    );
                    return Err(PodError::EndpointLabels {
                        endpoint_id: endpoint.id(),
                        reason: err.to_string(),
                    });
                }

                if self.ctx.config.enable_endpoint_mirror {
                    self.ctx
                        .mirror
                        .schedule(endpoint.clone(), new.labels.clone());
                }
            }

            if d.annotations.any() {
                if d.annotations.bandwidth || d.annotations.priority {
                    endpoint.update_bandwidth_policy(
                        new.annotations.get(EGRESS_BANDWIDTH).map(String::as_str),
                        new.annotations.get(INGRESS_BANDWIDTH).map(String::as_str),
                        new.annotations.get(BANDWIDTH_PRIORITY).map(String::as_str),
                    );
                }
                if d.annotations.no_track {
                    endpoint.update_no_track_rules(new.no_track_value());
                }
                if endpoint.request_regeneration("annotations updated") {
                    debug!(
                        endpoint = endpoint.id(),
                        "Queued endpoint regeneration after annotation update"
                    );
                }
            }
        }

        result
    }

    fn reconcile_delete(&self, pod: &PodSnapshot) -> Result<(), PodError> {
        if self.ctx.config.enable_local_redirect_policy {
            self.ctx.redirect_policy.on_pod_deleted(pod);
        }

        // Pending label syncs are moot once the pod is gone.
        for endpoint in self.ctx.endpoints.endpoints_by_pod(&pod.namespace, &pod.name) {
            self.ctx.mirror.remove(endpoint.id());
        }

        let (skipped, result) = self.delete_pod_host_data(pod);
        match (&result, skipped) {
            (Err(err), true) => {
                debug!(pod = %pod.key(), error = %err, "Skipped ipcache map delete on pod delete");
            }
            (Err(err), false) => {
                warn!(pod = %pod.key(), error = %err, "Unable to delete ipcache map entry on pod delete");
            }
            (Ok(()), _) => debug!(pod = %pod.key(), "Deleted ipcache map entry on pod delete"),
        }
        result
    }

    /// Reconcile cache entries (and, for local pods, host-port services)
    /// with the pod's current IP set.
    fn update_pod_host_data(
        &self,
        old: Option<&PodSnapshot>,
        new: &PodSnapshot,
    ) -> Result<(), PodError> {
        if new.host_network {
            debug!(pod = %new.key(), "Pod is using host networking");
            return Ok(());
        }

        let ips_equal = old.is_some_and(|o| o.ips_equal(new));
        let mut named_ports_changed = false;

        let result = self.write_pod_host_data(old, new, ips_equal, &mut named_ports_changed);

        // Old IPs that were not re-added are dropped regardless of whether
        // the writes above succeeded: no later event will carry them again.
        if !ips_equal {
            if let Some(old_pod) = old {
                for ip in &old_pod.pod_ips {
                    if !new.pod_ips.contains(ip)
                        && self.ctx.ipcache.delete(*ip, Source::Kubernetes)
                    {
                        named_ports_changed = true;
                    }
                }
            }
        }

        // Fires at most once per notification; repeated triggers coalesce
        // downstream anyway.
        if named_ports_changed {
            self.ctx
                .policy_trigger
                .trigger("named ports added or updated");
        }

        result
    }

    fn write_pod_host_data(
        &self,
        old: Option<&PodSnapshot>,
        new: &PodSnapshot,
        ips_equal: bool,
        named_ports_changed: &mut bool,
    ) -> Result<(), PodError> {
        let spec_equal = old.is_some_and(|o| o.spec_equal(new));
        let host_ip_equal = old.is_some_and(|o| o.host_ip == new.host_ip);

        // If spec, host IP, and pod IPs are all unchanged there is nothing
        // left to write.
        if spec_equal && host_ip_equal && ips_equal {
            return Ok(());
        }

        let host_ip: IpAddr = new.host_ip.parse().map_err(|_| PodError::InvalidHostIp {
            host_ip: new.host_ip.clone(),
        })?;

        let encrypt_key = self.ctx.node.encrypt_key_index();
        let named_ports = new.named_ports();

        let mut errors = Vec::new();
        for pod_ip in &new.pod_ips {
            // Initial podIP→hostIP→identity mapping. The allocator
            // re-upserts with the real identity later; an endpoint that
            // stays unmanaged keeps the placeholder.
            let entry = CacheEntry {
                identity: Identity::UNMANAGED,
                source: Source::Kubernetes,
                owner: Some(EntryOwner {
                    namespace: new.namespace.clone(),
                    name: new.name.clone(),
                }),
                host_ip,
                named_ports: named_ports.clone(),
                encrypt_key,
            };

            let (npc, outcome) = self.ctx.ipcache.upsert(*pod_ip, entry);
            if npc {
                *named_ports_changed = true;
            }
            if let Err(err) = outcome {
                // Rejections from faster-propagating sources are routine
                // startup races; everything else is a real conflict.
                if err.is_expected() {
                    debug!(pod = %new.key(), ip = %pod_ip, error = %err, "Expected cross-source overwrite rejection");
                } else {
                    errors.push(format!("ipcache entry for pod IP {pod_ip}: {err}"));
                }
            }
        }
        if !errors.is_empty() {
            return Err(PodError::CacheWrites { errors });
        }

        // Host-port services exist only for pods scheduled on this node,
        // and only need rework when the spec or the IP set changed.
        if new.node_name == self.ctx.node.node_name() && (!spec_equal || !ips_equal) {
            if hostport::upsert_host_port_services(&self.ctx, old, new).is_err() {
                return Err(PodError::HostPortUpsert {
                    pod_ips: new
                        .pod_ips
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }

        Ok(())
    }

    /// Remove the pod's services and cache entries. Returns whether any
    /// unit was skipped (host networking, missing entry, foreign source, or
    /// refused ownership check) alongside the aggregated per-IP errors.
    fn delete_pod_host_data(&self, pod: &PodSnapshot) -> (bool, Result<(), PodError>) {
        if pod.host_network {
            // No entries are ever created for host-networking pods.
            debug!(pod = %pod.key(), "Pod is using host networking");
            return (true, Ok(()));
        }

        if pod.pod_ips.is_empty() {
            return (true, Ok(()));
        }

        // Services first: a service ownership check racing the cache delete
        // for the same IP must not observe a dangling service.
        hostport::delete_host_port_services(&self.ctx, pod);

        let mut errors = Vec::new();
        let mut skipped = false;
        for pod_ip in &pod.pod_ips {
            let Some(entry) = self.ctx.ipcache.lookup_by_ip(*pod_ip) else {
                skipped = true;
                errors.push(format!("identity for IP {pod_ip} does not exist in cache"));
                continue;
            };
            if entry.source != Source::Kubernetes {
                skipped = true;
                errors.push(format!(
                    "ipcache entry for IP {pod_ip} not owned by the orchestrator source"
                ));
                continue;
            }
            if !self.ctx.ipcache.delete_on_owner_match(
                *pod_ip,
                Source::Kubernetes,
                &pod.namespace,
                &pod.name,
            ) {
                skipped = true;
                debug!(pod = %pod.key(), ip = %pod_ip, "Skipped ipcache delete, entry reclaimed by a newer owner");
            }
        }

        if errors.is_empty() {
            (skipped, Ok(()))
        } else {
            (skipped, Err(PodError::CacheWrites { errors }))
        }
    }
}

#[cfg(test)]
#[path = "pod_tests.rs"]
mod pod_tests;
