// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Shared fakes and builders for reconciler tests.

use crate::config::Config;
use crate::context::Context;
use crate::endpoint::{Endpoint, EndpointRegistry, MirrorTarget};
use crate::node::StaticNodeAddressing;
use crate::pod::{ContainerPortSpec, PodSnapshot};
use crate::reconcilers::mirror::{LabelMirror, MirrorClient};
use crate::reconcilers::policy::{PolicyRecomputer, PolicyTrigger};
use crate::redirect::RedirectPolicyHooks;
use crate::service::Protocol;
use crate::{ipcache::IpCache, service::ServiceTable};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Endpoint fake recording every call made to it.
pub(crate) struct RecordingEndpoint {
    pub id: u64,
    pub created: Instant,
    pub target: Option<MirrorTarget>,
    pub fail_label_update: bool,
    pub label_updates: Mutex<Vec<(BTreeMap<String, String>, BTreeMap<String, String>)>>,
    pub bandwidth_updates: Mutex<Vec<(Option<String>, Option<String>, Option<String>)>>,
    pub no_track_updates: Mutex<Vec<Option<String>>>,
    pub regenerations: AtomicUsize,
}

impl RecordingEndpoint {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Self::with_created(id, Instant::now())
    }

    /// Endpoint that pretends to have been created `secs` seconds ago.
    pub(crate) fn backdated(id: u64, secs: u64) -> Arc<Self> {
        let created = Instant::now()
            .checked_sub(std::time::Duration::from_secs(secs))
            .unwrap_or_else(Instant::now);
        Self::with_created(id, created)
    }

    fn with_created(id: u64, created: Instant) -> Arc<Self> {
        Arc::new(Self {
            id,
            created,
            target: Some(MirrorTarget {
                namespace: "default".to_string(),
                name: format!("ep-{id}"),
            }),
            fail_label_update: false,
            label_updates: Mutex::new(Vec::new()),
            bandwidth_updates: Mutex::new(Vec::new()),
            no_track_updates: Mutex::new(Vec::new()),
            regenerations: AtomicUsize::new(0),
        })
    }
}

impl Endpoint for RecordingEndpoint {
    fn id(&self) -> u64 {
        self.id
    }

    fn created_at(&self) -> Instant {
        self.created
    }

    fn update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        if self.fail_label_update {
            anyhow::bail!("endpoint is being deleted");
        }
        self.label_updates
            .lock()
            .unwrap()
            .push((old.clone(), new.clone()));
        Ok(())
    }

    fn update_bandwidth_policy(
        &self,
        egress: Option<&str>,
        ingress: Option<&str>,
        priority: Option<&str>,
    ) {
        self.bandwidth_updates.lock().unwrap().push((
            egress.map(ToString::to_string),
            ingress.map(ToString::to_string),
            priority.map(ToString::to_string),
        ));
    }

    fn update_no_track_rules(&self, port: Option<&str>) {
        self.no_track_updates
            .lock()
            .unwrap()
            .push(port.map(ToString::to_string));
    }

    fn request_regeneration(&self, _reason: &str) -> bool {
        self.regenerations.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn mirror_target(&self) -> Option<MirrorTarget> {
        self.target.clone()
    }
}

/// Redirect-policy fake recording notifications.
#[derive(Default)]
pub(crate) struct RecordingRedirect {
    pub added: Mutex<Vec<String>>,
    pub updated: Mutex<Vec<(String, bool, bool)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl RedirectPolicyHooks for RecordingRedirect {
    fn on_pod_added(&self, pod: &PodSnapshot) {
        self.added.lock().unwrap().push(pod.key().to_string());
    }

    fn on_pod_updated(&self, pod: &PodSnapshot, needs_reassign: bool, ready: bool) {
        self.updated
            .lock()
            .unwrap()
            .push((pod.key().to_string(), needs_reassign, ready));
    }

    fn on_pod_deleted(&self, pod: &PodSnapshot) {
        self.deleted.lock().unwrap().push(pod.key().to_string());
    }
}

/// Policy recomputer fake counting invocations.
#[derive(Default)]
pub(crate) struct CountingRecomputer {
    pub count: AtomicUsize,
}

#[async_trait]
impl PolicyRecomputer for CountingRecomputer {
    async fn recompute(&self, _reason: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mirror client fake recording applied label sets.
#[derive(Default)]
pub(crate) struct RecordingMirrorClient {
    pub applied: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

#[async_trait]
impl MirrorClient for RecordingMirrorClient {
    async fn replace_labels(
        &self,
        _namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.applied
            .lock()
            .unwrap()
            .push((name.to_string(), labels.clone()));
        Ok(())
    }
}

/// Fully wired test context plus handles to every fake for assertions.
pub(crate) struct TestHarness {
    pub ctx: Arc<Context>,
    pub registry: Arc<EndpointRegistry>,
    pub redirect: Arc<RecordingRedirect>,
    pub recomputer: Arc<CountingRecomputer>,
    pub mirror_client: Arc<RecordingMirrorClient>,
    pub policy_task: JoinHandle<()>,
}

/// Build a context around fakes. Requires a tokio runtime (the policy
/// trigger spawns its consumer task).
pub(crate) fn harness(config: Config, node_addrs: &[&str]) -> TestHarness {
    let registry = Arc::new(EndpointRegistry::new());
    let redirect = Arc::new(RecordingRedirect::default());
    let recomputer = Arc::new(CountingRecomputer::default());
    let mirror_client = Arc::new(RecordingMirrorClient::default());

    let (policy_trigger, policy_task) = PolicyTrigger::new(recomputer.clone());

    let addresses: Vec<IpAddr> = node_addrs.iter().map(|a| a.parse().unwrap()).collect();
    let ctx = Arc::new(Context {
        config,
        ipcache: Arc::new(IpCache::new()),
        services: Arc::new(ServiceTable::new()),
        endpoints: registry.clone(),
        node: Arc::new(StaticNodeAddressing::new(
            addresses,
            "node-1".to_string(),
            None,
        )),
        redirect_policy: redirect.clone(),
        policy_trigger,
        mirror: Arc::new(LabelMirror::new(mirror_client.clone())),
    });

    TestHarness {
        ctx,
        registry,
        redirect,
        recomputer,
        mirror_client,
        policy_task,
    }
}

/// Running, ready pod snapshot on node-1 with the given validated IPs.
pub(crate) fn snapshot(name: &str, uid: &str, ips: &[&str]) -> PodSnapshot {
    PodSnapshot {
        namespace: "default".to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        pod_ips: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
        host_ip: "192.168.1.10".to_string(),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
        ports: Vec::new(),
        phase: crate::pod::PodPhase::Running,
        ready: true,
        host_network: false,
        node_name: "node-1".to_string(),
    }
}

/// TCP container port with a host port, as a regular container declares it.
pub(crate) fn host_port(container_port: u16, host_port: u16) -> ContainerPortSpec {
    ContainerPortSpec {
        container_port,
        protocol: Protocol::Tcp,
        name: None,
        host_port: Some(host_port),
        host_ip: None,
        init: false,
    }
}
