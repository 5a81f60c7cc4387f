// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Immutable pod observations.
//!
//! A [`PodSnapshot`] is the agent's record of one observed generation of a
//! pod: everything the reconciler needs, extracted once from the API object
//! and never mutated. Snapshots live in the reconciler's shadow map and are
//! the inputs to the pure differ in [`crate::diff`].
//!
//! Extraction is where validation happens: IP strings that do not parse are
//! dropped, ports with invalid protocols or out-of-range numbers are
//! skipped with a warning. Downstream code never re-validates.

use crate::constants::{NO_TRACK_PORT, NO_TRACK_PORT_ALIAS};
use crate::ipcache::{NamedPortMap, PortProto};
use crate::service::Protocol;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use tracing::warn;

/// Identifies a pod across notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle phase as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Terminal phases release the pod's IPs even though the object may
    /// linger in the API (Jobs are never deleted unless their owner is).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// One declared container port, already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerPortSpec {
    pub container_port: u16,
    pub protocol: Protocol,
    pub name: Option<String>,
    pub host_port: Option<u16>,
    /// Raw declared host IP; parsed at use because an unparsable value
    /// falls back to all-node-address exposure
    pub host_ip: Option<String>,
    /// Whether the port was declared on an init container. Init containers
    /// expose host ports but do not contribute named ports.
    pub init: bool,
}

/// Immutable record of one observed pod generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodSnapshot {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// Validated pod IPs; order-insignificant
    pub pod_ips: Vec<IpAddr>,
    /// Raw host IP string from the pod status; may be empty
    pub host_ip: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ports: Vec<ContainerPortSpec>,
    pub phase: PodPhase,
    pub ready: bool,
    pub host_network: bool,
    pub node_name: String,
}

impl PodSnapshot {
    /// Extract a snapshot from a Kubernetes pod object.
    ///
    /// IPs that fail to parse and ports with invalid protocols or numbers
    /// are logged and dropped; the rest of the pod is still usable.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Self {
        let metadata = &pod.metadata;
        let namespace = metadata.namespace.clone().unwrap_or_default();
        let name = metadata.name.clone().unwrap_or_default();

        let spec = pod.spec.as_ref();
        let status = pod.status.as_ref();

        let mut pod_ips = Vec::new();
        let declared: Vec<&str> = match status.and_then(|s| s.pod_ips.as_ref()) {
            Some(ips) if !ips.is_empty() => ips.iter().map(|p| p.ip.as_str()).collect(),
            _ => status
                .and_then(|s| s.pod_ip.as_deref())
                .into_iter()
                .collect(),
        };
        for raw in declared {
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<IpAddr>() {
                Ok(ip) => {
                    if !pod_ips.contains(&ip) {
                        pod_ips.push(ip);
                    }
                }
                Err(_) => {
                    warn!(pod = %format!("{namespace}/{name}"), ip = raw, "Dropping unparsable pod IP");
                }
            }
        }

        let mut ports = Vec::new();
        if let Some(spec) = spec {
            let init_ports = spec
                .init_containers
                .iter()
                .flatten()
                .map(|c| (c, true));
            let container_ports = spec.containers.iter().map(|c| (c, false));
            for (container, init) in init_ports.chain(container_ports) {
                for p in container.ports.iter().flatten() {
                    let protocol = match p.protocol.as_deref().unwrap_or("TCP").parse::<Protocol>()
                    {
                        Ok(proto) => proto,
                        Err(err) => {
                            warn!(
                                pod = %format!("{namespace}/{name}"),
                                container = %container.name,
                                error = %err,
                                "Skipping container port with invalid protocol"
                            );
                            continue;
                        }
                    };
                    let Ok(container_port) = u16::try_from(p.container_port) else {
                        warn!(
                            pod = %format!("{namespace}/{name}"),
                            container = %container.name,
                            port = p.container_port,
                            "Skipping container port outside the u16 range"
                        );
                        continue;
                    };
                    ports.push(ContainerPortSpec {
                        container_port,
                        protocol,
                        name: p.name.clone(),
                        host_port: p
                            .host_port
                            .and_then(|hp| u16::try_from(hp).ok())
                            .filter(|hp| *hp > 0),
                        host_ip: p.host_ip.clone().filter(|ip| !ip.is_empty()),
                        init,
                    });
                }
            }
        }

        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });

        PodSnapshot {
            namespace,
            name,
            uid: metadata.uid.clone().unwrap_or_default(),
            pod_ips,
            host_ip: status
                .and_then(|s| s.host_ip.clone())
                .unwrap_or_default(),
            labels: metadata.labels.clone().unwrap_or_default(),
            annotations: metadata.annotations.clone().unwrap_or_default(),
            ports,
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            ready,
            host_network: spec.and_then(|s| s.host_network).unwrap_or(false),
            node_name: spec
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
        }
    }

    /// The shadow-map key for this pod.
    #[must_use]
    pub fn key(&self) -> PodKey {
        PodKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether the pod still holds its IPs (not in a terminal phase).
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.phase.is_terminal()
    }

    /// Set comparison of validated pod IPs.
    #[must_use]
    pub fn ips_equal(&self, other: &PodSnapshot) -> bool {
        self.pod_ips.len() == other.pod_ips.len()
            && self.pod_ips.iter().all(|ip| other.pod_ips.contains(ip))
    }

    /// Spec-portion comparison: ports, host networking, and placement.
    /// Status fields never participate.
    #[must_use]
    pub fn spec_equal(&self, other: &PodSnapshot) -> bool {
        self.ports == other.ports
            && self.host_network == other.host_network
            && self.node_name == other.node_name
    }

    /// Named-port table from regular (non-init) containers, if any port
    /// carries a name.
    #[must_use]
    pub fn named_ports(&self) -> Option<NamedPortMap> {
        let mut map = NamedPortMap::new();
        for port in self.ports.iter().filter(|p| !p.init) {
            if let Some(port_name) = &port.name {
                map.insert(
                    port_name.clone(),
                    PortProto {
                        port: port.container_port,
                        proto: port.protocol,
                    },
                );
            }
        }
        if map.is_empty() {
            None
        } else {
            Some(map)
        }
    }

    /// Value of the no-conntrack annotation, honoring the deprecated alias.
    #[must_use]
    pub fn no_track_value(&self) -> Option<&str> {
        self.annotations
            .get(NO_TRACK_PORT)
            .or_else(|| self.annotations.get(NO_TRACK_PORT_ALIAS))
            .map(String::as_str)
    }
}

#[cfg(test)]
#[path = "pod_tests.rs"]
mod pod_tests;
