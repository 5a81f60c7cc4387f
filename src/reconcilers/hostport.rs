// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Host-port service derivation and reconciliation.
//!
//! Each declared container port with a host port becomes one load-balancer
//! service per resolved frontend address. A declared host IP pins the
//! frontend to that single address (loopback collapses to the wildcard with
//! the loopback-surrogate flag set); otherwise the frontend replicates
//! across every NodePort-eligible node address plus both wildcards,
//! filtered by enabled address family. Host ports colliding with the
//! reserved NodePort range are skipped.
//!
//! Service names encode the owning pod's name, UID, and port, so the
//! ownership check on deletion can tell a stale record from one a newer pod
//! has claimed.

use crate::cache_errors::ServiceError;
use crate::config::Config;
use crate::context::Context;
use crate::node::NodeAddressing;
use crate::pod::PodSnapshot;
use crate::service::{
    Backend, Frontend, ServiceKind, ServiceName, ServiceRecord, TrafficPolicy,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, error, warn};

/// Name of the host-port service owned by `pod` for `port`.
#[must_use]
pub fn host_port_service_name(pod: &PodSnapshot, port: u16) -> ServiceName {
    ServiceName {
        namespace: pod.namespace.clone(),
        name: format!("{}/pod-id/{}/host-port/{}", pod.name, pod.uid, port),
    }
}

/// Derive the full host-port service set for a pod snapshot.
#[must_use]
pub fn generate_services(
    config: &Config,
    node: &dyn NodeAddressing,
    pod: &PodSnapshot,
) -> Vec<ServiceRecord> {
    let mut services = Vec::new();

    for port in &pod.ports {
        let Some(host_port) = port.host_port else {
            continue;
        };

        if config.in_node_port_range(host_port) {
            warn!(
                pod = %pod.key(),
                host_port,
                range_min = config.node_port_min,
                range_max = config.node_port_max,
                "Requested host port collides with the configured NodePort range, ignoring"
            );
            continue;
        }

        let mut backends_v4 = Vec::new();
        let mut backends_v6 = Vec::new();
        for ip in &pod.pod_ips {
            let backend = Backend {
                addr: *ip,
                port: port.container_port,
                protocol: port.protocol,
            };
            match ip {
                IpAddr::V4(_) => backends_v4.push(backend),
                IpAddr::V6(_) => backends_v6.push(backend),
            }
        }

        // An explicit host IP pins the frontend to that address only. A
        // loopback host IP is collapsed into the wildcard surrogate so the
        // datapath handling stays uniform; it is not exposed externally.
        let mut loopback_surrogate = false;
        let declared = port
            .host_ip
            .as_deref()
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .filter(|addr| !addr.is_unspecified());
        let frontend_addrs: Vec<IpAddr> = match declared {
            Some(addr) if addr.is_loopback() => {
                loopback_surrogate = true;
                vec![match addr {
                    IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                }]
            }
            Some(addr) => vec![addr],
            None => {
                let mut addrs = node.node_port_addresses();
                addrs.push(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
                addrs.push(IpAddr::V6(Ipv6Addr::UNSPECIFIED));
                addrs
            }
        };

        for addr in frontend_addrs {
            let (family_enabled, backends) = match addr {
                IpAddr::V4(_) => (config.enable_ipv4, &backends_v4),
                IpAddr::V6(_) => (config.enable_ipv6, &backends_v6),
            };
            if !family_enabled || backends.is_empty() {
                continue;
            }

            services.push(ServiceRecord {
                frontend: Frontend {
                    addr,
                    port: host_port,
                    protocol: port.protocol,
                },
                name: host_port_service_name(pod, host_port),
                kind: ServiceKind::HostPort,
                backends: backends.clone(),
                ext_traffic_policy: TrafficPolicy::Cluster,
                int_traffic_policy: TrafficPolicy::Cluster,
                loopback_surrogate,
            });
        }
    }

    services
}

/// Reconcile the service table with a pod's current host-port set.
///
/// New services are upserted first; on update, every frontend from the old
/// snapshot's set that the new set no longer claims is then deleted with
/// ownership verification. The stale deletes run even when an upsert
/// failed: no later event will carry the old addresses again.
///
/// # Errors
///
/// Returns the first upsert rejection (frontend owned by another pod's
/// service); remaining cleanup still runs.
pub(crate) fn upsert_host_port_services(
    ctx: &Context,
    old: Option<&PodSnapshot>,
    new: &PodSnapshot,
) -> Result<(), ServiceError> {
    if !ctx.config.enable_host_port {
        return Ok(());
    }

    let services = generate_services(&ctx.config, ctx.node.as_ref(), new);
    let added: Vec<Frontend> = if old.is_some() {
        services.iter().map(|svc| svc.frontend).collect()
    } else {
        Vec::new()
    };

    let mut result = Ok(());
    for svc in services {
        let frontend = svc.frontend;
        if let Err(err) = ctx.services.upsert(svc) {
            error!(
                pod = %new.key(),
                frontend = %frontend,
                error = %err,
                "Error while inserting host-port service"
            );
            result = Err(err);
            break;
        }
    }

    if let Some(old_pod) = old {
        for svc in generate_services(&ctx.config, ctx.node.as_ref(), old_pod) {
            if added.contains(&svc.frontend) {
                continue;
            }
            if !ctx
                .services
                .delete_on_owner_match(&svc.frontend, &svc.name, &svc.backends)
            {
                debug!(
                    pod = %new.key(),
                    frontend = %svc.frontend,
                    "Skipped stale host-port service delete, ownership changed"
                );
            }
        }
    }

    result
}

/// Delete all host-port services derived from a pod's last known state,
/// each guarded by the ownership check.
pub(crate) fn delete_host_port_services(ctx: &Context, pod: &PodSnapshot) {
    if !ctx.config.enable_host_port {
        return;
    }

    for svc in generate_services(&ctx.config, ctx.node.as_ref(), pod) {
        if !ctx
            .services
            .delete_on_owner_match(&svc.frontend, &svc.name, &svc.backends)
        {
            debug!(
                pod = %pod.key(),
                frontend = %svc.frontend,
                "Skipped host-port service delete, ownership changed"
            );
        }
    }
}

#[cfg(test)]
#[path = "hostport_tests.rs"]
mod hostport_tests;
