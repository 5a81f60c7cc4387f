// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Unit tests for the pod reconciler's application paths.

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::ipcache::Identity;
    use crate::pod::{PodKey, PodPhase};
    use crate::reconcilers::pod::PodReconciler;
    use crate::reconcilers::testutil::{harness, host_port, snapshot, TestHarness};
    use crate::source::Source;
    use std::net::IpAddr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn key(name: &str) -> PodKey {
        PodKey {
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    fn reconciler(h: &TestHarness) -> PodReconciler {
        PodReconciler::new(h.ctx.clone())
    }

    #[tokio::test]
    async fn test_add_creates_unmanaged_cache_entries() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        r.apply(snapshot("web", "u1", &["10.0.0.5", "fd00::5"]));

        assert_eq!(h.ctx.ipcache.len(), 2);
        let entry = h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap();
        assert_eq!(entry.identity, Identity::UNMANAGED);
        assert_eq!(entry.source, Source::Kubernetes);
        assert_eq!(entry.host_ip, ip("192.168.1.10"));
        let owner = entry.owner.unwrap();
        assert_eq!(owner.namespace, "default");
        assert_eq!(owner.name, "web");
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        pod.ports.push(host_port(80, 8080));

        r.apply(pod.clone());
        let cache_len = h.ctx.ipcache.len();
        let service_len = h.ctx.services.len();
        let entry = h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap();

        r.apply(pod);

        assert_eq!(h.ctx.ipcache.len(), cache_len);
        assert_eq!(h.ctx.services.len(), service_len);
        assert_eq!(h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap(), entry);
    }

    #[tokio::test]
    async fn test_add_local_pod_creates_host_port_services() {
        let h = harness(Config::default(), &["192.168.1.10", "192.168.1.11"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        pod.ports.push(host_port(80, 8080));
        r.apply(pod);

        // Two node addresses plus the IPv4 wildcard.
        assert_eq!(h.ctx.services.len(), 3);
    }

    #[tokio::test]
    async fn test_add_remote_pod_creates_no_services() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        pod.ports.push(host_port(80, 8080));
        pod.node_name = "node-9".to_string();
        r.apply(pod);

        assert!(h.ctx.services.is_empty());
        // Cache entries are node-global and still created.
        assert_eq!(h.ctx.ipcache.len(), 1);
    }

    #[tokio::test]
    async fn test_host_network_add_skipped() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["192.168.1.10"]);
        pod.host_network = true;
        r.apply(pod);

        assert!(h.ctx.ipcache.is_empty());
        assert!(h.ctx.services.is_empty());
    }

    #[tokio::test]
    async fn test_host_network_pod_still_notifies_redirect_policy() {
        let h = harness(
            Config {
                enable_local_redirect_policy: true,
                ..Config::default()
            },
            &["192.168.1.10"],
        );
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["192.168.1.10"]);
        pod.host_network = true;
        r.apply(pod);

        // The host-data path skips host-networking pods, the hook fires.
        assert!(h.ctx.ipcache.is_empty());
        assert_eq!(h.redirect.added.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_host_ip_writes_nothing() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        pod.host_ip = String::new();
        r.apply(pod);

        assert!(h.ctx.ipcache.is_empty());
    }

    #[tokio::test]
    async fn test_named_ports_trigger_policy_recompute_once() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        let mut port = host_port(80, 8080);
        port.name = Some("http".to_string());
        pod.ports.push(port);

        r.apply(pod.clone());
        settle().await;
        assert_eq!(h.recomputer.count.load(Ordering::SeqCst), 1);

        // Identical re-apply is a no-op and must not trigger again.
        r.apply(pod);
        settle().await;
        assert_eq!(h.recomputer.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_noop_update_writes_nothing() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());
        let entry = h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap();

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::new(1);
        h.registry.register(key("web"), endpoint.clone());

        // Reserved-prefix label churn strips away to an identical snapshot.
        let mut same = pod.clone();
        same.labels
            .insert("io.nodenet.k8s.derived".to_string(), "x".to_string());
        r.apply(same);
        settle().await;

        assert_eq!(h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap(), entry);
        assert!(endpoint.label_updates.lock().unwrap().is_empty());
        assert!(endpoint.bandwidth_updates.lock().unwrap().is_empty());
        assert_eq!(h.recomputer.count.load(Ordering::SeqCst), 0);
        assert!(h.mirror_client.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ip_change_reconciles_cache_delta() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let mut moved = pod;
        moved.pod_ips = vec![ip("10.0.0.6")];
        r.apply(moved);

        assert!(h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).is_none());
        assert!(h.ctx.ipcache.lookup_by_ip(ip("10.0.0.6")).is_some());
        assert_eq!(h.ctx.ipcache.len(), 1);
    }

    #[tokio::test]
    async fn test_label_change_relabels_endpoint_and_mirrors() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::new(1);
        h.registry.register(key("web"), endpoint.clone());

        let mut relabeled = pod;
        relabeled
            .labels
            .insert("app".to_string(), "web".to_string());
        r.apply(relabeled.clone());

        let updates = endpoint.label_updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.get("app"), Some(&"web".to_string()));

        // The mirror task replaces the full label set asynchronously.
        for _ in 0..200 {
            if !h.mirror_client.applied.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let applied = h.mirror_client.applied.lock().unwrap().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, relabeled.labels);
    }

    #[tokio::test]
    async fn test_uid_rotation_treated_as_label_change() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::new(1);
        h.registry.register(key("web"), endpoint.clone());

        // Identical labels, rotated UID.
        let mut recreated = pod;
        recreated.uid = "u2".to_string();
        r.apply(recreated);

        assert_eq!(endpoint.label_updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_without_endpoint_is_silent() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let mut relabeled = pod;
        relabeled
            .labels
            .insert("app".to_string(), "web".to_string());
        // No endpoint registered: normal startup race, no panic, no error.
        r.apply(relabeled);

        assert_eq!(h.ctx.ipcache.len(), 1);
    }

    #[tokio::test]
    async fn test_bandwidth_annotation_updates_endpoint() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::new(1);
        h.registry.register(key("web"), endpoint.clone());

        let mut annotated = pod;
        annotated.annotations.insert(
            "kubernetes.io/egress-bandwidth".to_string(),
            "10M".to_string(),
        );
        r.apply(annotated);

        let updates = endpoint.bandwidth_updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.as_deref(), Some("10M"));
        assert_eq!(endpoint.regenerations.load(Ordering::SeqCst), 1);
        // Annotations never touch identity labels.
        assert!(endpoint.label_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_track_annotation_updates_endpoint() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::new(1);
        h.registry.register(key("web"), endpoint.clone());

        let mut annotated = pod;
        annotated
            .annotations
            .insert("nodenet.io/no-track-port".to_string(), "53".to_string());
        r.apply(annotated);

        let updates = endpoint.no_track_updates.lock().unwrap().clone();
        assert_eq!(updates, vec![Some("53".to_string())]);
    }

    #[tokio::test]
    async fn test_terminal_phase_forces_delete() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("job", "u1", &["10.0.0.5"]);
        pod.ports.push(host_port(80, 8080));
        r.apply(pod.clone());
        assert!(!h.ctx.ipcache.is_empty());
        assert!(!h.ctx.services.is_empty());

        // No delete notification is ever emitted for finished Jobs; the
        // phase transition alone must release everything.
        let mut finished = pod;
        finished.phase = PodPhase::Succeeded;
        r.apply(finished);

        assert!(h.ctx.ipcache.is_empty());
        assert!(h.ctx.services.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_phase_without_prior_snapshot() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("job", "u1", &["10.0.0.5"]);
        pod.phase = PodPhase::Failed;
        r.apply(pod);

        assert!(h.ctx.ipcache.is_empty());
    }

    #[tokio::test]
    async fn test_delete_event_releases_state() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let mut pod = snapshot("web", "u1", &["10.0.0.5"]);
        pod.ports.push(host_port(80, 8080));
        r.apply(pod.clone());

        r.handle_deleted(pod);

        assert!(h.ctx.ipcache.is_empty());
        assert!(h.ctx.services.is_empty());
    }

    #[tokio::test]
    async fn test_delete_event_falls_back_to_shadow_state() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        // The delete event arrives with the IPs already stripped.
        let mut stripped = pod;
        stripped.pod_ips = Vec::new();
        r.handle_deleted(stripped);

        assert!(h.ctx.ipcache.is_empty());
    }

    #[tokio::test]
    async fn test_stale_delete_spares_reassigned_ip() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        // podA owned the IP, then podB claimed it before podA's delete
        // event was processed.
        let pod_a = snapshot("pod-a", "u1", &["10.0.0.5"]);
        r.apply(pod_a.clone());
        r.apply(snapshot("pod-b", "u2", &["10.0.0.5"]));

        r.handle_deleted(pod_a);

        let entry = h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap();
        assert_eq!(entry.owner.unwrap().name, "pod-b");
    }

    #[tokio::test]
    async fn test_delete_skips_foreign_source_entries() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        // The kvstore mirror overwrote the pod's entry with higher
        // authority; the pod delete must not remove it.
        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());
        let (_, res) = h.ctx.ipcache.upsert(
            ip("10.0.0.5"),
            crate::ipcache::CacheEntry {
                identity: crate::ipcache::Identity(99),
                source: Source::KvStore,
                owner: None,
                host_ip: ip("192.168.1.10"),
                named_ports: None,
                encrypt_key: None,
            },
        );
        res.unwrap();

        r.handle_deleted(pod);

        let entry = h.ctx.ipcache.lookup_by_ip(ip("10.0.0.5")).unwrap();
        assert_eq!(entry.source, Source::KvStore);
    }

    #[tokio::test]
    async fn test_update_for_unknown_key_is_treated_as_add() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        // The feed replayed an update for a pod this agent never saw.
        r.apply(snapshot("web", "u1", &["10.0.0.5"]));
        assert_eq!(h.ctx.ipcache.len(), 1);
    }

    #[tokio::test]
    async fn test_redirect_policy_update_hook() {
        let h = harness(
            Config {
                enable_local_redirect_policy: true,
                ..Config::default()
            },
            &["192.168.1.10"],
        );
        let r = reconciler(&h);

        let pod = snapshot("web", "u1", &["10.0.0.5"]);
        r.apply(pod.clone());

        let mut not_ready = pod;
        not_ready.ready = false;
        r.apply(not_ready);

        let updated = h.redirect.updated.lock().unwrap().clone();
        assert_eq!(updated.len(), 1);
        // Readiness flipped but nothing identity-affecting changed.
        assert_eq!(updated[0], ("default/web".to_string(), false, false));
    }

    #[tokio::test]
    async fn test_event_lag_recorded_on_add_with_existing_endpoint() {
        let h = harness(Config::default(), &["192.168.1.10"]);
        let r = reconciler(&h);

        let endpoint = crate::reconcilers::testutil::RecordingEndpoint::backdated(1, 300);
        h.registry.register(key("web"), endpoint);

        r.apply(snapshot("web", "u1", &["10.0.0.5"]));
        assert!(crate::metrics::EVENT_LAG_SECONDS.get() > 100.0);
    }
}
