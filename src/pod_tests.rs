// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Unit tests for pod snapshot extraction.

#[cfg(test)]
mod tests {
    use crate::pod::{PodPhase, PodSnapshot};
    use crate::service::Protocol;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, Pod, PodCondition, PodIP, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::net::IpAddr;

    fn base_pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                host_ip: Some("192.168.1.10".to_string()),
                pod_ips: Some(vec![PodIP {
                    ip: "10.0.0.5".to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    fn container_with_port(name: &str, port: ContainerPort) -> Container {
        Container {
            name: name.to_string(),
            ports: Some(vec![port]),
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_extraction() {
        let snapshot = PodSnapshot::from_pod(&base_pod());

        assert_eq!(snapshot.namespace, "default");
        assert_eq!(snapshot.name, "web");
        assert_eq!(snapshot.uid, "uid-1");
        assert_eq!(snapshot.host_ip, "192.168.1.10");
        assert_eq!(snapshot.node_name, "node-1");
        assert_eq!(snapshot.phase, PodPhase::Running);
        assert!(snapshot.is_running());
        assert!(!snapshot.host_network);
        assert_eq!(
            snapshot.pod_ips,
            vec!["10.0.0.5".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_unparsable_ip_dropped() {
        let mut pod = base_pod();
        pod.status.as_mut().unwrap().pod_ips = Some(vec![
            PodIP {
                ip: "10.0.0.5".to_string(),
            },
            PodIP {
                ip: "not-an-ip".to_string(),
            },
        ]);

        let snapshot = PodSnapshot::from_pod(&pod);
        assert_eq!(
            snapshot.pod_ips,
            vec!["10.0.0.5".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_falls_back_to_singular_pod_ip() {
        let mut pod = base_pod();
        let status = pod.status.as_mut().unwrap();
        status.pod_ips = None;
        status.pod_ip = Some("10.0.0.9".to_string());

        let snapshot = PodSnapshot::from_pod(&pod);
        assert_eq!(
            snapshot.pod_ips,
            vec!["10.0.0.9".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_duplicate_ips_deduplicated() {
        let mut pod = base_pod();
        pod.status.as_mut().unwrap().pod_ips = Some(vec![
            PodIP {
                ip: "10.0.0.5".to_string(),
            },
            PodIP {
                ip: "10.0.0.5".to_string(),
            },
        ]);

        let snapshot = PodSnapshot::from_pod(&pod);
        assert_eq!(snapshot.pod_ips.len(), 1);
    }

    #[test]
    fn test_terminal_phases() {
        for (phase, terminal) in [
            ("Succeeded", true),
            ("Failed", true),
            ("Running", false),
            ("Pending", false),
        ] {
            let mut pod = base_pod();
            pod.status.as_mut().unwrap().phase = Some(phase.to_string());
            let snapshot = PodSnapshot::from_pod(&pod);
            assert_eq!(snapshot.phase.is_terminal(), terminal, "phase {phase}");
        }
    }

    #[test]
    fn test_readiness_from_conditions() {
        let mut pod = base_pod();
        pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]);
        assert!(PodSnapshot::from_pod(&pod).ready);

        pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            ..Default::default()
        }]);
        assert!(!PodSnapshot::from_pod(&pod).ready);
    }

    #[test]
    fn test_ports_from_regular_and_init_containers() {
        let mut pod = base_pod();
        let spec = pod.spec.as_mut().unwrap();
        spec.containers = vec![container_with_port(
            "app",
            ContainerPort {
                container_port: 8080,
                host_port: Some(8080),
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        )];
        spec.init_containers = Some(vec![container_with_port(
            "setup",
            ContainerPort {
                container_port: 9000,
                host_port: Some(9000),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
        )]);

        let snapshot = PodSnapshot::from_pod(&pod);
        assert_eq!(snapshot.ports.len(), 2);

        let init_port = snapshot.ports.iter().find(|p| p.init).unwrap();
        assert_eq!(init_port.container_port, 9000);
        assert_eq!(init_port.protocol, Protocol::Udp);

        let app_port = snapshot.ports.iter().find(|p| !p.init).unwrap();
        assert_eq!(app_port.host_port, Some(8080));
    }

    #[test]
    fn test_invalid_protocol_port_skipped() {
        let mut pod = base_pod();
        pod.spec.as_mut().unwrap().containers = vec![container_with_port(
            "app",
            ContainerPort {
                container_port: 8080,
                protocol: Some("ICMP".to_string()),
                ..Default::default()
            },
        )];

        let snapshot = PodSnapshot::from_pod(&pod);
        assert!(snapshot.ports.is_empty());
    }

    #[test]
    fn test_named_ports_skip_init_containers() {
        let mut pod = base_pod();
        let spec = pod.spec.as_mut().unwrap();
        spec.containers = vec![container_with_port(
            "app",
            ContainerPort {
                container_port: 8080,
                name: Some("http".to_string()),
                ..Default::default()
            },
        )];
        spec.init_containers = Some(vec![container_with_port(
            "setup",
            ContainerPort {
                container_port: 9000,
                name: Some("bootstrap".to_string()),
                ..Default::default()
            },
        )]);

        let named = PodSnapshot::from_pod(&pod).named_ports().unwrap();
        assert!(named.contains_key("http"));
        assert!(!named.contains_key("bootstrap"));
        assert_eq!(named["http"].port, 8080);
        assert_eq!(named["http"].proto, Protocol::Tcp);
    }

    #[test]
    fn test_named_ports_none_when_unnamed() {
        let mut pod = base_pod();
        pod.spec.as_mut().unwrap().containers = vec![container_with_port(
            "app",
            ContainerPort {
                container_port: 8080,
                ..Default::default()
            },
        )];

        assert!(PodSnapshot::from_pod(&pod).named_ports().is_none());
    }

    #[test]
    fn test_ips_equal_ignores_order() {
        let mut a = PodSnapshot::from_pod(&base_pod());
        let mut b = a.clone();
        a.pod_ips = vec!["10.0.0.5".parse().unwrap(), "fd00::5".parse().unwrap()];
        b.pod_ips = vec!["fd00::5".parse().unwrap(), "10.0.0.5".parse().unwrap()];
        assert!(a.ips_equal(&b));

        b.pod_ips.pop();
        assert!(!a.ips_equal(&b));
    }

    #[test]
    fn test_spec_equal_ignores_status() {
        let a = PodSnapshot::from_pod(&base_pod());
        let mut b = a.clone();
        b.host_ip = "192.168.1.99".to_string();
        b.ready = !b.ready;
        assert!(a.spec_equal(&b));

        b.host_network = true;
        assert!(!a.spec_equal(&b));
    }

    #[test]
    fn test_no_track_annotation_alias() {
        let mut pod = base_pod();
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "policy.nodenet.io/no-track-port".to_string(),
            "53".to_string(),
        );
        pod.metadata.annotations = Some(annotations);

        let snapshot = PodSnapshot::from_pod(&pod);
        assert_eq!(snapshot.no_track_value(), Some("53"));
    }
}
