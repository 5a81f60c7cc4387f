// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! # Nodenet - node-local network identity reconciler for Kubernetes
//!
//! Nodenet keeps a host's IP→identity cache and host-port load-balancer
//! service table consistent with the live set of pods reported by the
//! Kubernetes API, under at-least-once, possibly-reordered, possibly-
//! duplicated change notifications.
//!
//! ## Overview
//!
//! Several independent producers race to write the same keyed cache
//! entries: the pod reconciler in this crate, a custom-resource mirror, a
//! local static-configuration loader, and a distributed key/value store
//! mirror. Correctness rests on three disciplines:
//!
//! - **Source-priority arbitration** for cache writes ([`source`],
//!   [`ipcache`])
//! - **Ownership-verified deletion** so a stale delete never removes an
//!   entry a newer owner has claimed ([`ipcache`], [`service`])
//! - **Pure diffing** of successive pod observations into the minimal set
//!   of effects to apply ([`diff`])
//!
//! ## Modules
//!
//! - [`ipcache`] - conflict-resolving IP→identity cache
//! - [`service`] - host-port service table keyed by frontend
//! - [`pod`] - immutable pod snapshots extracted from API objects
//! - [`diff`] - pure differ driving the reconciler
//! - [`reconcilers`] - the pod event loop and downstream effect triggers
//! - [`source`] - write-source authority order and overwrite policy
//! - [`endpoint`] / [`node`] / [`redirect`] - seams to the endpoint,
//!   addressing, and redirect-policy subsystems
//! - [`crd`] - the mirrored `NetEndpoint` object
//!
//! ## Example
//!
//! ```rust
//! use nodenet::ipcache::{CacheEntry, EntryOwner, Identity, IpCache};
//! use nodenet::source::Source;
//!
//! let cache = IpCache::new();
//! let (named_ports_changed, result) = cache.upsert(
//!     "10.0.0.5".parse().unwrap(),
//!     CacheEntry {
//!         identity: Identity::UNMANAGED,
//!         source: Source::Kubernetes,
//!         owner: Some(EntryOwner {
//!             namespace: "default".to_string(),
//!             name: "web".to_string(),
//!         }),
//!         host_ip: "192.168.1.10".parse().unwrap(),
//!         named_ports: None,
//!         encrypt_key: None,
//!     },
//! );
//! assert!(result.is_ok());
//! assert!(!named_ports_changed);
//! ```

pub mod cache_errors;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod diff;
pub mod endpoint;
pub mod ipcache;
pub mod labels;
pub mod metrics;
pub mod node;
pub mod pod;
pub mod redirect;
pub mod service;
pub mod source;

pub mod reconcilers;
