// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions for nodenet.
//!
//! A [`NetEndpoint`] is the cluster-visible mirror of a local workload
//! endpoint: its addressing, its assigned identity, and — in its object
//! metadata — the pod's labels. The label mirror keeps those metadata
//! labels in sync with the pod (see [`crate::reconcilers::mirror`]).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired/observed addressing and identity of one workload endpoint.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "nodenet.io",
    version = "v1",
    kind = "NetEndpoint",
    namespaced,
    status = "NetEndpointStatus",
    shortname = "nep"
)]
#[serde(rename_all = "camelCase")]
pub struct NetEndpointSpec {
    /// Numeric security identity assigned to the endpoint, once allocated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<i64>,

    /// IP addresses assigned to the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,

    /// Name of the node hosting the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Observed state of a `NetEndpoint`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetEndpointStatus {
    /// Lifecycle state reported by the owning agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}
