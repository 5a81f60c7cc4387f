// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Shared context for the pod reconciler.
//!
//! The reconciler depends on a handful of injected capabilities: the shared
//! IP cache and service table, the endpoint manager, node addressing, the
//! redirect-policy hooks, and the two downstream effect triggers. They are
//! bundled into one `Arc<Context>` constructed at startup, the same way
//! each capability would be handed to any other feature reconciler.

use crate::config::Config;
use crate::endpoint::EndpointManager;
use crate::ipcache::IpCache;
use crate::node::NodeAddressing;
use crate::reconcilers::mirror::LabelMirror;
use crate::reconcilers::policy::PolicyTrigger;
use crate::redirect::RedirectPolicyHooks;
use crate::service::ServiceTable;
use std::sync::Arc;

/// Capabilities the pod reconciler operates on.
pub struct Context {
    /// Feature flags and datapath bounds
    pub config: Config,

    /// Shared IP→identity cache, also written by other sources
    pub ipcache: Arc<IpCache>,

    /// Shared host-port service table
    pub services: Arc<ServiceTable>,

    /// Lookup of local endpoints by pod
    pub endpoints: Arc<dyn EndpointManager>,

    /// Node-local addressing state
    pub node: Arc<dyn NodeAddressing>,

    /// Redirect-policy lifecycle notifications
    pub redirect_policy: Arc<dyn RedirectPolicyHooks>,

    /// Debounced policy recompute trigger
    pub policy_trigger: PolicyTrigger,

    /// Per-endpoint label mirror
    pub mirror: Arc<LabelMirror>,
}
