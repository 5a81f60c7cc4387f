// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Node-local addressing seam.
//!
//! Host-port frontends replicate across every node address eligible for
//! NodePort-style exposure. The reconciler reads those addresses, the local
//! node name, and the node's encryption-key index through this trait.

use std::net::IpAddr;

/// Read access to node-local addressing state.
pub trait NodeAddressing: Send + Sync {
    /// Addresses eligible for NodePort-style exposure.
    fn node_port_addresses(&self) -> Vec<IpAddr>;

    /// Name of the node this agent runs on.
    fn node_name(&self) -> String;

    /// Index of the key used to encrypt traffic to this node, if transparent
    /// encryption is enabled.
    fn encrypt_key_index(&self) -> Option<u8>;
}

/// Production implementation backed by configuration handed to the agent at
/// startup.
#[derive(Debug, Clone)]
pub struct StaticNodeAddressing {
    addresses: Vec<IpAddr>,
    name: String,
    encrypt_key: Option<u8>,
}

impl StaticNodeAddressing {
    #[must_use]
    pub fn new(addresses: Vec<IpAddr>, name: String, encrypt_key: Option<u8>) -> Self {
        Self {
            addresses,
            name,
            encrypt_key,
        }
    }
}

impl NodeAddressing for StaticNodeAddressing {
    fn node_port_addresses(&self) -> Vec<IpAddr> {
        self.addresses.clone()
    }

    fn node_name(&self) -> String {
        self.name.clone()
    }

    fn encrypt_key_index(&self) -> Option<u8> {
        self.encrypt_key
    }
}
