// Copyright (c) 2025 The nodenet authors
// SPDX-License-Identifier: MIT

//! Debounced policy recompute trigger.
//!
//! Named-port changes invalidate computed network policy. Recomputation is
//! expensive, so triggers are coalesced: a capacity-one channel holds at
//! most one outstanding request, and triggers that arrive while one is
//! pending are dropped. The consumer task never blocks the reconciler loop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Consumer of policy recompute requests.
#[async_trait]
pub trait PolicyRecomputer: Send + Sync {
    async fn recompute(&self, reason: &str);
}

/// Default recomputer used when no policy engine is wired in; the recompute
/// request is logged and dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPolicyRecomputer;

#[async_trait]
impl PolicyRecomputer for LoggingPolicyRecomputer {
    async fn recompute(&self, reason: &str) {
        info!(reason, "Policy recompute requested");
    }
}

/// Handle for requesting policy recomputation.
///
/// Cheap to clone; all clones share the same coalescing channel.
#[derive(Clone)]
pub struct PolicyTrigger {
    tx: mpsc::Sender<String>,
}

impl PolicyTrigger {
    /// Spawn the consumer task and return the trigger handle plus the task
    /// handle (aborted on shutdown).
    #[must_use]
    pub fn new(recomputer: Arc<dyn PolicyRecomputer>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        let task = tokio::spawn(async move {
            while let Some(reason) = rx.recv().await {
                recomputer.recompute(&reason).await;
            }
        });
        (Self { tx }, task)
    }

    /// Request a recompute. Returns immediately; repeated triggers while a
    /// request is outstanding coalesce into it.
    pub fn trigger(&self, reason: &str) {
        match self.tx.try_send(reason.to_string()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                trace!(reason, "Policy recompute already pending, coalescing");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(reason, "Policy trigger consumer stopped, dropping request");
            }
        }
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
