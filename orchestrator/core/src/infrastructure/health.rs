// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub health probe

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::domain::protocol::{HubReply, HubRequest};
use crate::domain::supervisor::HealthCheck;
use crate::infrastructure::hub_client::HubClient;

/// Probes the hub with `HEALTH_CHECK`. Holds only immutable configuration,
/// so one prober can serve any number of concurrent callers.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: HubClient,
}

impl HealthProber {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: HubClient::new(addr, timeout),
        }
    }

    pub fn for_port(port: u16, timeout: Duration) -> Self {
        Self::new(format!("127.0.0.1:{}", port), timeout)
    }

    /// Uptime reported by a healthy hub.
    pub async fn uptime(&self) -> Option<u64> {
        match self.client.send(&HubRequest::HealthCheck).await {
            Ok(HubReply::HealthResponse { uptime_seconds, .. }) => Some(uptime_seconds),
            _ => None,
        }
    }
}

#[async_trait]
impl HealthCheck for HealthProber {
    async fn probe(&self) -> bool {
        match self.client.send(&HubRequest::HealthCheck).await {
            Ok(HubReply::HealthResponse { .. }) => true,
            Ok(other) => {
                debug!(addr = self.client.addr(), "Unexpected health reply: {:?}", other);
                false
            }
            Err(e) => {
                debug!(addr = self.client.addr(), "Health probe failed: {}", e);
                false
            }
        }
    }
}

/// Probe the local hub on `port`. No retries; callers own the retry policy.
pub async fn probe(port: u16, timeout: Duration) -> bool {
    HealthProber::for_port(port, timeout).probe().await
}
