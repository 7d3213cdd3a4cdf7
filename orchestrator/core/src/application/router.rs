// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Router
//!
//! Turns free text into a routed agent request and the hub's reply into one
//! uniform [`ResponseEnvelope`]. Callers hand text to [`MessageRouter::route`]
//! explicitly; nothing here watches other output streams.
//!
//! Routing never fails outward: connection problems, timeouts, malformed
//! replies and hub-side errors all come back as an error envelope naming the
//! intended agent.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::agent::{AgentId, AgentTable, Classification};
use crate::domain::error::HubError;
use crate::domain::protocol::{AgentReply, HubReply, HubRequest, RequestEnvelope};
use crate::infrastructure::hub_client::{ExchangeError, HubClient};

const ERROR_LABEL: &str = "⚠️";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Ok,
    Error,
}

/// What the front end displays for one routed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: EnvelopeStatus,
    pub label: String,
    pub name: String,
    pub agent: AgentId,
    pub content: String,
}

impl ResponseEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status == EnvelopeStatus::Ok
    }

    pub fn render(&self) -> String {
        format!("{} {}: {}", self.label, self.name, self.content)
    }
}

pub struct MessageRouter {
    table: Arc<AgentTable>,
    client: HubClient,
    instance_id: String,
}

impl MessageRouter {
    pub fn new(table: Arc<AgentTable>, client: HubClient) -> Self {
        Self {
            table,
            client,
            instance_id: format!("ensemble-{}", Uuid::new_v4()),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn table(&self) -> &AgentTable {
        &self.table
    }

    pub fn classify(&self, text: &str) -> Option<Classification> {
        self.table.classify(text)
    }

    /// `None` means the text is not addressed to any agent and the caller
    /// should handle it itself.
    pub async fn route(&self, text: &str, project_path: Option<&Path>) -> Option<ResponseEnvelope> {
        let classification = self.classify(text)?;
        debug!(
            agent = %classification.agent,
            keyword = %classification.keyword,
            "Routing request ({:?} match)",
            classification.kind
        );
        Some(self.forward(&classification.agent, text, project_path).await)
    }

    /// Send `text` to `agent` through the hub, bypassing classification.
    pub async fn forward(&self, agent: &AgentId, text: &str, project_path: Option<&Path>) -> ResponseEnvelope {
        metrics::counter!("ensemble_route_requests_total", "agent" => agent.to_string()).increment(1);

        let envelope = RequestEnvelope::new(
            self.instance_id.clone(),
            agent.clone(),
            text,
            project_path.map(|p| p.display().to_string()),
        );

        match self.client.send(&HubRequest::UserRequest(envelope)).await {
            Ok(reply) => self.normalize(agent, reply),
            Err(e) => {
                let err = self.routing_error(agent, e);
                warn!(agent = %agent, "Routed request failed: {}", err);
                self.failure(agent, err.to_string())
            }
        }
    }

    /// Collapse any reply shape into one envelope. A delegation reply keeps
    /// the primary agent as the speaker and appends the specialist's part.
    pub fn normalize(&self, agent: &AgentId, reply: HubReply) -> ResponseEnvelope {
        match reply {
            HubReply::AgentResponse { reply, .. } => ResponseEnvelope {
                status: EnvelopeStatus::Ok,
                label: self.label_for(agent, &reply),
                name: reply.name,
                agent: agent.clone(),
                content: reply.content,
            },
            HubReply::SpecialistResponse { primary, specialist, .. } => {
                let specialist_label = self.label_for(&AgentId::new(specialist.name.to_lowercase()), &specialist);
                ResponseEnvelope {
                    status: EnvelopeStatus::Ok,
                    label: self.label_for(agent, &primary),
                    content: format!(
                        "{}\n\n{} {}: {}",
                        primary.content, specialist_label, specialist.name, specialist.content
                    ),
                    name: primary.name,
                    agent: agent.clone(),
                }
            }
            HubReply::Error { message, .. } => self.failure(agent, message),
            other => {
                let err = HubError::Protocol(format!("unexpected reply to user_request: {:?}", other));
                self.failure(agent, err.to_string())
            }
        }
    }

    fn label_for(&self, agent: &AgentId, reply: &AgentReply) -> String {
        if !reply.emoji.is_empty() {
            return reply.emoji.clone();
        }
        self.table
            .get(agent)
            .map(|d| d.emoji.clone())
            .unwrap_or_else(|| "🤖".to_string())
    }

    fn display_name(&self, agent: &AgentId) -> String {
        self.table
            .get(agent)
            .map(|d| d.display_name.clone())
            .unwrap_or_else(|| agent.to_string())
    }

    fn routing_error(&self, agent: &AgentId, e: ExchangeError) -> HubError {
        let target = self.display_name(agent);
        match e {
            ExchangeError::Timeout(timeout) => HubError::RoutingTimeout { target, timeout },
            ExchangeError::Malformed(reason) => HubError::Protocol(reason),
            other => HubError::RoutingConnection {
                target,
                reason: other.to_string(),
            },
        }
    }

    fn failure(&self, agent: &AgentId, cause: String) -> ResponseEnvelope {
        ResponseEnvelope {
            status: EnvelopeStatus::Error,
            label: ERROR_LABEL.to_string(),
            name: self.display_name(agent),
            agent: agent.clone(),
            content: cause,
        }
    }
}
