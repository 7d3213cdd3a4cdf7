// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hub Wire Protocol
//!
//! Newline-delimited JSON over a local TCP connection. Every request is one
//! JSON object with a `type` discriminator; every reply is one JSON object
//! with a `type` discriminator. Requests use the upper-case command names
//! (`HEALTH_CHECK`, `PING`, ...) except routed traffic, which travels as
//! `user_request`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::{AgentDescriptor, AgentId};

pub const DEFAULT_PORT: u16 = 7890;
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubRequest {
    #[serde(rename = "HEALTH_CHECK")]
    HealthCheck,

    #[serde(rename = "STATUS_CHECK")]
    StatusCheck,

    #[serde(rename = "GET_CONNECTIONS")]
    GetConnections,

    #[serde(rename = "GET_UPTIME")]
    GetUptime,

    #[serde(rename = "GET_VERSION")]
    GetVersion,

    #[serde(rename = "PING")]
    Ping,

    #[serde(rename = "REGISTER_INSTANCE")]
    RegisterInstance {
        instance_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_path: Option<String>,
    },

    #[serde(rename = "LIST_AGENTS")]
    ListAgents,

    /// Sent by an agent worker; the connection then carries routed traffic
    /// for that agent.
    #[serde(rename = "REGISTER_AGENT")]
    RegisterAgent { agent_id: AgentId },

    #[serde(rename = "user_request")]
    UserRequest(RequestEnvelope),
}

impl HubRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HealthCheck => "HEALTH_CHECK",
            Self::StatusCheck => "STATUS_CHECK",
            Self::GetConnections => "GET_CONNECTIONS",
            Self::GetUptime => "GET_UPTIME",
            Self::GetVersion => "GET_VERSION",
            Self::Ping => "PING",
            Self::RegisterInstance { .. } => "REGISTER_INSTANCE",
            Self::ListAgents => "LIST_AGENTS",
            Self::RegisterAgent { .. } => "REGISTER_AGENT",
            Self::UserRequest(_) => "user_request",
        }
    }
}

/// A routed request for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: Uuid,
    pub instance_id: String,
    pub agent: AgentId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestEnvelope {
    pub fn new(
        instance_id: impl Into<String>,
        agent: AgentId,
        message: impl Into<String>,
        project_path: Option<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            agent,
            message: message.into(),
            project_path,
            timestamp: Utc::now(),
        }
    }
}

/// One agent's part of a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub emoji: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubReply {
    HealthResponse {
        status: String,
        uptime_seconds: u64,
        version: String,
    },
    StatusResponse {
        uptime_seconds: u64,
        instances: usize,
        agents_connected: Vec<AgentId>,
    },
    Connections {
        count: usize,
        instances: Vec<String>,
    },
    Uptime {
        uptime_seconds: u64,
    },
    Version {
        version: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Registered {
        id: String,
    },
    AgentList {
        agents: Vec<AgentDescriptor>,
    },
    AgentResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        #[serde(flatten)]
        reply: AgentReply,
    },
    /// A primary agent answering together with the specialist it delegated to.
    SpecialistResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
        primary: AgentReply,
        specialist: AgentReply,
    },
    /// Set `request_id` when a worker fails one routed request.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<Uuid>,
    },
}

impl HubReply {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            request_id: None,
        }
    }

    /// Request id carried by routed replies.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            Self::AgentResponse { request_id, .. }
            | Self::SpecialistResponse { request_id, .. }
            | Self::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

/// Encode one frame (without the trailing newline; the codec adds it).
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_names_on_the_wire() {
        let json = encode(&HubRequest::HealthCheck).unwrap();
        assert_eq!(json, r#"{"type":"HEALTH_CHECK"}"#);

        let parsed: HubRequest = serde_json::from_str(r#"{"type":"LIST_AGENTS"}"#).unwrap();
        assert_eq!(parsed, HubRequest::ListAgents);
    }

    #[test]
    fn test_user_request_carries_envelope_fields_inline() {
        let envelope = RequestEnvelope::new("inst-1", AgentId::new("sherlock"), "check this", None);
        let value = serde_json::to_value(HubRequest::UserRequest(envelope.clone())).unwrap();

        assert_eq!(value["type"], "user_request");
        assert_eq!(value["instance_id"], "inst-1");
        assert_eq!(value["agent"], "sherlock");
        assert_eq!(value["message"], "check this");
        assert!(value.get("project_path").is_none());
    }

    #[test]
    fn test_parse_specialist_response() {
        let raw = r#"{
            "type": "specialist_response",
            "primary": {"name": "Alex", "content": "ok"},
            "specialist": {"name": "Edison", "content": "done"}
        }"#;
        let reply: HubReply = serde_json::from_str(raw).unwrap();
        match reply {
            HubReply::SpecialistResponse { primary, specialist, request_id } => {
                assert_eq!(primary.name, "Alex");
                assert_eq!(specialist.content, "done");
                assert!(request_id.is_none());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_parse_agent_response_flattened() {
        let raw = r#"{"type":"agent_response","emoji":"🔍","name":"Sherlock","content":"found it"}"#;
        let reply: HubReply = serde_json::from_str(raw).unwrap();
        assert_eq!(
            reply,
            HubReply::AgentResponse {
                request_id: None,
                reply: AgentReply {
                    emoji: "🔍".to_string(),
                    name: "Sherlock".to_string(),
                    content: "found it".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_health_response_tag() {
        let raw = r#"{"type":"health_response","status":"healthy","uptime_seconds":3,"version":"0.1.0"}"#;
        let reply: HubReply = serde_json::from_str(raw).unwrap();
        assert!(matches!(reply, HubReply::HealthResponse { uptime_seconds: 3, .. }));
    }

    #[test]
    fn test_error_reply_request_id_is_optional() {
        let plain: HubReply = serde_json::from_str(r#"{"type":"error","message":"bad"}"#).unwrap();
        assert_eq!(plain, HubReply::error("bad"));
        assert_eq!(plain.request_id(), None);
        assert_eq!(encode(&plain).unwrap(), r#"{"type":"error","message":"bad"}"#);

        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"error","message":"tool crashed","request_id":"{}"}}"#, id);
        let routed: HubReply = serde_json::from_str(&raw).unwrap();
        assert_eq!(routed.request_id(), Some(id));
    }
}
