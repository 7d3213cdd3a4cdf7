// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Descriptor Table
//!
//! The single static table describing which agents exist and which words in
//! free text refer to them. Built once at startup (from the built-in roster or
//! the `agents` section of the node config) and shared read-only by the
//! message router, the hub server and the `agents` CLI command.
//!
//! ## Matching Order
//! | Step | Keyword set | Target |
//! |------|-------------|--------|
//! | 1 | each agent's aliases, in table order | that agent |
//! | 2 | collective keywords ("team", ...) | default agent |
//! | 3 | greeting keywords ("hello", ...) | default agent |
//! | - | nothing matched | no route |

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,

    /// Human-readable name shown in replies (e.g., "Alex")
    pub display_name: String,

    /// Short label prefixed to replies
    #[serde(default = "default_emoji")]
    pub emoji: String,

    /// Lower-case keywords; any one appearing in a request selects this agent
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(id: &str, display_name: &str, emoji: &str, aliases: &[&str]) -> Self {
        Self {
            id: AgentId::new(id),
            display_name: display_name.to_string(),
            emoji: emoji.to_string(),
            aliases: aliases.iter().map(|a| a.to_lowercase()).collect(),
        }
    }
}

/// Why a piece of text was routed where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Alias,
    Collective,
    Greeting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub agent: AgentId,
    pub kind: MatchKind,
    pub keyword: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTable {
    agents: Vec<AgentDescriptor>,
    default_agent: AgentId,
    collective_keywords: Vec<String>,
    greeting_keywords: Vec<String>,
}

impl AgentTable {
    pub fn new(mut agents: Vec<AgentDescriptor>, default_agent: AgentId) -> Self {
        for agent in &mut agents {
            for alias in &mut agent.aliases {
                *alias = alias.to_lowercase();
            }
        }
        Self {
            agents,
            default_agent,
            collective_keywords: to_owned(COLLECTIVE_KEYWORDS),
            greeting_keywords: to_owned(GREETING_KEYWORDS),
        }
    }

    pub fn with_collective_keywords(mut self, keywords: &[&str]) -> Self {
        self.collective_keywords = to_owned(keywords);
        self
    }

    pub fn with_greeting_keywords(mut self, keywords: &[&str]) -> Self {
        self.greeting_keywords = to_owned(keywords);
        self
    }

    /// The built-in roster
    pub fn builtin() -> Self {
        Self::new(
            vec![
                AgentDescriptor::new("alex", "Alex", "🎯", &["alex", "pm", "project manager", "roadmap"]),
                AgentDescriptor::new("sherlock", "Sherlock", "🔍", &["sherlock", "qa", "quality", "bug"]),
                AgentDescriptor::new("edison", "Edison", "🔧", &["edison", "developer", "implement"]),
                AgentDescriptor::new("leonardo", "Leonardo", "🎨", &["leonardo", "architect", "architecture"]),
                AgentDescriptor::new("marie", "Marie", "📊", &["marie", "analyst", "metrics report"]),
            ],
            AgentId::new("alex"),
        )
    }

    pub fn agents(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn default_agent(&self) -> &AgentId {
        &self.default_agent
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| &a.id == id)
    }

    /// Map free text to a routing target. `None` means the text is not
    /// addressed to any agent.
    pub fn classify(&self, text: &str) -> Option<Classification> {
        let lowered = text.to_lowercase();

        for agent in &self.agents {
            if let Some(alias) = agent.aliases.iter().find(|a| lowered.contains(a.as_str())) {
                return Some(Classification {
                    agent: agent.id.clone(),
                    kind: MatchKind::Alias,
                    keyword: alias.clone(),
                });
            }
        }

        let fallback = [
            (MatchKind::Collective, &self.collective_keywords),
            (MatchKind::Greeting, &self.greeting_keywords),
        ];
        for (kind, keywords) in fallback {
            if let Some(keyword) = keywords.iter().find(|k| lowered.contains(k.as_str())) {
                return Some(Classification {
                    agent: self.default_agent.clone(),
                    kind,
                    keyword: keyword.clone(),
                });
            }
        }

        None
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.agents.is_empty() {
            return Err("agent table cannot be empty".to_string());
        }
        if self.get(&self.default_agent).is_none() {
            return Err(format!("default agent '{}' is not in the agent table", self.default_agent));
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.id.as_str().is_empty() {
                return Err("agent id cannot be empty".to_string());
            }
            if self.agents[..i].iter().any(|other| other.id == agent.id) {
                return Err(format!("duplicate agent id '{}'", agent.id));
            }
            if agent.aliases.iter().any(|a| a.is_empty()) {
                return Err(format!("agent '{}' has an empty alias", agent.id));
            }
        }
        Ok(())
    }
}

impl Default for AgentTable {
    fn default() -> Self {
        Self::builtin()
    }
}

const COLLECTIVE_KEYWORDS: &[&str] = &["team", "everyone", "everybody", "all agents", "squad"];

const GREETING_KEYWORDS: &[&str] = &["hello", "good morning", "good afternoon", "greetings", "howdy"];

fn default_emoji() -> String {
    "🤖".to_string()
}

fn to_owned(keywords: &[&str]) -> Vec<String> {
    keywords.iter().map(|k| k.to_lowercase()).collect()
}
