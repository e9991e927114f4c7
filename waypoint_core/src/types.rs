//! Core types for Waypoint.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Opaque structured value exchanged with tools and stores.
pub type Payload = Value;

/// One of the four fixed, ordered stages of user progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    /// Understanding the topic and its landscape
    Discovery,
    /// Finding what competitors cover that the user does not
    GapAnalysis,
    /// Deciding what to produce and in which order
    Strategy,
    /// Producing the content
    Production,
}

impl Pillar {
    /// All pillars in their fixed order.
    pub const ALL: [Pillar; 4] = [
        Pillar::Discovery,
        Pillar::GapAnalysis,
        Pillar::Strategy,
        Pillar::Production,
    ];

    /// Position of this pillar in the fixed order.
    pub fn index(self) -> usize {
        match self {
            Pillar::Discovery => 0,
            Pillar::GapAnalysis => 1,
            Pillar::Strategy => 2,
            Pillar::Production => 3,
        }
    }

    /// The pillar that follows this one, if any.
    pub fn next(self) -> Option<Pillar> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Stable snake_case name, used as a storage key.
    pub fn as_str(self) -> &'static str {
        match self {
            Pillar::Discovery => "discovery",
            Pillar::GapAnalysis => "gap_analysis",
            Pillar::Strategy => "strategy",
            Pillar::Production => "production",
        }
    }

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Pillar::Discovery => "Discovery",
            Pillar::GapAnalysis => "Gap Analysis",
            Pillar::Strategy => "Strategy",
            Pillar::Production => "Production",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pillar {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "discovery" => Ok(Pillar::Discovery),
            "gap_analysis" | "gapanalysis" => Ok(Pillar::GapAnalysis),
            "strategy" => Ok(Pillar::Strategy),
            "production" => Ok(Pillar::Production),
            _ => Err(CoreError::InvalidPillar(s.to_string())),
        }
    }
}

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(CoreError::InvalidRole(s.to_string())),
        }
    }
}

/// Message as persisted by a store.
///
/// The role is kept as raw text so that rows written by other producers
/// can be read back and validated instead of failing the whole query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Validated conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<StoredMessage> for ConversationMessage {
    type Error = CoreError;

    fn try_from(stored: StoredMessage) -> Result<Self, Self::Error> {
        let role = stored.role.parse::<Role>()?;
        if stored.content.trim().is_empty() {
            return Err(CoreError::CorruptRecord("empty message content".to_string()));
        }
        Ok(Self {
            role,
            content: stored.content,
            timestamp: stored.created_at,
        })
    }
}

/// A suggestion or workflow the user has finished.
///
/// `(user_id, conversation_id, task_key)` is unique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub user_id: String,
    pub conversation_id: String,
    pub task_key: String,
    pub category: String,
    pub pillar: Pillar,
    pub completed_at: DateTime<Utc>,
}

/// Long-term memory record, one per `(user_id, key)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMemory {
    pub user_id: String,
    pub key: String,
    pub value: Payload,
    pub category: String,
    pub conversation_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Progress and free-form metadata for a single pillar.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PillarState {
    /// Progress in `[0, 100]`
    pub progress: u8,
    /// Merged metadata from progress updates
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Roadmap position of a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadmapProgress {
    pub user_id: String,
    /// Indexed by [`Pillar::index`]
    pub pillars: [PillarState; 4],
    pub current_pillar: Pillar,
    pub updated_at: DateTime<Utc>,
}

impl RoadmapProgress {
    /// A fresh roadmap: all pillars at zero, positioned at Discovery.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            pillars: Default::default(),
            current_pillar: Pillar::Discovery,
            updated_at: Utc::now(),
        }
    }

    pub fn pillar(&self, pillar: Pillar) -> &PillarState {
        &self.pillars[pillar.index()]
    }

    pub fn pillar_mut(&mut self, pillar: Pillar) -> &mut PillarState {
        &mut self.pillars[pillar.index()]
    }

    pub fn progress(&self, pillar: Pillar) -> u8 {
        self.pillar(pillar).progress
    }

    /// Arithmetic mean of the four pillar values.
    pub fn overall(&self) -> f64 {
        let total: u32 = self.pillars.iter().map(|p| u32::from(p.progress)).sum();
        f64::from(total) / self.pillars.len() as f64
    }
}
