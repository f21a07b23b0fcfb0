pub mod wire;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: u64,
    pub author: MessageAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageAuthor {
    User,
    Agent,
}

impl MessageAuthor {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageAuthor::User => "user",
            MessageAuthor::Agent => "agent",
        }
    }
}

impl fmt::Display for MessageAuthor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageAuthor {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "user" => Ok(MessageAuthor::User),
            "agent" | "assistant" => Ok(MessageAuthor::Agent),
            other => Err(format!("Unknown author: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Thinking,
    Acting,
    Error,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Thinking => "thinking",
            AgentState::Acting => "acting",
            AgentState::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, AgentState::Idle)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(AgentState::Idle),
            "thinking" => Ok(AgentState::Thinking),
            "acting" | "working" => Ok(AgentState::Acting),
            "error" => Ok(AgentState::Error),
            other => Err(format!("Unknown agent state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatus {
    pub state: AgentState,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            state: AgentState::Idle,
            current_task: None,
            message_count: 0,
            last_activity_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AgentState>,
    #[serde(
        default,
        deserialize_with = "deserialize_patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_task: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Deserialize a nullable patch field so an explicit null stays distinct from an absent key
fn deserialize_patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_keeps_null_task_distinct_from_absent_task() {
        let absent: StatusPatch = serde_json::from_str(r#"{"state": "thinking"}"#).expect("parse");
        assert_eq!(absent.state, Some(AgentState::Thinking));
        assert_eq!(absent.current_task, None);

        let null_task: StatusPatch =
            serde_json::from_str(r#"{"current_task": null}"#).expect("parse");
        assert_eq!(null_task.current_task, Some(None));

        let named_task: StatusPatch =
            serde_json::from_str(r#"{"current_task": "index repo"}"#).expect("parse");
        assert_eq!(named_task.current_task, Some(Some("index repo".to_string())));
    }

    #[test]
    fn patch_serializes_only_named_fields() {
        let patch = StatusPatch {
            state: Some(AgentState::Acting),
            current_task: Some(None),
            ..StatusPatch::default()
        };
        let text = serde_json::to_string(&patch).expect("serialize");
        assert_eq!(text, r#"{"state":"acting","current_task":null}"#);
    }

    #[test]
    fn agent_state_parses_with_normalization() {
        assert_eq!("Thinking".parse::<AgentState>(), Ok(AgentState::Thinking));
        assert_eq!(" working ".parse::<AgentState>(), Ok(AgentState::Acting));
        assert!("sleeping".parse::<AgentState>().is_err());
    }

    #[test]
    fn author_parses_assistant_alias() {
        assert_eq!("assistant".parse::<MessageAuthor>(), Ok(MessageAuthor::Agent));
        assert_eq!(MessageAuthor::Agent.to_string(), "agent");
    }

    #[test]
    fn status_defaults_to_idle_with_no_activity() {
        let status = AgentStatus::default();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.current_task, None);
        assert_eq!(status.message_count, 0);
        assert_eq!(status.last_activity_at, None);
    }
}
