//! Core data models for the orchestration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// External user input
    User,
    /// Text produced by an agent step (may carry pending action requests)
    Assistant,
    /// Result of an executed action, fed back to the issuing agent
    Action,
    /// Control-transfer record between agents
    Handoff,
}

/// One entry in a session's append-only message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    /// Agent that produced this message, if any
    pub agent: Option<String>,
    pub content: String,
    /// Structured payload: pending requests on Assistant messages, action
    /// results on Action messages, the HandoffRecord on Handoff messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::User,
            agent: None,
            content: content.into(),
            payload: None,
        }
    }

    pub fn assistant(agent: &str, content: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::Assistant,
            agent: Some(agent.to_string()),
            content: content.into(),
            payload,
        }
    }

    pub fn action_result(agent: &str, action: &str, payload: Value) -> Self {
        let content = payload
            .get("summary")
            .or_else(|| payload.get("error_message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} completed", action));

        // Tag the result with the action id so the completion call can map
        // it back onto the request that produced it.
        let mut payload = payload;
        if let Value::Object(map) = &mut payload {
            map.insert("action".to_string(), Value::from(action));
        }

        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::Action,
            agent: Some(agent.to_string()),
            content,
            payload: Some(payload),
        }
    }

    pub fn handoff(record: &HandoffRecord) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role: MessageRole::Handoff,
            agent: Some(record.from_agent.clone()),
            content: format!("Transferred to {}", record.to_agent),
            payload: serde_json::to_value(record).ok(),
        }
    }

    /// Decode the handoff record carried by a Handoff message.
    pub fn handoff_record(&self) -> Option<HandoffRecord> {
        if self.role != MessageRole::Handoff {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
    }
}

//
// ================= Action Requests =================
//

/// A single action invocation requested by a completion call.
/// Consumed exactly once by the invoker; persists only through the
/// Message sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub request_id: Uuid,
    pub action: String,
    pub args: Value,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action: action.into(),
            args,
        }
    }
}

/// Declaration of an invocable action, handed to the completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

//
// ================= Handoffs =================
//

/// Transfer scope: a local transfer re-enters the specialist loop with the
/// new agent; a transfer to the coordinator returns to the top-level router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffScope {
    Local,
    ToCoordinator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub scope: HandoffScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

//
// ================= Agent Step Output =================
//

/// Outcome of one agent step. A handoff is requested through the reserved
/// transfer action inside `ActionRequests`; the router always processes it
/// after the ordinary requests of the same step.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    FinalMessage(String),
    ActionRequests {
        /// Free-form text accompanying the requests, kept for the history
        text: Option<String>,
        requests: Vec<ActionRequest>,
    },
}

//
// ================= User Profile =================
//

/// Per-session user preferences and cached figures. Read by every agent for
/// personalization; written only by designated actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub name: String,
    pub language: String,
    pub currency: String,
    /// Cached account balance, in the profile currency
    pub balance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_budget: Option<f64>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: "User".to_string(),
            language: "English".to_string(),
            currency: "USD".to_string(),
            balance: 0.0,
            monthly_budget: None,
        }
    }
}

/// Addressable profile fields for the session-state accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Language,
    Currency,
    Balance,
    MonthlyBudget,
}

impl ProfileField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Name => "name",
            ProfileField::Language => "language",
            ProfileField::Currency => "currency",
            ProfileField::Balance => "balance",
            ProfileField::MonthlyBudget => "monthly_budget",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_result_content_prefers_summary() {
        let msg = Message::action_result(
            "bookkeeper",
            "record_transaction",
            json!({"status": "success", "summary": "Transaction recorded"}),
        );
        assert_eq!(msg.content, "Transaction recorded");
        assert_eq!(msg.role, MessageRole::Action);
    }

    #[test]
    fn action_result_content_falls_back_to_error() {
        let msg = Message::action_result(
            "bookkeeper",
            "record_transaction",
            json!({"status": "error", "error_message": "storage offline"}),
        );
        assert_eq!(msg.content, "storage offline");
    }

    #[test]
    fn handoff_message_round_trips_record() {
        let record = HandoffRecord {
            from_agent: "coordinator".to_string(),
            to_agent: "bookkeeper".to_string(),
            scope: HandoffScope::Local,
            reason: Some("expense tracking".to_string()),
        };
        let msg = Message::handoff(&record);
        let decoded = msg.handoff_record().expect("record should decode");
        assert_eq!(decoded.to_agent, "bookkeeper");
        assert_eq!(decoded.scope, HandoffScope::Local);
    }
}
