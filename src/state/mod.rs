//! Session state and persistence
//!
//! One `SessionState` per conversation thread. All mutation goes through the
//! accessors; the message sequence is append-only and `active_agent` is
//! changed only by the handoff protocol.

use crate::error::OrchestratorError;
use crate::models::{Message, ProfileField, UserProfile};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod postgres;
pub use postgres::PostgresSessionStore;

/// Sentinel id of the coordinator agent; also the default `active_agent`.
pub const COORDINATOR: &str = "coordinator";

/// Mutable record threaded through one conversation turn and persisted per
/// session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    session_id: String,
    messages: Vec<Message>,
    active_agent: String,
    profile: UserProfile,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            active_agent: COORDINATOR.to_string(),
            profile: UserProfile::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn active_agent(&self) -> &str {
        &self.active_agent
    }

    /// Restricted to the handoff protocol.
    pub(crate) fn set_active_agent(&mut self, agent: &str) {
        self.active_agent = agent.to_string();
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Read a profile field. Missing optional fields read as null.
    pub fn get(&self, field: ProfileField) -> Value {
        match field {
            ProfileField::Name => Value::from(self.profile.name.clone()),
            ProfileField::Language => Value::from(self.profile.language.clone()),
            ProfileField::Currency => Value::from(self.profile.currency.clone()),
            ProfileField::Balance => Value::from(self.profile.balance),
            ProfileField::MonthlyBudget => self
                .profile
                .monthly_budget
                .map(Value::from)
                .unwrap_or(Value::Null),
        }
    }

    /// Read a profile field, substituting `default` when it is unset.
    pub fn get_or(&self, field: ProfileField, default: Value) -> Value {
        match self.get(field) {
            Value::Null => default,
            value => value,
        }
    }

    /// Write a profile field. Only designated actions call this.
    pub fn set(&mut self, field: ProfileField, value: Value) -> Result<()> {
        let type_error = |expected: &str| {
            OrchestratorError::InvalidProfileValue(format!(
                "field '{}' expects {}",
                field, expected
            ))
        };

        match field {
            ProfileField::Name => {
                self.profile.name = value
                    .as_str()
                    .ok_or_else(|| type_error("a string"))?
                    .to_string();
            }
            ProfileField::Language => {
                self.profile.language = value
                    .as_str()
                    .ok_or_else(|| type_error("a string"))?
                    .to_string();
            }
            ProfileField::Currency => {
                self.profile.currency = value
                    .as_str()
                    .ok_or_else(|| type_error("a string"))?
                    .to_uppercase();
            }
            ProfileField::Balance => {
                self.profile.balance = value.as_f64().ok_or_else(|| type_error("a number"))?;
            }
            ProfileField::MonthlyBudget => {
                self.profile.monthly_budget = match value {
                    Value::Null => None,
                    other => Some(other.as_f64().ok_or_else(|| type_error("a number"))?),
                };
            }
        }

        Ok(())
    }
}

/// Trait for per-session persistence. Called once per completed turn; a save
/// failure means the turn failed and state did not advance.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_state(&self, session_id: &str) -> Result<Option<SessionState>>;
    async fn save_state(&self, state: &SessionState) -> Result<()>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save_state(&self, state: &SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(state.session_id().to_string(), state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRole;

    #[test]
    fn new_session_defaults_to_coordinator() {
        let state = SessionState::new("thread-1");
        assert_eq!(state.active_agent(), COORDINATOR);
        assert!(state.messages().is_empty());
    }

    #[test]
    fn messages_are_append_only() {
        let mut state = SessionState::new("thread-1");
        state.append_message(Message::user("hello"));
        state.append_message(Message::assistant(COORDINATOR, "hi there", None));

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].role, MessageRole::User);
        assert_eq!(state.messages()[1].role, MessageRole::Assistant);
    }

    #[test]
    fn profile_accessors_round_trip() {
        let mut state = SessionState::new("thread-1");
        state
            .set(ProfileField::Currency, Value::from("idr"))
            .unwrap();
        state.set(ProfileField::Balance, Value::from(125_000.0)).unwrap();

        assert_eq!(state.get(ProfileField::Currency), Value::from("IDR"));
        assert_eq!(state.get(ProfileField::Balance), Value::from(125_000.0));
        assert_eq!(state.get(ProfileField::MonthlyBudget), Value::Null);
    }

    #[test]
    fn get_or_substitutes_for_unset_fields() {
        let state = SessionState::new("thread-1");
        assert_eq!(
            state.get_or(ProfileField::MonthlyBudget, Value::from(0.0)),
            Value::from(0.0)
        );
        assert_eq!(
            state.get_or(ProfileField::Language, Value::from("Klingon")),
            Value::from("English")
        );
    }

    #[test]
    fn set_rejects_wrong_type() {
        let mut state = SessionState::new("thread-1");
        let result = state.set(ProfileField::Balance, Value::from("a lot"));
        assert!(matches!(
            result,
            Err(OrchestratorError::InvalidProfileValue(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemorySessionStore::new();
        assert!(store.load_state("thread-1").await.unwrap().is_none());

        let mut state = SessionState::new("thread-1");
        state.append_message(Message::user("hello"));
        store.save_state(&state).await.unwrap();

        let loaded = store.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.messages().len(), 1);
    }
}
