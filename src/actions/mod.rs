//! Action trait, registry and invoker
//!
//! Actions are the only way agents reach the outside world. The invoker
//! enforces each agent's declared capability set and converts execution
//! failures into structured error payloads so the turn loop never dies on a
//! failing domain call.

use crate::agents::AgentUnit;
use crate::error::OrchestratorError;
use crate::models::{ActionRequest, ActionSpec, Message};
use crate::state::SessionState;
use crate::store::FinanceStore;
use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub mod essential;
pub mod goals;
pub mod investments;
pub mod ledger;
pub mod liabilities;
pub mod wishlist;

/// Best-effort side channel for free-form progress notices. Notices are not
/// part of the persisted message sequence and may be dropped by a slow or
/// absent consumer.
#[derive(Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<String>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notice: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(notice.into());
        }
    }
}

/// Everything an action may touch during execution.
pub struct ActionContext<'a> {
    pub state: &'a mut SessionState,
    pub store: &'a dyn FinanceStore,
    pub progress: &'a ProgressSink,
}

/// Trait for a single invocable action
#[async_trait::async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object, handed to the completion call.
    fn parameters(&self) -> Value;
    /// Read-only actions may be retried once on a transient storage failure;
    /// writes must not be.
    fn retry_safe(&self) -> bool {
        false
    }
    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value>;
}

/// Action registry for looking up actions by id
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    /// Declarations for the subset of actions an agent is allowed to invoke.
    pub fn specs_for(&self, allowed: &HashSet<String>) -> Vec<ActionSpec> {
        let mut specs: Vec<ActionSpec> = self
            .actions
            .values()
            .filter(|a| allowed.contains(a.name()))
            .map(|a| ActionSpec {
                name: a.name().to_string(),
                description: a.description().to_string(),
                parameters: a.parameters(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes requested actions against injected session state.
pub struct ActionInvoker {
    registry: ActionRegistry,
}

impl ActionInvoker {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Execute one request on behalf of `agent`, consuming it exactly once.
    ///
    /// Authorization is checked before anything runs; an action outside the
    /// agent's declared set is a hard error. Execution failures never
    /// propagate: they become `{status: "error"}` payloads the issuing agent
    /// can react to.
    pub async fn invoke(
        &self,
        agent: &AgentUnit,
        request: &ActionRequest,
        ctx: &mut ActionContext<'_>,
    ) -> Result<Message> {
        if !agent.allows(&request.action) {
            return Err(OrchestratorError::UnauthorizedAction {
                agent: agent.id().to_string(),
                action: request.action.clone(),
            });
        }

        let Some(action) = self.registry.get(&request.action) else {
            warn!(action = %request.action, "Requested action is not registered");
            return Ok(Message::action_result(
                agent.id(),
                &request.action,
                json!({
                    "status": "error",
                    "error_message": format!("Action '{}' is not registered", request.action),
                }),
            ));
        };

        let mut result = action.execute(&request.args, ctx).await;

        // One retry for read-only actions hit by a transient storage failure.
        if action.retry_safe()
            && matches!(result, Err(OrchestratorError::DatabaseError(_)))
        {
            warn!(action = %request.action, "Retrying read-only action after storage error");
            result = action.execute(&request.args, ctx).await;
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    agent = agent.id(),
                    action = %request.action,
                    error = %e,
                    "Action execution failed"
                );
                json!({
                    "status": "error",
                    "error_message": e.to_string(),
                })
            }
        };

        Ok(Message::action_result(agent.id(), &request.action, payload))
    }
}

/// Create the default registry with every essential and domain action.
/// `instructions_dir` points at the procedural instruction files.
pub fn create_default_registry(instructions_dir: impl Into<std::path::PathBuf>) -> ActionRegistry {
    let dir: std::path::PathBuf = instructions_dir.into();
    let mut registry = ActionRegistry::new();

    registry.register(Arc::new(essential::CurrentTime));
    registry.register(Arc::new(essential::ListInstructions::new(dir.clone())));
    registry.register(Arc::new(essential::GetInstruction::new(dir)));

    registry.register(Arc::new(ledger::RecordTransaction));
    registry.register(Arc::new(ledger::ListTransactions));
    registry.register(Arc::new(ledger::CheckBalance));
    registry.register(Arc::new(ledger::UpdateBalance));
    registry.register(Arc::new(ledger::CheckBudget));
    registry.register(Arc::new(ledger::UpdateBudget));
    registry.register(Arc::new(ledger::AverageIncome));

    registry.register(Arc::new(liabilities::AddDebt));
    registry.register(Arc::new(liabilities::AddInstallment));
    registry.register(Arc::new(liabilities::AddSubscription));
    registry.register(Arc::new(liabilities::ListLiabilities));

    registry.register(Arc::new(investments::AddAsset));
    registry.register(Arc::new(investments::AddFixedDeposit));
    registry.register(Arc::new(investments::ListInvestments));
    registry.register(Arc::new(investments::UpdateAsset));
    registry.register(Arc::new(investments::UpdateFixedDeposit));

    registry.register(Arc::new(goals::CreateGoal));
    registry.register(Arc::new(goals::ListGoals));
    registry.register(Arc::new(goals::UpdateGoalStatus));

    registry.register(Arc::new(wishlist::AddWishlistItem));
    registry.register(Arc::new(wishlist::UpdateWishlistStatus));
    registry.register(Arc::new(wishlist::ListWishlist));

    registry
}

/// Decode an argument object into a typed parameter struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T> {
    serde_json::from_value(args.clone())
        .map_err(|e| OrchestratorError::InvalidActionInput(e.to_string()))
}

/// Parse a `YYYY-MM-DD HH:MM:SS` (or `YYYY-MM-DD`) timestamp argument.
pub(crate) fn parse_timestamp(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| {
            OrchestratorError::InvalidActionInput(format!(
                "invalid timestamp '{}': {}",
                value, e
            ))
        })?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentUnit;
    use crate::completion::ScriptedModel;
    use crate::models::UserProfile;
    use crate::store::InMemoryFinanceStore;

    struct FailingAction;

    #[async_trait::async_trait]
    impl Action for FailingAction {
        fn name(&self) -> &'static str {
            "always_fails"
        }
        fn description(&self) -> &'static str {
            "Raises a storage error"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: &Value, _ctx: &mut ActionContext<'_>) -> Result<Value> {
            Err(OrchestratorError::DatabaseError("storage offline".into()))
        }
    }

    fn test_agent(allowed: &[&str]) -> AgentUnit {
        AgentUnit::new(
            "tester",
            |_: &UserProfile| "You are a test agent.".to_string(),
            Arc::new(ScriptedModel::new(vec![])),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn invoke_rejects_unauthorized_before_execution() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(FailingAction));
        let invoker = ActionInvoker::new(registry);

        let agent = test_agent(&[]);
        let request = ActionRequest::new("always_fails", json!({}));
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = invoker.invoke(&agent, &request, &mut ctx).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::UnauthorizedAction { .. })
        ));
    }

    #[tokio::test]
    async fn invoke_converts_failure_into_error_payload() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(FailingAction));
        let invoker = ActionInvoker::new(registry);

        let agent = test_agent(&["always_fails"]);
        let request = ActionRequest::new("always_fails", json!({}));
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let message = invoker.invoke(&agent, &request, &mut ctx).await.unwrap();
        let payload = message.payload.unwrap();
        assert_eq!(payload["status"], "error");
        assert!(payload["error_message"]
            .as_str()
            .unwrap()
            .contains("storage offline"));
    }

    #[tokio::test]
    async fn invoke_reports_unregistered_action_as_error_payload() {
        let invoker = ActionInvoker::new(ActionRegistry::new());
        let agent = test_agent(&["missing_action"]);
        let request = ActionRequest::new("missing_action", json!({}));
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let message = invoker.invoke(&agent, &request, &mut ctx).await.unwrap();
        assert_eq!(message.payload.unwrap()["status"], "error");
    }

    #[test]
    fn parse_timestamp_accepts_date_only() {
        let ts = parse_timestamp("2025-03-15").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-03-15T00:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
