//! Agent units and the specialist roster
//!
//! One `AgentUnit` per specialist role, constructed at startup and immutable
//! afterwards. All mutable data lives in the session state; the unit itself
//! only knows how to render its instructions and which actions it may call.

use crate::actions::ActionRegistry;
use crate::completion::CompletionModel;
use crate::error::OrchestratorError;
use crate::handoff;
use crate::models::{AgentOutput, UserProfile};
use crate::state::{SessionState, COORDINATOR};
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// The actions every agent carries regardless of specialty.
const ESSENTIAL_ACTIONS: &[&str] = &[
    "current_time",
    "list_instructions",
    "get_instruction",
    handoff::TRANSFER_ACTION,
];

/// One specialist: a completion binding plus its allowed action set.
pub struct AgentUnit {
    id: &'static str,
    render: fn(&UserProfile) -> String,
    model: Arc<dyn CompletionModel>,
    allowed_actions: HashSet<String>,
}

impl AgentUnit {
    pub fn new(
        id: &'static str,
        render: fn(&UserProfile) -> String,
        model: Arc<dyn CompletionModel>,
        allowed_actions: HashSet<String>,
    ) -> Self {
        Self {
            id,
            render,
            model,
            allowed_actions,
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn allows(&self, action: &str) -> bool {
        self.allowed_actions.contains(action)
    }

    /// Render the personalized instruction text from the live profile.
    /// Pure; recomputed on every step so a mid-conversation preference
    /// change is reflected immediately.
    pub fn render_instructions(&self, profile: &UserProfile) -> String {
        (self.render)(profile)
    }

    /// One agent step: consult the completion call against the current
    /// session state and report what should happen next.
    pub async fn step(
        &self,
        state: &SessionState,
        registry: &ActionRegistry,
    ) -> Result<AgentOutput> {
        let instructions = self.render_instructions(state.profile());

        let mut specs = registry.specs_for(&self.allowed_actions);
        if self.allows(handoff::TRANSFER_ACTION) {
            specs.push(handoff::transfer_spec());
        }

        let completion = self
            .model
            .complete(&instructions, state.messages(), &specs)
            .await?;

        if !completion.requests.is_empty() {
            return Ok(AgentOutput::ActionRequests {
                text: completion.text,
                requests: completion.requests,
            });
        }

        match completion.text {
            Some(text) => Ok(AgentOutput::FinalMessage(text)),
            None => Err(OrchestratorError::ModelCallFailed(
                "completion returned neither text nor action requests".to_string(),
            )),
        }
    }
}

/// Registry of every agent known to the router.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentUnit>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: AgentUnit) {
        self.agents.insert(agent.id().to_string(), Arc::new(agent));
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentUnit>> {
        self.agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        ids.sort();
        ids
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn allowed(essential: bool, domain: &[&str]) -> HashSet<String> {
    let mut set: HashSet<String> = domain.iter().map(|s| s.to_string()).collect();
    if essential {
        set.extend(ESSENTIAL_ACTIONS.iter().map(|s| s.to_string()));
    }
    set
}

fn preamble(profile: &UserProfile) -> String {
    format!(
        "Address the user as {}. Reply in {}. Amounts are in {} unless the user says otherwise. \
         The cached account balance is {:.2} {}.",
        profile.name, profile.language, profile.currency, profile.balance, profile.currency
    )
}

fn coordinator_instructions(profile: &UserProfile) -> String {
    format!(
        "You are the coordinator of a personal finance assistant. {}\n\
         You never execute domain actions yourself. Route the conversation by \
         transferring control to the right specialist:\n\
         - bookkeeper: recording income/expenses, balance and budget questions\n\
         - portfolio: debts, installments, subscriptions and investments\n\
         - planner: creating and reviewing financial goals\n\
         - advisor: wishlist items and purchase advice\n\
         Use transfer_to_agent to hand off; answer directly only for greetings \
         and questions no specialist covers.",
        preamble(profile)
    )
}

fn bookkeeper_instructions(profile: &UserProfile) -> String {
    format!(
        "You are the bookkeeping specialist of a personal finance assistant. {}\n\
         Record transactions exactly as described, keep the cached balance and \
         monthly budget up to date, and summarize ledgers on request. When the \
         task is complete or out of your scope, transfer control back to the \
         coordinator.",
        preamble(profile)
    )
}

fn portfolio_instructions(profile: &UserProfile) -> String {
    format!(
        "You are the portfolio specialist of a personal finance assistant. {}\n\
         Track liabilities (debts, installment plans, subscriptions) and \
         investments (tradable assets and fixed deposits). Prefer exact figures \
         from the stored records over estimates. When the task is complete or \
         out of your scope, transfer control back to the coordinator.",
        preamble(profile)
    )
}

fn planner_instructions(profile: &UserProfile) -> String {
    format!(
        "You are the goal-planning specialist of a personal finance assistant. {}\n\
         Create financial goals with concrete deadlines, review progress and \
         update goal status. When the task is complete or out of your scope, \
         transfer control back to the coordinator.",
        preamble(profile)
    )
}

fn advisor_instructions(profile: &UserProfile) -> String {
    format!(
        "You are the purchase advisor of a personal finance assistant. {}\n\
         Manage the wishlist and weigh purchases against the user's balance, \
         recent spending and liabilities before recommending them. When the \
         task is complete or out of your scope, transfer control back to the \
         coordinator.",
        preamble(profile)
    )
}

/// Build the default roster: the coordinator plus four specialists, all bound
/// to the same completion model.
pub fn default_agents(model: Arc<dyn CompletionModel>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();

    registry.register(AgentUnit::new(
        COORDINATOR,
        coordinator_instructions,
        model.clone(),
        allowed(true, &[]),
    ));

    registry.register(AgentUnit::new(
        "bookkeeper",
        bookkeeper_instructions,
        model.clone(),
        allowed(
            true,
            &[
                "record_transaction",
                "list_transactions",
                "check_balance",
                "update_balance",
                "check_budget",
                "update_budget",
                "average_income",
            ],
        ),
    ));

    registry.register(AgentUnit::new(
        "portfolio",
        portfolio_instructions,
        model.clone(),
        allowed(
            true,
            &[
                "add_debt",
                "add_installment",
                "add_subscription",
                "list_liabilities",
                "add_asset",
                "add_fixed_deposit",
                "list_investments",
                "update_asset",
                "update_fixed_deposit",
            ],
        ),
    ));

    registry.register(AgentUnit::new(
        "planner",
        planner_instructions,
        model.clone(),
        allowed(true, &["create_goal", "list_goals", "update_goal_status"]),
    ));

    registry.register(AgentUnit::new(
        "advisor",
        advisor_instructions,
        model,
        allowed(
            true,
            &[
                "add_wishlist_item",
                "update_wishlist_status",
                "list_wishlist",
                "check_balance",
                "list_transactions",
                "list_liabilities",
            ],
        ),
    ));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ScriptedModel;
    use crate::models::ProfileField;
    use serde_json::Value;

    fn roster() -> AgentRegistry {
        default_agents(Arc::new(ScriptedModel::new(vec![])))
    }

    #[test]
    fn default_roster_contains_coordinator_and_specialists() {
        let registry = roster();
        assert!(registry.contains(COORDINATOR));
        assert_eq!(
            registry.ids(),
            vec!["advisor", "bookkeeper", "coordinator", "planner", "portfolio"]
        );
    }

    #[test]
    fn specialists_do_not_share_write_actions() {
        let registry = roster();
        let bookkeeper = registry.get("bookkeeper").unwrap();
        let portfolio = registry.get("portfolio").unwrap();

        assert!(bookkeeper.allows("record_transaction"));
        assert!(!portfolio.allows("record_transaction"));
        assert!(!bookkeeper.allows("add_debt"));
        assert!(portfolio.allows("add_debt"));
    }

    #[test]
    fn coordinator_only_carries_essentials() {
        let registry = roster();
        let coordinator = registry.get(COORDINATOR).unwrap();
        assert!(coordinator.allows(handoff::TRANSFER_ACTION));
        assert!(!coordinator.allows("record_transaction"));
        assert!(!coordinator.allows("list_wishlist"));
    }

    #[test]
    fn instructions_re_render_after_preference_change() {
        let registry = roster();
        let bookkeeper = registry.get("bookkeeper").unwrap();

        let mut state = SessionState::new("thread-1");
        let before = bookkeeper.render_instructions(state.profile());
        assert!(before.contains("USD"));

        state
            .set(ProfileField::Currency, Value::from("IDR"))
            .unwrap();
        state.set(ProfileField::Name, Value::from("Revi")).unwrap();

        let after = bookkeeper.render_instructions(state.profile());
        assert!(after.contains("IDR"));
        assert!(after.contains("Revi"));
    }
}
