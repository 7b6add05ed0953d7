//! Handoff protocol
//!
//! A handoff is a restricted action under the reserved id
//! `transfer_to_agent`. It is the only code path that mutates
//! `active_agent`, and every processed transfer leaves an auditable
//! handoff record in the message sequence.

use crate::agents::AgentRegistry;
use crate::error::OrchestratorError;
use crate::models::{ActionSpec, HandoffRecord, HandoffScope, Message};
use crate::state::{SessionState, COORDINATOR};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Reserved action id for control transfer.
pub const TRANSFER_ACTION: &str = "transfer_to_agent";

/// Declaration of the transfer action, appended to every agent's action set.
pub fn transfer_spec() -> ActionSpec {
    ActionSpec {
        name: TRANSFER_ACTION.to_string(),
        description: "Hand off control of the conversation to another agent".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string", "description": "Target agent id"},
                "reason": {"type": "string", "description": "Why control is transferred"}
            },
            "required": ["agent_name"]
        }),
    }
}

#[derive(Deserialize)]
struct TransferArgs {
    agent_name: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Process one transfer request issued by `from_agent`.
///
/// Validates the target (the coordinator itself is a valid target), appends
/// the handoff record to the message sequence and moves the active-agent
/// pointer. An unknown target leaves the state untouched so the turn can
/// continue with the issuing agent.
pub fn process_handoff(
    from_agent: &str,
    args: &Value,
    agents: &AgentRegistry,
    state: &mut SessionState,
) -> Result<HandoffRecord> {
    let args: TransferArgs = serde_json::from_value(args.clone())
        .map_err(|e| OrchestratorError::InvalidActionInput(format!("transfer args: {}", e)))?;

    if !agents.contains(&args.agent_name) {
        return Err(OrchestratorError::UnknownAgent(args.agent_name));
    }

    let scope = if args.agent_name == COORDINATOR {
        HandoffScope::ToCoordinator
    } else {
        HandoffScope::Local
    };

    let record = HandoffRecord {
        from_agent: from_agent.to_string(),
        to_agent: args.agent_name.clone(),
        scope,
        reason: args.reason,
    };

    info!(
        from = from_agent,
        to = %record.to_agent,
        scope = ?record.scope,
        "Processing handoff"
    );

    state.append_message(Message::handoff(&record));
    state.set_active_agent(&record.to_agent);

    Ok(record)
}
