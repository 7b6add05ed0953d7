//! Financial goal actions

use super::{parse_args, parse_timestamp, Action, ActionContext};
use crate::store::{GoalStatus, NewGoal};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct CreateGoalParams {
    description: String,
    deadline: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Create and persist a financial goal
pub struct CreateGoal;

#[async_trait::async_trait]
impl Action for CreateGoal {
    fn name(&self) -> &'static str {
        "create_goal"
    }

    fn description(&self) -> &'static str {
        "Create a financial goal with a deadline"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Goal description"},
                "deadline": {"type": "string", "description": "'YYYY-MM-DD HH:MM:SS'"},
                "notes": {"type": "string", "description": "Optional notes from the user"}
            },
            "required": ["description", "deadline"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: CreateGoalParams = parse_args(args)?;
        let deadline = parse_timestamp(&params.deadline)?;

        ctx.progress.notify("Creating goal..");
        let record = ctx
            .store
            .insert_goal(NewGoal {
                description: params.description.clone(),
                deadline,
                notes: params.notes,
            })
            .await?;

        Ok(json!({
            "status": "success",
            "summary": format!(
                "Goal created: '{}' by {}. ID: {}",
                params.description,
                deadline.format("%Y-%m-%d"),
                record.id
            ),
            "goal": record,
        }))
    }
}

/// List every stored goal
pub struct ListGoals;

#[async_trait::async_trait]
impl Action for ListGoals {
    fn name(&self) -> &'static str {
        "list_goals"
    }

    fn description(&self) -> &'static str {
        "Retrieve all financial goals"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Retrieving goals..");
        let goals = ctx.store.list_goals().await?;
        Ok(json!({
            "status": "success",
            "summary": format!("Retrieved {} goal(s)", goals.len()),
            "goals": goals,
        }))
    }
}

#[derive(Deserialize)]
struct UpdateGoalStatusParams {
    id: i64,
    status: GoalStatus,
}

/// Move a goal through its lifecycle
pub struct UpdateGoalStatus;

#[async_trait::async_trait]
impl Action for UpdateGoalStatus {
    fn name(&self) -> &'static str {
        "update_goal_status"
    }

    fn description(&self) -> &'static str {
        "Mark a goal as in progress, achieved or abandoned"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer", "description": "Goal id"},
                "status": {"type": "string", "enum": ["in_progress", "achieved", "abandoned"]}
            },
            "required": ["id", "status"]
        })
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: UpdateGoalStatusParams = parse_args(args)?;

        ctx.progress.notify("Updating goal status..");
        match ctx.store.update_goal_status(params.id, params.status).await? {
            Some(goal) => Ok(json!({
                "status": "success",
                "summary": format!("Goal {} is now {:?}", goal.id, goal.status),
                "goal": goal,
            })),
            None => Ok(json!({
                "status": "error",
                "error_message": format!("Goal {} not found", params.id),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProgressSink;
    use crate::state::SessionState;
    use crate::store::InMemoryFinanceStore;

    #[tokio::test]
    async fn goal_create_then_achieve() {
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let created = CreateGoal
            .execute(
                &json!({"description": "Emergency fund", "deadline": "2026-12-31"}),
                &mut ctx,
            )
            .await
            .unwrap();
        let id = created["goal"]["id"].as_i64().unwrap();

        let updated = UpdateGoalStatus
            .execute(&json!({"id": id, "status": "achieved"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(updated["status"], "success");

        let listed = ListGoals.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(listed["goals"][0]["status"], "achieved");
    }
}
