//! Actions shared by every agent: clock access and procedural instructions

use super::{parse_args, Action, ActionContext};
use crate::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

/// Get the current timestamp
pub struct CurrentTime;

#[async_trait::async_trait]
impl Action for CurrentTime {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current date and time"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Retrieving current time..");
        Ok(json!({
            "status": "success",
            "current_time": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }))
    }
}

/// List the task instructions available in the procedural directory
pub struct ListInstructions {
    dir: PathBuf,
}

impl ListInstructions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl Action for ListInstructions {
    fn name(&self) -> &'static str {
        "list_instructions"
    }

    fn description(&self) -> &'static str {
        "List the task instructions this assistant knows how to follow"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, _args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        ctx.progress.notify("Listing available instructions..");

        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => {
                return Ok(json!({
                    "status": "error",
                    "error_message": "No instruction directory is configured",
                }))
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".txt") {
                names.push(stem.to_string());
            }
        }
        names.sort();

        Ok(json!({
            "status": "success",
            "instruction_list": names,
        }))
    }
}

#[derive(Deserialize)]
struct GetInstructionParams {
    task_name: String,
}

/// Fetch one task instruction by name
pub struct GetInstruction {
    dir: PathBuf,
}

impl GetInstruction {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl Action for GetInstruction {
    fn name(&self) -> &'static str {
        "get_instruction"
    }

    fn description(&self) -> &'static str {
        "Fetch the step-by-step instruction for a named task"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_name": {"type": "string", "description": "Task name"}
            },
            "required": ["task_name"]
        })
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value, ctx: &mut ActionContext<'_>) -> Result<Value> {
        let params: GetInstructionParams = parse_args(args)?;
        ctx.progress
            .notify(format!("Retrieving `{}` task instruction..", params.task_name));

        // Keep the lookup inside the configured directory.
        if params.task_name.contains(['/', '\\']) || params.task_name.contains("..") {
            return Ok(json!({
                "status": "error",
                "error_message": "Invalid task name",
            }));
        }

        let path = self.dir.join(format!("{}.txt", params.task_name));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(json!({
                "status": "success",
                "task_instruction": text,
            })),
            Err(_) => Ok(json!({
                "status": "error",
                "error_message": format!("No instruction found for task '{}'", params.task_name),
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
    async fn get_instruction_rejects_path_escape() {
        let action = GetInstruction::new("/tmp/instructions");
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = action
            .execute(&json!({"task_name": "../secrets"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(result["status"], "error");
    }

    #[tokio::test]
    async fn current_time_reports_success() {
        let action = CurrentTime;
        let mut state = SessionState::new("thread-1");
        let store = InMemoryFinanceStore::new();
        let progress = ProgressSink::disabled();
        let mut ctx = ActionContext {
            state: &mut state,
            store: &store,
            progress: &progress,
        };

        let result = action.execute(&json!({}), &mut ctx).await.unwrap();
        assert_eq!(result["status"], "success");
        assert!(result["current_time"].is_string());
    }
}
