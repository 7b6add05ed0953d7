//! Completion-call binding
//!
//! The orchestrator consumes language models through `CompletionModel`; the
//! Gemini client here is the production binding, `ScriptedModel` keeps the
//! system functional without an LLM dependency.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::OrchestratorError;
use crate::models::{ActionRequest, ActionSpec, Message, MessageRole};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

/// What a completion call produced: free-form text, a list of requested
/// action invocations, or both. When both are present the pending requests
/// take priority over the text.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: Option<String>,
    pub requests: Vec<ActionRequest>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            requests: Vec::new(),
        }
    }

    pub fn request(action: impl Into<String>, args: Value) -> Self {
        Self {
            text: None,
            requests: vec![ActionRequest::new(action, args)],
        }
    }

    pub fn with_request(mut self, action: impl Into<String>, args: Value) -> Self {
        self.requests.push(ActionRequest::new(action, args));
        self
    }
}

/// Trait for the external completion call
#[async_trait::async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(
        &self,
        instructions: &str,
        history: &[Message],
        allowed_actions: &[ActionSpec],
    ) -> Result<Completion>;
}

// =============================
// Gemini binding
// =============================

/// Reusable Gemini client (connection-pooled)
pub struct GeminiModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiModel {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OrchestratorError::ConfigError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        })
    }

    fn build_request(
        instructions: &str,
        history: &[Message],
        allowed_actions: &[ActionSpec],
    ) -> GeminiRequest {
        let contents = history.iter().map(content_from_message).collect();

        let tools = if allowed_actions.is_empty() {
            None
        } else {
            Some(vec![ToolDeclarations {
                function_declarations: allowed_actions
                    .iter()
                    .map(|spec| FunctionDeclaration {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        parameters: spec.parameters.clone(),
                    })
                    .collect(),
            }])
        };

        GeminiRequest {
            contents,
            tools,
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part::text(instructions)],
            },
        }
    }
}

#[async_trait::async_trait]
impl CompletionModel for GeminiModel {
    async fn complete(
        &self,
        instructions: &str,
        history: &[Message],
        allowed_actions: &[ActionSpec],
    ) -> Result<Completion> {
        if self.api_key.is_empty() {
            return Err(OrchestratorError::ModelCallFailed(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = Self::build_request(instructions, history, allowed_actions);

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestratorError::ModelCallFailed(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(OrchestratorError::ModelCallFailed(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestratorError::ModelCallFailed(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.into_iter().next().ok_or_else(|| {
            OrchestratorError::ModelCallFailed("No response from Gemini API".to_string())
        })?;

        let mut completion = Completion::default();
        let mut text = String::new();

        for part in candidate.content.parts {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                completion
                    .requests
                    .push(ActionRequest::new(call.name, call.args));
            }
        }

        if !text.is_empty() {
            completion.text = Some(text);
        }

        if completion.text.is_none() && completion.requests.is_empty() {
            return Err(OrchestratorError::ModelCallFailed(
                "Empty response from Gemini".to_string(),
            ));
        }

        Ok(completion)
    }
}

/// Map one session message onto a Gemini content entry. Action results and
/// handoff records travel back as function responses.
fn content_from_message(message: &Message) -> Content {
    match message.role {
        MessageRole::User => Content {
            role: "user".to_string(),
            parts: vec![Part::text(&message.content)],
        },
        MessageRole::Assistant => {
            let mut parts = Vec::new();
            if !message.content.is_empty() {
                parts.push(Part::text(&message.content));
            }
            if let Some(requests) = message
                .payload
                .as_ref()
                .and_then(|p| p.get("requests"))
                .and_then(Value::as_array)
            {
                for request in requests {
                    if let Ok(request) =
                        serde_json::from_value::<ActionRequest>(request.clone())
                    {
                        parts.push(Part::function_call(FunctionCall {
                            name: request.action,
                            args: request.args,
                        }));
                    }
                }
            }
            if parts.is_empty() {
                parts.push(Part::text(""));
            }
            Content {
                role: "model".to_string(),
                parts,
            }
        }
        MessageRole::Action | MessageRole::Handoff => {
            let name = message
                .payload
                .as_ref()
                .and_then(|p| p.get("action"))
                .and_then(Value::as_str)
                .unwrap_or("transfer_to_agent")
                .to_string();
            let response = message.payload.clone().unwrap_or_else(|| json!({}));
            Content {
                role: "user".to_string(),
                parts: vec![Part::function_response(FunctionResponse { name, response })],
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDeclarations>>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
            function_response: None,
        }
    }

    fn function_call(call: FunctionCall) -> Self {
        Self {
            text: None,
            function_call: Some(call),
            function_response: None,
        }
    }

    fn function_response(response: FunctionResponse) -> Self {
        Self {
            text: None,
            function_call: None,
            function_response: Some(response),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

// =============================
// Scripted binding for development & tests
// =============================

/// Pops a pre-recorded completion per call; keeps the orchestrator functional
/// without an LLM dependency (same role as a mock planner).
pub struct ScriptedModel {
    script: Mutex<VecDeque<Completion>>,
    fallback: String,
}

impl ScriptedModel {
    pub fn new(script: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: "I have nothing further to add.".to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

#[async_trait::async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(
        &self,
        _instructions: &str,
        _history: &[Message],
        _allowed_actions: &[ActionSpec],
    ) -> Result<Completion> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| OrchestratorError::ModelCallFailed("script poisoned".to_string()))?;

        Ok(script
            .pop_front()
            .unwrap_or_else(|| Completion::text(self.fallback.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_includes_declarations() {
        let specs = vec![ActionSpec {
            name: "record_transaction".to_string(),
            description: "Insert a transaction".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }];
        let history = vec![Message::user("I spent 50000 IDR on lunch")];

        let request = GeminiModel::build_request("You are a bookkeeper", &history, &specs);
        let encoded = serde_json::to_string(&request).unwrap();

        assert!(encoded.contains("functionDeclarations"));
        assert!(encoded.contains("record_transaction"));
        assert!(encoded.contains("I spent 50000 IDR on lunch"));
    }

    #[test]
    fn assistant_payload_maps_to_function_call_parts() {
        let request = ActionRequest::new("check_balance", json!({}));
        let payload = json!({ "requests": [request] });
        let msg = Message::assistant("bookkeeper", "", Some(payload));

        let content = content_from_message(&msg);
        assert_eq!(content.role, "model");
        assert!(content.parts[0].function_call.is_some());
    }

    #[tokio::test]
    async fn scripted_model_pops_in_order_then_falls_back() {
        let model = ScriptedModel::new(vec![
            Completion::text("first"),
            Completion::request("check_balance", json!({})),
        ]);

        let first = model.complete("", &[], &[]).await.unwrap();
        assert_eq!(first.text.as_deref(), Some("first"));

        let second = model.complete("", &[], &[]).await.unwrap();
        assert_eq!(second.requests.len(), 1);

        let third = model.complete("", &[], &[]).await.unwrap();
        assert!(third.text.is_some());
    }
}
