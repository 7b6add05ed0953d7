//! Router / dispatcher — the top-level turn state machine
//!
//! One external input drives one sequential walk:
//! select agent → run agent step → execute actions / process handoff / emit,
//! until a final message with no pending requests is produced. The only
//! suspension points are the completion call and the action call.

use crate::actions::{ActionContext, ActionInvoker, ProgressSink};
use crate::agents::{AgentRegistry, AgentUnit};
use crate::error::OrchestratorError;
use crate::handoff;
use crate::models::{AgentOutput, HandoffScope, Message};
use crate::state::{SessionState, SessionStore, COORDINATOR};
use crate::store::FinanceStore;
use crate::Result;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

const APOLOGY: &str =
    "I'm sorry, I couldn't reach my reasoning service just now. Please try again in a moment.";
const GENERIC_FAILURE: &str =
    "Something went wrong on my side while handling that. Please try again.";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Hard cap on agent steps per turn so a misbehaving agent or model
    /// cannot loop forever.
    pub max_steps_per_turn: usize,
    /// Backoff before the single completion-call retry.
    pub model_retry_backoff: Duration,
    /// Character budget per streamed chunk.
    pub chunk_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_steps_per_turn: 25,
            model_retry_backoff: Duration::from_millis(500),
            chunk_size: 48,
        }
    }
}

/// Events on the caller-facing chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Chunk(String),
    EndOfTurn,
}

/// Output side of one running turn: the chunk stream, the best-effort
/// progress stream and a cancel switch.
pub struct TurnHandle {
    pub events: mpsc::Receiver<TurnEvent>,
    pub progress: mpsc::Receiver<String>,
    cancel: Arc<AtomicBool>,
    pub task: tokio::task::JoinHandle<Result<()>>,
}

impl TurnHandle {
    /// Ask the running turn to stop. The in-flight action still runs to
    /// completion; nothing after it is executed or emitted.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Write side handed to the turn loop.
pub struct TurnEmitter {
    chunks: mpsc::Sender<TurnEvent>,
    progress: ProgressSink,
    cancelled: Arc<AtomicBool>,
}

impl TurnEmitter {
    pub fn new(chunks: mpsc::Sender<TurnEvent>, progress: ProgressSink) -> Self {
        Self {
            chunks,
            progress,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emitter plus both receivers, for driving a turn without `submit`.
    pub fn pair(buffer: usize) -> (Self, mpsc::Receiver<TurnEvent>, mpsc::Receiver<String>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer);
        let (progress_tx, progress_rx) = mpsc::channel(buffer);
        (
            Self::new(chunk_tx, ProgressSink::new(progress_tx)),
            chunk_rx,
            progress_rx,
        )
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn progress_sink(&self) -> &ProgressSink {
        &self.progress
    }

    /// Stream text to the caller in chunks. A dropped receiver counts as
    /// cancellation.
    async fn emit_text(&self, text: &str, chunk_size: usize) {
        for chunk in chunk_text(text, chunk_size) {
            if self.is_cancelled() {
                return;
            }
            if self
                .chunks
                .send(TurnEvent::Chunk(chunk.to_string()))
                .await
                .is_err()
            {
                self.cancelled.store(true, Ordering::SeqCst);
                return;
            }
        }
    }

    async fn end_of_turn(&self) {
        let _ = self.chunks.send(TurnEvent::EndOfTurn).await;
    }
}

/// Split on char boundaries into chunks of at most `size` characters.
fn chunk_text(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (idx, _) in text.char_indices() {
        if count == size {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Top-level dispatcher owning the turn loop.
pub struct Router {
    agents: AgentRegistry,
    coordinator: Arc<AgentUnit>,
    invoker: ActionInvoker,
    sessions: Arc<dyn SessionStore>,
    finance: Arc<dyn FinanceStore>,
    config: RouterConfig,
    /// One mutex per session id; tokio mutexes queue fairly, so turns run in
    /// arrival order.
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Router {
    pub fn new(
        agents: AgentRegistry,
        invoker: ActionInvoker,
        sessions: Arc<dyn SessionStore>,
        finance: Arc<dyn FinanceStore>,
        config: RouterConfig,
    ) -> Result<Self> {
        let coordinator = agents.get(COORDINATOR).ok_or_else(|| {
            OrchestratorError::ConfigError(
                "agent registry must contain the coordinator".to_string(),
            )
        })?;

        Ok(Self {
            agents,
            coordinator,
            invoker,
            sessions,
            finance,
            config,
            turn_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn turn_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Spawn a turn and hand back its output streams.
    pub fn submit(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        user_message: impl Into<String>,
    ) -> TurnHandle {
        let (emitter, events, progress) = TurnEmitter::pair(32);
        let cancel = emitter.cancel_flag();

        let router = Arc::clone(self);
        let session_id = session_id.into();
        let user_message = user_message.into();
        let task = tokio::spawn(async move {
            router.run_turn(&session_id, &user_message, &emitter).await
        });

        TurnHandle {
            events,
            progress,
            cancel,
            task,
        }
    }

    /// Process one external input from receipt to the end-of-turn marker.
    ///
    /// The session state is exclusively owned by this call for the whole
    /// turn; a failed turn saves nothing, so a retried input starts from the
    /// pre-turn state.
    pub async fn run_turn(
        &self,
        session_id: &str,
        user_message: &str,
        emitter: &TurnEmitter,
    ) -> Result<()> {
        let lock = self.turn_lock(session_id).await;
        let _turn_guard = lock.lock().await;

        let mut state = self
            .sessions
            .load_state(session_id)
            .await
            .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?
            .unwrap_or_else(|| SessionState::new(session_id));

        info!(session_id, active_agent = state.active_agent(), "Turn started");
        state.append_message(Message::user(user_message));

        match self.turn_loop(&mut state, emitter).await {
            Ok(()) => {
                self.sessions
                    .save_state(&state)
                    .await
                    .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
                emitter.end_of_turn().await;
                info!(session_id, "Turn complete");
                Ok(())
            }
            Err(e) => {
                error!(session_id, error = %e, "Turn aborted, state rolled back");
                Err(e)
            }
        }
    }

    fn select_agent(&self, state: &SessionState) -> Arc<AgentUnit> {
        match self.agents.get(state.active_agent()) {
            Some(agent) => agent,
            None => {
                warn!(
                    active_agent = state.active_agent(),
                    "Active agent not registered, routing to coordinator"
                );
                self.coordinator.clone()
            }
        }
    }

    async fn step_with_retry(
        &self,
        agent: &AgentUnit,
        state: &SessionState,
    ) -> Result<AgentOutput> {
        match agent.step(state, self.invoker.registry()).await {
            Err(OrchestratorError::ModelCallFailed(first)) => {
                warn!(agent = agent.id(), error = %first, "Model call failed, retrying once");
                tokio::time::sleep(self.config.model_retry_backoff).await;
                agent.step(state, self.invoker.registry()).await
            }
            other => other,
        }
    }

    async fn turn_loop(&self, state: &mut SessionState, emitter: &TurnEmitter) -> Result<()> {
        let mut steps = 0usize;

        // Top level: re-reads the active-agent pointer, so a transfer to the
        // coordinator lands here.
        'turn: loop {
            let mut agent = self.select_agent(state);

            // Local scope: specialist-to-specialist transfers stay inside.
            loop {
                steps += 1;
                if steps > self.config.max_steps_per_turn {
                    return Err(OrchestratorError::TurnStepLimitExceeded(
                        self.config.max_steps_per_turn,
                    ));
                }
                if emitter.is_cancelled() {
                    info!(agent = agent.id(), "Cancellation observed, ending turn");
                    return Ok(());
                }

                let output = match self.step_with_retry(&agent, state).await {
                    Ok(output) => output,
                    Err(OrchestratorError::ModelCallFailed(e)) => {
                        warn!(agent = agent.id(), error = %e, "Model unavailable after retry");
                        state.append_message(Message::assistant(agent.id(), APOLOGY, None));
                        emitter.emit_text(APOLOGY, self.config.chunk_size).await;
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };

                match output {
                    AgentOutput::FinalMessage(text) => {
                        state.append_message(Message::assistant(agent.id(), &text, None));
                        emitter.emit_text(&text, self.config.chunk_size).await;
                        return Ok(());
                    }
                    AgentOutput::ActionRequests { text, requests } => {
                        state.append_message(Message::assistant(
                            agent.id(),
                            text.unwrap_or_default(),
                            Some(json!({ "requests": &requests })),
                        ));

                        // Ordinary actions first, in the order produced; a
                        // handoff always closes the step.
                        let (ordinary, transfers): (Vec<_>, Vec<_>) = requests
                            .into_iter()
                            .partition(|r| r.action != handoff::TRANSFER_ACTION);

                        for request in ordinary {
                            if emitter.is_cancelled() {
                                info!(
                                    agent = agent.id(),
                                    "Cancellation observed, skipping remaining requests"
                                );
                                return Ok(());
                            }

                            emitter
                                .progress_sink()
                                .notify(format!("Running {}..", request.action));

                            let mut ctx = ActionContext {
                                state: &mut *state,
                                store: self.finance.as_ref(),
                                progress: emitter.progress_sink(),
                            };
                            match self.invoker.invoke(&agent, &request, &mut ctx).await {
                                Ok(message) => state.append_message(message),
                                Err(e @ OrchestratorError::UnauthorizedAction { .. }) => {
                                    error!(
                                        agent = agent.id(),
                                        action = %request.action,
                                        error = %e,
                                        "Unauthorized action request"
                                    );
                                    state.append_message(Message::assistant(
                                        agent.id(),
                                        GENERIC_FAILURE,
                                        None,
                                    ));
                                    emitter
                                        .emit_text(GENERIC_FAILURE, self.config.chunk_size)
                                        .await;
                                    return Ok(());
                                }
                                Err(e) => return Err(e),
                            }
                        }

                        let mut transfers = transfers.into_iter();
                        if let Some(transfer) = transfers.next() {
                            if transfers.next().is_some() {
                                warn!(
                                    agent = agent.id(),
                                    "Multiple transfer requests in one step, extras dropped"
                                );
                            }

                            match handoff::process_handoff(
                                agent.id(),
                                &transfer.args,
                                &self.agents,
                                state,
                            ) {
                                Ok(record) => match record.scope {
                                    HandoffScope::ToCoordinator => continue 'turn,
                                    HandoffScope::Local => {
                                        match self.agents.get(state.active_agent()) {
                                            Some(next) => agent = next,
                                            None => continue 'turn,
                                        }
                                    }
                                },
                                Err(
                                    e @ (OrchestratorError::UnknownAgent(_)
                                    | OrchestratorError::InvalidActionInput(_)),
                                ) => {
                                    // The turn continues with the issuing
                                    // agent; it sees the failure and decides.
                                    warn!(agent = agent.id(), error = %e, "Handoff rejected");
                                    state.append_message(Message::action_result(
                                        agent.id(),
                                        handoff::TRANSFER_ACTION,
                                        json!({
                                            "status": "error",
                                            "error_message": e.to_string(),
                                        }),
                                    ));
                                }
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{
        create_default_registry, Action, ActionRegistry, ActionInvoker,
    };
    use crate::agents::default_agents;
    use crate::completion::{Completion, CompletionModel, ScriptedModel};
    use crate::models::{ActionSpec, MessageRole};
    use crate::state::InMemorySessionStore;
    use crate::store::InMemoryFinanceStore;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> RouterConfig {
        RouterConfig {
            max_steps_per_turn: 25,
            model_retry_backoff: Duration::from_millis(1),
            chunk_size: 16,
        }
    }

    fn scripted_router(script: Vec<Completion>) -> Arc<Router> {
        scripted_router_with_stores(
            script,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryFinanceStore::new()),
        )
    }

    fn scripted_router_with_stores(
        script: Vec<Completion>,
        sessions: Arc<dyn SessionStore>,
        finance: Arc<dyn FinanceStore>,
    ) -> Arc<Router> {
        let model = Arc::new(ScriptedModel::new(script));
        let agents = default_agents(model);
        let invoker = ActionInvoker::new(create_default_registry("memory/procedural"));
        Arc::new(Router::new(agents, invoker, sessions, finance, test_config()).unwrap())
    }

    async fn drain(handle: &mut TurnHandle) -> (String, bool) {
        let mut text = String::new();
        let mut ended = false;
        while let Some(event) = handle.events.recv().await {
            match event {
                TurnEvent::Chunk(chunk) => text.push_str(&chunk),
                TurnEvent::EndOfTurn => {
                    ended = true;
                    break;
                }
            }
        }
        (text, ended)
    }

    #[tokio::test]
    async fn always_final_agent_terminates_in_one_step() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = scripted_router_with_stores(
            vec![Completion::text("Hello!")],
            sessions.clone(),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let mut handle = router.submit("thread-1", "hi");
        let (text, ended) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert_eq!(text, "Hello!");
        assert!(ended);

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[0].role, MessageRole::User);
        assert_eq!(state.messages()[1].role, MessageRole::Assistant);
    }

    /// An agent that always hands off to itself must terminate at the step
    /// limit, not loop forever.
    #[tokio::test]
    async fn self_handoff_terminates_at_step_limit() {
        struct SelfTransfer;

        #[async_trait::async_trait]
        impl CompletionModel for SelfTransfer {
            async fn complete(
                &self,
                _instructions: &str,
                _history: &[Message],
                _allowed: &[ActionSpec],
            ) -> Result<Completion> {
                Ok(Completion::request(
                    handoff::TRANSFER_ACTION,
                    json!({"agent_name": "bookkeeper"}),
                ))
            }
        }

        let agents = default_agents(Arc::new(SelfTransfer));
        let invoker = ActionInvoker::new(create_default_registry("memory/procedural"));
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = Arc::new(
            Router::new(
                agents,
                invoker,
                sessions.clone(),
                Arc::new(InMemoryFinanceStore::new()),
                test_config(),
            )
            .unwrap(),
        );

        let mut handle = router.submit("thread-1", "hi");
        while handle.events.recv().await.is_some() {}
        let result = handle.task.await.unwrap();

        assert!(matches!(
            result,
            Err(OrchestratorError::TurnStepLimitExceeded(25))
        ));
        // Rollback: nothing was saved.
        assert!(sessions.load_state("thread-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lunch_scenario_records_handoffs_action_and_final() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let finance: Arc<dyn FinanceStore> = Arc::new(InMemoryFinanceStore::new());
        let router = scripted_router_with_stores(
            vec![
                Completion::request(
                    handoff::TRANSFER_ACTION,
                    json!({"agent_name": "bookkeeper", "reason": "expense tracking"}),
                ),
                Completion::request(
                    "record_transaction",
                    json!({
                        "timestamp": "2025-03-15 12:30:00",
                        "amount": 50000,
                        "currency": "IDR",
                        "type": "expense",
                        "description": "lunch",
                        "category": "food"
                    }),
                ),
                Completion::request(
                    handoff::TRANSFER_ACTION,
                    json!({"agent_name": COORDINATOR}),
                ),
                Completion::text("Recorded your 50000 IDR lunch."),
            ],
            sessions.clone(),
            finance,
        );

        let mut handle = router.submit("thread-1", "I spent 50000 IDR on lunch");
        let (text, ended) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert!(ended);
        assert_eq!(text, "Recorded your 50000 IDR lunch.");

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        let handoffs: Vec<_> = state
            .messages()
            .iter()
            .filter_map(Message::handoff_record)
            .collect();
        assert_eq!(handoffs.len(), 2);
        assert_eq!(handoffs[0].to_agent, "bookkeeper");
        assert_eq!(handoffs[0].scope, HandoffScope::Local);
        assert_eq!(handoffs[1].to_agent, COORDINATOR);
        assert_eq!(handoffs[1].scope, HandoffScope::ToCoordinator);

        let action_results: Vec<_> = state
            .messages()
            .iter()
            .filter(|m| m.role == MessageRole::Action)
            .collect();
        assert_eq!(action_results.len(), 1);
        assert_eq!(
            action_results[0].payload.as_ref().unwrap()["status"],
            "success"
        );

        let finals: Vec<_> = state
            .messages()
            .iter()
            .filter(|m| m.role == MessageRole::Assistant && m.payload.is_none())
            .collect();
        assert_eq!(finals.len(), 1);

        // Control returned to the coordinator.
        assert_eq!(state.active_agent(), COORDINATOR);
    }

    #[tokio::test]
    async fn active_agent_survives_across_turns() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = scripted_router_with_stores(
            vec![
                // Turn 1: coordinator parks the session on the bookkeeper.
                Completion::request(
                    handoff::TRANSFER_ACTION,
                    json!({"agent_name": "bookkeeper"}),
                ),
                Completion::text("What did you spend?"),
                // Turn 2 goes straight to the bookkeeper.
                Completion::text("Noted."),
            ],
            sessions.clone(),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let mut handle = router.submit("thread-1", "track an expense");
        drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(state.active_agent(), "bookkeeper");
        let before: Vec<_> = state.messages().iter().map(|m| m.message_id).collect();

        let mut handle = router.submit("thread-1", "50000 IDR lunch");
        drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        // Monotonic append: the first turn's messages are a prefix.
        let after: Vec<_> = state.messages().iter().map(|m| m.message_id).collect();
        assert!(after.len() > before.len());
        assert_eq!(&after[..before.len()], &before[..]);
        // The second final message came from the bookkeeper without a new
        // handoff.
        let last = state.messages().last().unwrap();
        assert_eq!(last.agent.as_deref(), Some("bookkeeper"));
    }

    #[tokio::test]
    async fn unknown_handoff_target_keeps_issuing_agent() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = scripted_router_with_stores(
            vec![
                Completion::request(
                    handoff::TRANSFER_ACTION,
                    json!({"agent_name": "croupier"}),
                ),
                Completion::text("I can't route that, but I can still help."),
            ],
            sessions.clone(),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let mut handle = router.submit("thread-1", "hello");
        let (text, _) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert_eq!(text, "I can't route that, but I can still help.");

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(state.active_agent(), COORDINATOR);

        let rejection = state
            .messages()
            .iter()
            .find(|m| m.role == MessageRole::Action)
            .unwrap();
        let payload = rejection.payload.as_ref().unwrap();
        assert_eq!(payload["status"], "error");
        assert!(payload["error_message"]
            .as_str()
            .unwrap()
            .contains("Unknown agent"));
    }

    #[tokio::test]
    async fn failing_action_does_not_abort_the_turn() {
        struct BrokenStorage;

        #[async_trait::async_trait]
        impl Action for BrokenStorage {
            fn name(&self) -> &'static str {
                "check_balance"
            }
            fn description(&self) -> &'static str {
                "Always raises a storage error"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {}})
            }
            async fn execute(
                &self,
                _args: &Value,
                _ctx: &mut ActionContext<'_>,
            ) -> Result<Value> {
                Err(OrchestratorError::DatabaseError("disk on fire".into()))
            }
        }

        let model = Arc::new(ScriptedModel::new(vec![
            Completion::request(handoff::TRANSFER_ACTION, json!({"agent_name": "bookkeeper"})),
            Completion::request("check_balance", json!({})),
            Completion::text("I couldn't read your balance right now."),
        ]));
        let agents = default_agents(model);
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(BrokenStorage));
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = Arc::new(
            Router::new(
                agents,
                ActionInvoker::new(registry),
                sessions.clone(),
                Arc::new(InMemoryFinanceStore::new()),
                test_config(),
            )
            .unwrap(),
        );

        let mut handle = router.submit("thread-1", "what's my balance?");
        let (text, ended) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert!(ended);
        assert_eq!(text, "I couldn't read your balance right now.");

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        let error_message = state
            .messages()
            .iter()
            .find(|m| m.role == MessageRole::Action)
            .unwrap();
        assert_eq!(error_message.payload.as_ref().unwrap()["status"], "error");
    }

    #[tokio::test]
    async fn unauthorized_action_ends_turn_with_generic_failure() {
        // The coordinator never carries record_transaction.
        let router = scripted_router(vec![Completion::request(
            "record_transaction",
            json!({"timestamp": "2025-01-01", "amount": 1, "type": "expense",
                   "description": "x", "category": "y"}),
        )]);

        let mut handle = router.submit("thread-1", "do something sneaky");
        let (text, ended) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert!(ended);
        assert_eq!(text, GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn ordinary_actions_run_before_the_handoff() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = scripted_router_with_stores(
            vec![
                Completion::request("current_time", json!({}))
                    .with_request(handoff::TRANSFER_ACTION, json!({"agent_name": "planner"})),
                Completion::text("Let's set that goal."),
            ],
            sessions.clone(),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let mut handle = router.submit("thread-1", "plan a goal for next year");
        drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        let action_idx = state
            .messages()
            .iter()
            .position(|m| m.role == MessageRole::Action)
            .unwrap();
        let handoff_idx = state
            .messages()
            .iter()
            .position(|m| m.role == MessageRole::Handoff)
            .unwrap();
        assert!(action_idx < handoff_idx);
        assert_eq!(state.active_agent(), "planner");
    }

    #[tokio::test]
    async fn model_failure_retries_once_then_apologizes() {
        struct FlakyModel {
            calls: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl CompletionModel for FlakyModel {
            async fn complete(
                &self,
                _instructions: &str,
                _history: &[Message],
                _allowed: &[ActionSpec],
            ) -> Result<Completion> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::ModelCallFailed("overloaded".into()))
            }
        }

        let model = Arc::new(FlakyModel {
            calls: AtomicUsize::new(0),
        });
        let agents = default_agents(model.clone());
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = Arc::new(
            Router::new(
                agents,
                ActionInvoker::new(create_default_registry("memory/procedural")),
                sessions.clone(),
                Arc::new(InMemoryFinanceStore::new()),
                test_config(),
            )
            .unwrap(),
        );

        let mut handle = router.submit("thread-1", "hi");
        let (text, ended) = drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        assert!(ended);
        assert_eq!(text, APOLOGY);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(state.messages().last().unwrap().content, APOLOGY);
    }

    #[tokio::test]
    async fn cancellation_before_first_step_runs_nothing() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let router = scripted_router_with_stores(
            vec![Completion::text("should never be emitted")],
            sessions.clone(),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let (emitter, mut events, _progress) = TurnEmitter::pair(8);
        emitter.cancel_flag().store(true, Ordering::SeqCst);

        router.run_turn("thread-1", "hi", &emitter).await.unwrap();

        // Only the end-of-turn marker; no chunks were produced.
        assert_eq!(events.recv().await, Some(TurnEvent::EndOfTurn));
        let state = sessions.load_state("thread-1").await.unwrap().unwrap();
        assert_eq!(state.messages().len(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_cancellation() {
        let router = scripted_router(vec![Completion::text(
            "a rather long message that would stream in several chunks",
        )]);

        let (emitter, events, _progress) = TurnEmitter::pair(1);
        drop(events);

        router.run_turn("thread-1", "hi", &emitter).await.unwrap();
        assert!(emitter.is_cancelled());
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_as_turn_failure() {
        struct ReadOnlyStore;

        #[async_trait::async_trait]
        impl SessionStore for ReadOnlyStore {
            async fn load_state(&self, _session_id: &str) -> Result<Option<SessionState>> {
                Ok(None)
            }
            async fn save_state(&self, _state: &SessionState) -> Result<()> {
                Err(OrchestratorError::DatabaseError("read-only".into()))
            }
        }

        let router = scripted_router_with_stores(
            vec![Completion::text("hello")],
            Arc::new(ReadOnlyStore),
            Arc::new(InMemoryFinanceStore::new()),
        );

        let mut handle = router.submit("thread-1", "hi");
        while handle.events.recv().await.is_some() {}
        let result = handle.task.await.unwrap();
        assert!(matches!(
            result,
            Err(OrchestratorError::PersistenceFailed(_))
        ));
    }

    #[tokio::test]
    async fn progress_notices_flow_on_the_side_channel() {
        let router = scripted_router(vec![
            Completion::request(handoff::TRANSFER_ACTION, json!({"agent_name": "bookkeeper"})),
            Completion::request("check_balance", json!({})),
            Completion::text("All done."),
        ]);

        let mut handle = router.submit("thread-1", "balance?");
        drain(&mut handle).await;
        handle.task.await.unwrap().unwrap();

        let mut notices = Vec::new();
        while let Ok(notice) = handle.progress.try_recv() {
            notices.push(notice);
        }
        assert!(notices.iter().any(|n| n.contains("check_balance")));
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let chunks = chunk_text("héllo wörld", 4);
        assert_eq!(chunks.concat(), "héllo wörld");
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
        assert!(chunk_text("", 8).is_empty());
    }
}
