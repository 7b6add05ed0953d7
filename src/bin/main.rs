use finance_assistant::{
    actions::{create_default_registry, ActionInvoker},
    agents::default_agents,
    completion::{Completion, ScriptedModel},
    handoff::TRANSFER_ACTION,
    router::{Router, RouterConfig, TurnEvent},
    state::InMemorySessionStore,
    store::InMemoryFinanceStore,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// Demo: drives one scripted conversation through the full turn loop —
/// coordinator handoff, a recorded transaction, handoff back, final answer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Finance assistant demo starting");

    let model = Arc::new(ScriptedModel::new(vec![
        Completion::request(
            TRANSFER_ACTION,
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
        Completion::request(TRANSFER_ACTION, json!({"agent_name": "coordinator"})),
        Completion::text("Done! I recorded your 50,000 IDR lunch under food."),
    ]));

    let agents = default_agents(model);
    let invoker = ActionInvoker::new(create_default_registry("memory/procedural"));
    let router = Arc::new(Router::new(
        agents,
        invoker,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryFinanceStore::new()),
        RouterConfig::default(),
    )?);

    let mut handle = router.submit("demo-session", "I spent 50000 IDR on lunch");

    print!("Assistant: ");
    while let Some(event) = handle.events.recv().await {
        match event {
            TurnEvent::Chunk(chunk) => {
                print!("{}", chunk);
                std::io::stdout().flush()?;
            }
            TurnEvent::EndOfTurn => break,
        }
    }
    println!();

    while let Ok(notice) = handle.progress.try_recv() {
        println!("  [progress] {}", notice);
    }

    handle.task.await??;
    info!("Demo turn complete");

    Ok(())
}
