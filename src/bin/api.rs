use finance_assistant::{
    actions::{create_default_registry, ActionInvoker},
    agents::default_agents,
    api::start_server,
    completion::GeminiModel,
    router::{Router, RouterConfig},
    state::{InMemorySessionStore, PostgresSessionStore, SessionStore},
    store::{FinanceStore, InMemoryFinanceStore, PostgresFinanceStore},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        warn!("GEMINI_API_KEY not set; completion calls will fail");
        String::new()
    });

    let port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let instructions_dir = std::env::var("INSTRUCTIONS_DIR")
        .unwrap_or_else(|_| "memory/procedural".to_string());

    info!("Finance Assistant - API Server");
    info!("Port: {}", port);

    let (sessions, finance): (Arc<dyn SessionStore>, Arc<dyn FinanceStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                info!("Storage backend: postgres");
                (
                    Arc::new(PostgresSessionStore::connect_lazy(&url)?),
                    Arc::new(PostgresFinanceStore::connect_lazy(&url)?),
                )
            }
            Err(_) => {
                info!("Storage backend: in-memory");
                (
                    Arc::new(InMemorySessionStore::new()),
                    Arc::new(InMemoryFinanceStore::new()),
                )
            }
        };

    let model = Arc::new(GeminiModel::new(gemini_api_key)?);
    let agents = default_agents(model);
    let agent_count = agents.ids().len();
    let invoker = ActionInvoker::new(create_default_registry(instructions_dir));

    let router = Arc::new(Router::new(
        agents,
        invoker,
        sessions,
        finance,
        RouterConfig::default(),
    )?);

    info!("Router initialized with {} agents", agent_count);
    start_server(router, port).await?;

    Ok(())
}
