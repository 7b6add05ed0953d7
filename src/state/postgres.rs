//! Postgres-backed session store
//!
//! Schema is created lazily on first use so a fresh database works without a
//! migration step.

use super::{SessionState, SessionStore};
use crate::error::OrchestratorError;
use crate::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Connect lazily from a database URL.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid database URL: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_states (
                      session_id TEXT PRIMARY KEY,
                      active_agent TEXT NOT NULL,
                      profile JSONB NOT NULL,
                      messages JSONB NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestratorError::DatabaseError(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT active_agent, profile, messages FROM session_states WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OrchestratorError::DatabaseError(format!("Failed to load session: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        // Reassemble through the serde representation so the accessors stay
        // the only write path.
        let state = serde_json::from_value(serde_json::json!({
            "session_id": session_id,
            "active_agent": row
                .try_get::<String, _>("active_agent")
                .map_err(|e| OrchestratorError::DatabaseError(e.to_string()))?,
            "profile": row
                .try_get::<serde_json::Value, _>("profile")
                .map_err(|e| OrchestratorError::DatabaseError(e.to_string()))?,
            "messages": row
                .try_get::<serde_json::Value, _>("messages")
                .map_err(|e| OrchestratorError::DatabaseError(e.to_string()))?,
        }))?;

        Ok(Some(state))
    }

    async fn save_state(&self, state: &SessionState) -> Result<()> {
        self.ensure_schema().await?;

        let profile = serde_json::to_value(state.profile())?;
        let messages = serde_json::to_value(state.messages())?;

        sqlx::query(
            r#"
            INSERT INTO session_states (session_id, active_agent, profile, messages, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id) DO UPDATE
              SET active_agent = EXCLUDED.active_agent,
                  profile = EXCLUDED.profile,
                  messages = EXCLUDED.messages,
                  updated_at = NOW()
            "#,
        )
        .bind(state.session_id())
        .bind(state.active_agent())
        .bind(profile)
        .bind(messages)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestratorError::DatabaseError(format!("Failed to save session: {}", e)))?;

        Ok(())
    }
}
