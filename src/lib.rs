//! Multi-agent personal finance assistant
//!
//! A coordinating agent routes each conversation turn to specialist agents
//! (bookkeeping, portfolio, goals, purchase advice), each backed by a
//! completion call and a bounded set of actions. The router guarantees
//! exactly-once control transfer, an append-only message history and
//! termination under a configurable step limit.
//!
//! TURN LOOP:
//! INPUT → SELECT AGENT → AGENT STEP → {ACTIONS | HANDOFF | EMIT} → ...

pub mod actions;
pub mod agents;
pub mod api;
pub mod completion;
pub mod error;
pub mod handoff;
pub mod models;
pub mod router;
pub mod state;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use router::{Router, RouterConfig, TurnEvent, TurnHandle};
pub use state::{SessionState, COORDINATOR};
