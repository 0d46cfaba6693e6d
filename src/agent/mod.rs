//! # Conversational Agent Pipeline
//!
//! Everything between the candidate's microphone and the remote voice agent.
//!
//! ## Key Components:
//! - **protocol**: wire messages and the closed [`protocol::AgentEvent`] enum
//! - **transport**: WebSocket channel with a readiness gate (`/v1/agent/converse` style endpoints)
//! - **session**: protocol state machine for one interview
//! - **tools**: answers the agent's function calls
//! - **driver**: the per-interview event loop tying it all together

pub mod driver;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
