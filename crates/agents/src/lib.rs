//! `agents` crate — the `Agent` capability contract and its registry.
//!
//! Every capability unit — domain agent and test double alike — must
//! implement [`Agent`]. The engine crate dispatches invocations through this
//! trait object and never looks inside an agent.

pub mod error;
pub mod traits;
pub mod registry;
pub mod mock;
pub mod echo;

pub use error::AgentError;
pub use traits::{Agent, AgentContext, AgentResult, AgentStatus, SharedMemory};
pub use registry::AgentRegistry;
