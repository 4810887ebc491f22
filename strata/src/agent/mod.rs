//! Agents: the base runtime plus the planner/coder/reviewer specialists.
//!
//! Specialists differ only in default tier/model, system prompt, and how
//! they post-process model output; none holds cross-agent state.

mod base;
mod coder;
mod planner;
mod reviewer;

pub use base::{
    AgentBehavior, AgentContext, AgentError, AgentPhase, AgentRuntime, AgentStats, MemoryEntry,
};
pub use coder::CoderAgent;
pub use planner::PlannerAgent;
pub use reviewer::ReviewerAgent;
