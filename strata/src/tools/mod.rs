//! Tool registry: declarative tool store, function-calling schemas, and a
//! uniform execution surface with per-tool rate limits and timeouts.

mod builtin;
mod registry;
mod spec;

pub use builtin::register_builtin_tools;
pub use registry::{
    default_registry, FnHandler, RegistryStats, ToolContext, ToolError, ToolHandler, ToolRegistry,
};
pub use spec::{ParamType, ToolKind, ToolParameter, ToolResult, ToolSpec};
