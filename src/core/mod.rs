// src/core/mod.rs - Selection, budgeting and execution engine

pub mod budget;
pub mod executor;
pub mod orchestrator;
pub mod response_cache;
pub mod selector;
pub mod types;

pub use budget::{BudgetController, BudgetLimits, BudgetState, ExceededReason, GateDecision, ResourceUsage};
pub use executor::{Executor, ResourceScope};
pub use orchestrator::{Orchestrator, OrchestratorStats};
pub use response_cache::ResponseCache;
pub use selector::{SelectionRequest, SelectionResult, SkipReason, SkippedTask, TaskSelector};
pub use types::*;
