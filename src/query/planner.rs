use crate::mysql::protocol::{ER_ERROR_FIRST, ER_GEN_PLAN_FAILED};
use crate::mysql::send_buf::SendBuf;

use super::QueryContext;

/// Failure reported by a planning or execution phase. `code` stays at
/// `ER_ERROR_FIRST` when the phase did not pick a specific error; the state
/// machine then substitutes its per-phase default.
#[derive(Debug, Clone)]
pub struct PlanError {
    pub code: u16,
    pub msg: String,
}

impl PlanError {
    pub fn new(code: u16, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn unset(msg: impl Into<String>) -> Self {
        Self {
            code: ER_ERROR_FIRST,
            msg: msg.into(),
        }
    }
}

/// Planner/executor collaborator. The contract is synchronous from the state
/// machine's perspective; each phase either succeeds or reports one
/// [`PlanError`]. `execute` appends the full result (or OK) packet stream for
/// the statement to `send_buf`.
pub trait Planner: Send + Sync {
    fn analyze_logical(&self, ctx: &mut QueryContext) -> Result<(), PlanError>;
    fn create_plan_tree(&self, ctx: &mut QueryContext) -> Result<(), PlanError>;
    fn analyze_physical(&self, ctx: &mut QueryContext) -> Result<(), PlanError>;
    fn execute(&self, ctx: &mut QueryContext, send_buf: &mut SendBuf) -> Result<(), PlanError>;
}

/// Placeholder used until an executor service is wired in: every statement
/// that reaches the planner fails with a plan-generation error.
pub struct NullPlanner;

impl Planner for NullPlanner {
    fn analyze_logical(&self, ctx: &mut QueryContext) -> Result<(), PlanError> {
        Err(PlanError::new(
            ER_GEN_PLAN_FAILED,
            format!("no query engine attached, sql: {}", ctx.sql),
        ))
    }

    fn create_plan_tree(&self, _ctx: &mut QueryContext) -> Result<(), PlanError> {
        Err(PlanError::unset("no query engine attached"))
    }

    fn analyze_physical(&self, _ctx: &mut QueryContext) -> Result<(), PlanError> {
        Err(PlanError::unset("no query engine attached"))
    }

    fn execute(&self, _ctx: &mut QueryContext, _send_buf: &mut SendBuf) -> Result<(), PlanError> {
        Err(PlanError::unset("no query engine attached"))
    }
}
