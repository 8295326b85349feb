//! Per-command query state and the planner/executor collaborator contract.

mod planner;

pub use planner::{NullPlanner, PlanError, Planner};

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::catalog::UserInfo;
use crate::mysql::classify::StmtType;
use crate::mysql::protocol::ER_ERROR_FIRST;

/// What the root of a plan tree produces; decides which row counter the
/// query summary reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Select,
    Write,
}

/// Opaque handle to the execution-node tree built by the planner.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub op_type: OpType,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn leaf(op_type: OpType) -> Self {
        Self {
            op_type,
            children: Vec::new(),
        }
    }
}

/// Transaction bookkeeping carried through planning and execution. Mutations
/// are applied by the state machine, not by the planner.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub txn_id: u64,
    pub seq_id: i32,
    pub optimize_1pc: bool,
}

/// Timings and counters for one command, logged after the response is
/// flushed.
#[derive(Debug, Clone)]
pub struct QueryStat {
    pub start_stamp: Option<Instant>,
    pub send_stamp: Option<Instant>,
    pub end_stamp: Option<Instant>,
    pub query_read_time: u64,
    pub query_plan_time: u64,
    pub query_exec_time: u64,
    pub result_send_time: u64,
    pub total_time: u64,
    pub sql_length: usize,
    pub send_buf_size: usize,
    pub num_returned_rows: u64,
    pub num_affected_rows: u64,
    pub error_code: u16,
    pub error_msg: String,
    /// Database family the statement touched; used for request accounting.
    pub family: String,
    pub log_id: Uuid,
}

impl Default for QueryStat {
    fn default() -> Self {
        Self {
            start_stamp: None,
            send_stamp: None,
            end_stamp: None,
            query_read_time: 0,
            query_plan_time: 0,
            query_exec_time: 0,
            result_send_time: 0,
            total_time: 0,
            sql_length: 0,
            send_buf_size: 0,
            num_returned_rows: 0,
            num_affected_rows: 0,
            error_code: ER_ERROR_FIRST,
            error_msg: String::new(),
            family: String::new(),
            log_id: Uuid::new_v4(),
        }
    }
}

/// Per-command state; replaced at the start of every command cycle.
#[derive(Default)]
pub struct QueryContext {
    pub sql: String,
    pub mysql_cmd: u8,
    pub stmt_type: StmtType,
    pub cur_db: String,
    pub comments: Vec<String>,
    pub debug_region_id: Option<i64>,
    pub enable_2pc: Option<i64>,
    pub user_info: Option<Arc<UserInfo>>,
    pub stat_info: QueryStat,
    pub runtime_state: RuntimeState,
    /// DDL handled entirely during logical planning replies OK early.
    pub succ_after_logical_plan: bool,
    pub succ_after_physical_plan: bool,
    pub root: Option<PlanNode>,
}

impl QueryContext {
    pub fn new(user_info: Option<Arc<UserInfo>>, cur_db: String) -> Self {
        Self {
            user_info,
            cur_db,
            ..Default::default()
        }
    }

    /// Records a planner failure, falling back to `default_code`/`default_msg`
    /// when the planner did not annotate a specific error.
    pub fn record_plan_error(&mut self, err: PlanError, default_code: u16, default_msg: &str) {
        if err.code == ER_ERROR_FIRST {
            self.stat_info.error_code = default_code;
            self.stat_info.error_msg = default_msg.to_string();
        } else {
            self.stat_info.error_code = err.code;
            self.stat_info.error_msg = err.msg;
        }
    }
}
