//! The per-connection protocol state machine.
//!
//! `run` is the single entry point invoked by the reactor on each readiness
//! event. State advancement that the original expressed as tail-calls is a
//! bounded loop here: handlers return `Continue` when progress is possible
//! without blocking and `Yield` once the reactor has been re-armed.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::catalog::Schema;
use crate::config::Config;
use crate::error::FrontendError;
use crate::metrics;
use crate::query::{OpType, Planner, QueryContext};
use crate::server::{Interest, Reactor, SocketPool};

use super::classify::{self, istarts_with, StmtType};
use super::codec::{PayloadReader, ReadOutcome, WriteOutcome};
use super::connection::{ConnState, Connection};
use super::packet::HandshakePacket;
use super::protocol::*;

const SQL_VERSION_COMMENT: &str = "select @@version_comment";
const SQL_SESSION_AUTO_INCREMENT: &str = "select @@session.auto_increment_increment";
const SQL_SESSION_AUTOCOMMIT: &str = "select @@session.autocommit";
const SQL_SESSION_TX_ISOLATION: &str = "select @@session.tx_isolation";
const SQL_SELECT_1: &str = "select 1";
const SQL_SELECT_DATABASE: &str = "select database()";
const SQL_SHOW_DATABASES: &str = "show databases";
const SQL_SHOW_TABLES: &str = "show tables";
const SQL_SHOW_CREATE_TABLE: &str = "show create table";
const SQL_SHOW_FULL_COLUMNS: &str = "show full columns";
const SQL_SHOW_TABLE_STATUS: &str = "show table status";
const SQL_SHOW_COLLATION: &str = "show collation";
const SQL_SHOW_WARNINGS: &str = "show warnings";
const SQL_SHOW_REGION: &str = "show region_";
const SQL_SHOW_VARIABLES: &str = "show variables";
const SQL_USE: &str = "use";

enum Flow {
    Continue,
    Yield,
}

enum QueryRead {
    Ready,
    Wait,
    /// Client asked for a clean shutdown (COM_QUIT).
    CommandShutdown,
    /// The reply (OK or ERR) is already packed; skip dispatch.
    CmdUnsupported,
}

pub struct StateMachine {
    schema: Arc<dyn Schema>,
    planner: Arc<dyn Planner>,
    pool: Arc<dyn SocketPool>,
    default_max_connections: u32,
    default_query_quota: u32,
}

impl StateMachine {
    pub fn new(
        schema: Arc<dyn Schema>,
        planner: Arc<dyn Planner>,
        pool: Arc<dyn SocketPool>,
        config: &Config,
    ) -> Self {
        Self {
            schema,
            planner,
            pool,
            default_max_connections: config.max_connections_per_user,
            default_query_quota: config.query_quota_per_user,
        }
    }

    pub(crate) fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    /// One FSM step chain for `conn`, driven until the next suspension point
    /// or teardown. Safe to call again after either.
    pub fn run(&self, conn: &mut Connection, reactor: &dyn Reactor, shutdown: bool) {
        loop {
            if conn.in_pool {
                return;
            }
            if shutdown && conn.state != ConnState::Error {
                warn!(fd = conn.fd, "shutdown requested, closing connection");
                conn.state = ConnState::Error;
            }
            let flow = match conn.state {
                ConnState::ConnectedClient => self.on_connected_client(conn, reactor),
                ConnState::SendHandshake => self.on_send_handshake(conn, reactor),
                ConnState::ReadAuth => self.on_read_auth(conn, reactor),
                ConnState::SendAuthResult => self.on_send_auth_result(conn, reactor),
                ConnState::ReadQueryResult => self.on_read_query_result(conn, reactor),
                ConnState::ErrorReuse => self.on_error_reuse(conn, reactor),
                ConnState::Error => {
                    self.client_free(conn, reactor);
                    return;
                }
            };
            if let Flow::Yield = flow {
                return;
            }
        }
    }

    fn on_connected_client(&self, conn: &mut Connection, reactor: &dyn Reactor) -> Flow {
        if conn.send_buf.is_empty() {
            let handshake = HandshakePacket::new(conn.fd as u32);
            conn.send_buf.make_handshake_packet(&handshake);
        }
        match conn.flush_send_buf() {
            Ok(WriteOutcome::Flushed) => {
                debug!(fd = conn.fd, "handshake sent");
                conn.state = ConnState::SendHandshake;
                Flow::Continue
            }
            Ok(WriteOutcome::Wait) => {
                reactor.arm(conn.fd, Interest::Write);
                Flow::Yield
            }
            Err(e) => {
                error!(fd = conn.fd, error = %e, "failed to send handshake");
                conn.state = ConnState::Error;
                Flow::Continue
            }
        }
    }

    fn on_send_handshake(&self, conn: &mut Connection, reactor: &dyn Reactor) -> Flow {
        match self.auth_read(conn) {
            Ok(ReadOutcome::Wait) => {
                trace!(fd = conn.fd, "auth packet read partly, go on reading");
                reactor.arm(conn.fd, Interest::Read);
                Flow::Yield
            }
            Ok(ReadOutcome::Ready) => {
                let user = match conn.user_info.clone() {
                    Some(user) => user,
                    None => {
                        error!(fd = conn.fd, "auth succeeded without user record");
                        conn.state = ConnState::Error;
                        return Flow::Continue;
                    }
                };
                if !user.connection_inc() {
                    let msg = format!(
                        "Username {} has reach the max connection limit({})",
                        conn.username,
                        user.max_connection()
                    );
                    warn!(fd = conn.fd, username = %conn.username, "{}", msg);
                    let seq = conn.packet_id.wrapping_add(1);
                    conn.send_buf.fill_auth_failed_packet(seq, &msg);
                    conn.state = ConnState::Error;
                    return Flow::Continue;
                }
                conn.is_counted = true;
                debug!(fd = conn.fd, username = %conn.username, "auth read success");
                conn.state = ConnState::ReadAuth;
                Flow::Continue
            }
            Err(FrontendError::AuthFailed(reason)) => {
                warn!(fd = conn.fd, username = %conn.username, reason = %reason, "auth failed");
                let msg = format!(
                    "Access denied for user '{}'@'{}' (using password: YES)",
                    conn.username, conn.ip
                );
                let seq = conn.packet_id.wrapping_add(1);
                conn.send_buf.fill_auth_failed_packet(seq, &msg);
                conn.state = ConnState::Error;
                Flow::Continue
            }
            Err(e) => {
                warn!(fd = conn.fd, error = %e, "failed to read auth packet");
                conn.state = ConnState::Error;
                Flow::Continue
            }
        }
    }

    fn on_read_auth(&self, conn: &mut Connection, reactor: &dyn Reactor) -> Flow {
        if conn.send_buf.is_empty() {
            let seq = conn.packet_id.wrapping_add(1);
            conn.send_buf.make_simple_ok_packet(seq);
        }
        match conn.flush_send_buf() {
            Ok(WriteOutcome::Flushed) => {
                conn.is_authed = true;
                conn.state = ConnState::SendAuthResult;
                Flow::Continue
            }
            Ok(WriteOutcome::Wait) => {
                debug!(fd = conn.fd, "auth result sent partly, go on sending");
                reactor.arm(conn.fd, Interest::Write);
                Flow::Yield
            }
            Err(e) => {
                error!(fd = conn.fd, error = %e, "failed to send auth result");
                conn.state = ConnState::Error;
                Flow::Continue
            }
        }
    }

    fn on_send_auth_result(&self, conn: &mut Connection, reactor: &dyn Reactor) -> Flow {
        let read_started = Instant::now();
        let outcome = self.query_read(conn);
        conn.query_ctx.stat_info.query_read_time = micros_since(read_started);

        match outcome {
            Ok(QueryRead::Ready) => {}
            Ok(QueryRead::Wait) => {
                reactor.arm(conn.fd, Interest::Read);
                return Flow::Yield;
            }
            Ok(QueryRead::CommandShutdown) => {
                trace!(fd = conn.fd, "connection closed by client");
                conn.state = ConnState::Error;
                return Flow::Continue;
            }
            Ok(QueryRead::CmdUnsupported) => {
                warn!(fd = conn.fd, "unsupported query type");
                conn.state = ConnState::ReadQueryResult;
                return Flow::Continue;
            }
            Err(FrontendError::PeerClosed) => {
                debug!(fd = conn.fd, "connection closed by peer");
                conn.state = ConnState::Error;
                return Flow::Continue;
            }
            Err(e) => {
                error!(fd = conn.fd, error = %e, "failed to read query");
                self.make_err(conn, ER_ERROR_ON_READ, &format!("read query from client error: {}", e));
                conn.state = ConnState::Error;
                return Flow::Continue;
            }
        }

        let ok = self.query_process(conn);
        if !ok || conn.state == ConnState::Error || conn.state == ConnState::ErrorReuse {
            warn!(fd = conn.fd, sql = %conn.query_ctx.sql, "handle query failed");
            if !conn.send_buf.error_packed() {
                self.make_err(conn, ER_ERROR_COMMON, "handle query failed");
            }
            if conn.state != ConnState::Error {
                conn.state = ConnState::ErrorReuse;
            }
            self.log_query(conn);
            Flow::Continue
        } else if conn.state == ConnState::ReadQueryResult {
            conn.query_ctx.stat_info.send_stamp = Some(Instant::now());
            Flow::Continue
        } else if conn.state == ConnState::SendAuthResult {
            reactor.arm(conn.fd, Interest::Read);
            Flow::Yield
        } else {
            error!(fd = conn.fd, state = ?conn.state, "dispatch left unexpected state");
            self.make_err(conn, ER_ERROR_COMMON, "unexpected dispatch state");
            conn.state = ConnState::Error;
            self.log_query(conn);
            Flow::Continue
        }
    }

    fn on_read_query_result(&self, conn: &mut Connection, reactor: &dyn Reactor) -> Flow {
        match conn.flush_send_buf() {
            Ok(WriteOutcome::Flushed) => {
                let now = Instant::now();
                let stat = &mut conn.query_ctx.stat_info;
                stat.end_stamp = Some(now);
                if let Some(send_stamp) = stat.send_stamp {
                    stat.result_send_time = micros_since(send_stamp);
                }
                if let Some(start_stamp) = stat.start_stamp {
                    stat.total_time = micros_since(start_stamp);
                }
                self.log_query(conn);
                conn.reset_per_query();
                conn.state = ConnState::SendAuthResult;
                Flow::Continue
            }
            Ok(WriteOutcome::Wait) => {
                debug!(fd = conn.fd, "result sent partly, wait for fd ready");
                reactor.arm(conn.fd, Interest::Write);
                Flow::Yield
            }
            Err(e) => {
                error!(fd = conn.fd, error = %e, "failed to send result");
                conn.state = ConnState::Error;
                Flow::Continue
            }
        }
    }

    /// Recoverable per-query error: flush what we can, reset, keep the
    /// connection for further queries.
    fn on_error_reuse(&self, conn: &mut Connection, _reactor: &dyn Reactor) -> Flow {
        match conn.flush_send_buf() {
            Ok(_) => {
                conn.reset_when_err();
                conn.state = ConnState::SendAuthResult;
                Flow::Continue
            }
            Err(e) => {
                warn!(fd = conn.fd, error = %e, "failed to flush error reply");
                conn.state = ConnState::Error;
                Flow::Continue
            }
        }
    }

    /// Teardown. Idempotent: a connection already returned to the pool is
    /// left alone.
    fn client_free(&self, conn: &mut Connection, reactor: &dyn Reactor) {
        let _ = conn.flush_send_buf();
        if conn.in_pool || conn.fd < 0 {
            warn!(fd = conn.fd, "connection is already freed");
            return;
        }
        if conn.txn_id != 0 {
            debug!(fd = conn.fd, txn_id = conn.txn_id, "rolling back open transaction");
            conn.query_ctx = QueryContext::new(conn.user_info.clone(), conn.current_db.clone());
            conn.query_ctx.mysql_cmd = COM_QUERY;
            conn.query_ctx.sql = "rollback".to_string();
            let _ = self.handle_query_common(conn);
            conn.txn_id = 0;
        }
        if conn.is_counted {
            if let Some(user) = conn.user_info.as_ref() {
                user.connection_dec();
            }
            conn.is_counted = false;
        }
        conn.query_ctx = QueryContext::default();
        reactor.delete_fd_mapping(conn.fd);
        reactor.remove(conn.fd);
        info!(fd = conn.fd, username = %conn.username, "connection freed");
        self.pool.free(conn);
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    fn auth_read(&self, conn: &mut Connection) -> crate::error::Result<ReadOutcome> {
        match conn.read_packet()? {
            ReadOutcome::Wait => return Ok(ReadOutcome::Wait),
            ReadOutcome::Ready => {}
        }
        let payload = conn.current_payload().to_vec();
        let mut reader = PayloadReader::new(&payload);

        // capability flags (4) + max packet size (4)
        reader.skip(8)?;
        let charset_num = reader.get_u8()?;
        match charset_num {
            CHARSET_GBK_NUM => {
                conn.charset_name = CHARSET_GBK_NAME;
                conn.charset_num = CHARSET_GBK_NUM;
            }
            CHARSET_UTF8_NUM => {
                conn.charset_name = CHARSET_UTF8_NAME;
                conn.charset_num = CHARSET_UTF8_NUM;
            }
            other => {
                trace!(fd = conn.fd, charset = other, "unknown charset num, using gbk");
                conn.charset_name = CHARSET_GBK_NAME;
                conn.charset_num = CHARSET_GBK_NUM;
            }
        }
        reader.skip(23)?;

        let username = reader
            .get_null_terminated_string()
            .map_err(|_| FrontendError::AuthFailed("username is missing".to_string()))?;
        conn.username = username.clone();

        let user_info = match self.schema.get_user_info(&username) {
            Some(user) => user,
            None => {
                warn!(fd = conn.fd, username = %username, "user does not exist");
                return Err(FrontendError::AuthFailed(format!(
                    "user {} does not exist",
                    username
                )));
            }
        };
        user_info.apply_default_limits(self.default_max_connections, self.default_query_quota);

        let auth_len = reader.get_u8()? as usize;
        if auth_len != 20 {
            warn!(
                fd = conn.fd,
                auth_len, "auth response length must be exactly 20"
            );
            return Err(FrontendError::AuthFailed(format!(
                "auth response length {} should be 20",
                auth_len
            )));
        }
        let client_scramble = reader.get_fixed_bytes(20)?;
        if client_scramble != &user_info.scramble_password[..] {
            return Err(FrontendError::AuthFailed("wrong password".to_string()));
        }

        if reader.remaining() > 0 {
            conn.current_db = reader
                .get_null_terminated_string()
                .map_err(|_| FrontendError::AuthFailed("malformed database name".to_string()))?;
        } else {
            conn.current_db.clear();
        }
        conn.username = user_info.username.clone();
        conn.user_info = Some(user_info);

        // Auth payload fully consumed; the command cycle starts clean.
        conn.self_buf.clear();
        conn.reset_read_cursors();
        Ok(ReadOutcome::Ready)
    }

    // ------------------------------------------------------------------
    // Command read & dispatch
    // ------------------------------------------------------------------

    fn query_read(&self, conn: &mut Connection) -> crate::error::Result<QueryRead> {
        conn.query_ctx = QueryContext::new(conn.user_info.clone(), conn.current_db.clone());
        conn.query_ctx.stat_info.start_stamp = Some(Instant::now());

        match conn.read_packet()? {
            ReadOutcome::Wait => {
                trace!(fd = conn.fd, "query packet read partly");
                return Ok(QueryRead::Wait);
            }
            ReadOutcome::Ready => {}
        }
        let payload = conn.current_payload().to_vec();
        if payload.is_empty() {
            return Err(FrontendError::Protocol("empty command packet".to_string()));
        }
        let mut reader = PayloadReader::new(&payload);
        let command = reader.get_u8()?;
        conn.query_ctx.mysql_cmd = command;

        if command == COM_QUIT {
            return Ok(QueryRead::CommandShutdown);
        }
        if command == COM_PING {
            conn.query_ctx.stmt_type = classify::get_query_type(&mut conn.query_ctx);
            return Ok(QueryRead::Ready);
        }
        if command == COM_INIT_DB || command == COM_QUERY {
            if reader.remaining() == 0 {
                warn!(fd = conn.fd, cmd = command, "statement payload is empty");
                self.make_err(conn, ER_NOT_ALLOWED_COMMAND, "command not supported");
                return Ok(QueryRead::CmdUnsupported);
            }
            conn.query_ctx.sql = reader.rest_as_sql();
        }

        conn.query_ctx.stmt_type = classify::get_query_type(&mut conn.query_ctx);
        classify::get_json_attributes(&mut conn.query_ctx);

        if command == COM_QUERY && conn.query_ctx.stmt_type == StmtType::Unknown {
            warn!(fd = conn.fd, sql = %conn.query_ctx.sql, "query type is unknown");
            self.make_simple_ok(conn);
            return Ok(QueryRead::CmdUnsupported);
        }
        Ok(QueryRead::Ready)
    }

    fn query_process(&self, conn: &mut Connection) -> bool {
        let command = conn.query_ctx.mysql_cmd;
        let stmt_type = conn.query_ctx.stmt_type;

        if command == COM_PING {
            self.make_simple_ok(conn);
            conn.state = ConnState::ReadQueryResult;
            return true;
        }
        if command != COM_INIT_DB && command != COM_QUERY {
            warn!(fd = conn.fd, cmd = command, "unsupported command");
            self.make_err(conn, ER_NOT_ALLOWED_COMMAND, "command not supported");
            conn.state = ConnState::ErrorReuse;
            return true;
        }
        if conn.query_ctx.sql.is_empty() {
            error!(fd = conn.fd, cmd = command, "SQL size is 0");
            return false;
        }

        if command == COM_INIT_DB {
            if matches!(stmt_type, StmtType::Use | StmtType::UseInQuery) {
                self.handle_query_use_database(conn)
            } else {
                self.make_simple_ok(conn);
                conn.state = ConnState::ReadQueryResult;
                true
            }
        } else {
            self.dispatch_query(conn, stmt_type)
        }
    }

    fn dispatch_query(&self, conn: &mut Connection, stmt_type: StmtType) -> bool {
        if matches!(
            stmt_type,
            StmtType::SetNames
                | StmtType::SetCharset
                | StmtType::SetCharacterSetClient
                | StmtType::SetCharacterSetConnection
                | StmtType::SetCharacterSetResults
                | StmtType::SetCharacterSet
        ) {
            self.make_simple_ok(conn);
            conn.state = ConnState::ReadQueryResult;
            return true;
        }

        let sql = conn.query_ctx.sql.clone();
        if sql.eq_ignore_ascii_case(SQL_VERSION_COMMENT) {
            return self.handle_query_version_comment(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SESSION_AUTO_INCREMENT) {
            return self.handle_query_session_auto_increment(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SESSION_AUTOCOMMIT) {
            return self.handle_query_session_autocommit(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SESSION_TX_ISOLATION) {
            return self.handle_query_session_tx_isolation(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SELECT_1) {
            return self.handle_query_select_1(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SELECT_DATABASE) {
            return self.handle_query_select_database(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SHOW_DATABASES) {
            return self.handle_query_show_databases(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SHOW_TABLES) {
            return self.handle_query_show_tables(conn);
        }
        if istarts_with(&sql, SQL_SHOW_CREATE_TABLE) {
            return self.handle_query_show_create_table(conn);
        }
        if istarts_with(&sql, SQL_SHOW_FULL_COLUMNS) {
            return self.handle_query_show_full_columns(conn);
        }
        if istarts_with(&sql, SQL_SHOW_TABLE_STATUS) {
            return self.handle_query_show_table_status(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SHOW_COLLATION) {
            return self.handle_query_show_collation(conn);
        }
        if sql.eq_ignore_ascii_case(SQL_SHOW_WARNINGS) {
            return self.handle_query_show_warnings(conn);
        }
        if istarts_with(&sql, SQL_SHOW_REGION) {
            return self.handle_query_show_region(conn);
        }
        if stmt_type == StmtType::Show && istarts_with(&sql, SQL_SHOW_VARIABLES) {
            return self.handle_query_show_variables(conn);
        }
        if stmt_type == StmtType::UseInQuery && istarts_with(&sql, SQL_USE) {
            return self.handle_query_use_database(conn);
        }
        if stmt_type == StmtType::Desc {
            return self.handle_query_desc_table(conn);
        }
        if stmt_type == StmtType::Show {
            self.make_simple_ok(conn);
            conn.state = ConnState::ReadQueryResult;
            return true;
        }

        // Everything else goes through the planner; rate-limit it first.
        if let Some(user) = conn.query_ctx.user_info.clone() {
            if user.is_exceed_quota() {
                warn!(
                    fd = conn.fd,
                    username = %user.username,
                    query_count = user.query_count(),
                    query_quota = user.query_quota(),
                    "query exceed quota"
                );
                self.make_err(conn, ER_QUERY_EXCEED_QUOTA, "query exceed quota(qps)");
                conn.state = ConnState::ReadQueryResult;
                return true;
            }
        }
        let ok = self.handle_query_common(conn);
        conn.state = ConnState::ReadQueryResult;
        ok
    }

    /// The planner path: logical analyze, plan-tree build, physical analyze,
    /// execute. Transaction bookkeeping is applied here, not by the planner.
    pub(crate) fn handle_query_common(&self, conn: &mut Connection) -> bool {
        conn.query_ctx.stat_info.sql_length = conn.query_ctx.sql.len();
        let err_seq = conn.packet_id.wrapping_add(1);
        let plan_started = Instant::now();

        if let Err(e) = self.planner.analyze_logical(&mut conn.query_ctx) {
            error!(fd = conn.fd, sql = %conn.query_ctx.sql, "logical analyze failed");
            conn.query_ctx
                .record_plan_error(e, ER_GEN_PLAN_FAILED, "get logical plan failed");
            let code = conn.query_ctx.stat_info.error_code;
            let msg = conn.query_ctx.stat_info.error_msg.clone();
            conn.send_buf.make_err_packet(err_seq, code, &msg);
            return false;
        }
        // DDL handled entirely during logical planning
        if conn.query_ctx.succ_after_logical_plan {
            self.make_simple_ok(conn);
            return true;
        }

        if let Err(e) = self.planner.create_plan_tree(&mut conn.query_ctx) {
            error!(
                fd = conn.fd,
                sql = %conn.query_ctx.sql,
                error = %e.msg,
                "failed to build execution node tree"
            );
            return false;
        }
        if conn.query_ctx.root.is_some() {
            conn.query_ctx.runtime_state.txn_id = conn.txn_id;
            conn.seq_id += 1;
            conn.query_ctx.runtime_state.seq_id = conn.seq_id;
        }

        let ok = self.analyze_physical_and_execute(conn, err_seq, plan_started);
        // Autocommit statements restart the txn sequence on every path out
        // of physical planning and execution, failures included.
        if conn.txn_id == 0 {
            conn.on_commit_rollback();
        }
        ok
    }

    fn analyze_physical_and_execute(
        &self,
        conn: &mut Connection,
        err_seq: u8,
        plan_started: Instant,
    ) -> bool {
        if let Err(e) = self.planner.analyze_physical(&mut conn.query_ctx) {
            error!(fd = conn.fd, sql = %conn.query_ctx.sql, "physical analyze failed");
            conn.query_ctx
                .record_plan_error(e, ER_GEN_PLAN_FAILED, "get physical plan failed");
            let code = conn.query_ctx.stat_info.error_code;
            let msg = conn.query_ctx.stat_info.error_msg.clone();
            conn.send_buf.make_err_packet(err_seq, code, &msg);
            return false;
        }
        conn.query_ctx.stat_info.query_plan_time = micros_since(plan_started);
        if conn.query_ctx.succ_after_physical_plan {
            self.make_simple_ok(conn);
            return true;
        }

        let exec_started = Instant::now();
        if let Err(e) = self.planner.execute(&mut conn.query_ctx, &mut conn.send_buf) {
            error!(fd = conn.fd, sql = %conn.query_ctx.sql, "plan execution failed");
            conn.query_ctx
                .record_plan_error(e, ER_EXEC_PLAN_FAILED, "exec physical plan failed");
            let code = conn.query_ctx.stat_info.error_code;
            let msg = conn.query_ctx.stat_info.error_msg.clone();
            conn.send_buf.make_err_packet(err_seq, code, &msg);
            return false;
        }
        // Apply the transaction state the executor reported.
        conn.txn_id = conn.query_ctx.runtime_state.txn_id;
        conn.query_ctx.stat_info.query_exec_time = micros_since(exec_started);
        conn.query_ctx.stat_info.send_buf_size = conn.send_buf.len();
        true
    }

    // ------------------------------------------------------------------
    // Accounting
    // ------------------------------------------------------------------

    fn log_query(&self, conn: &mut Connection) {
        let ctx = &conn.query_ctx;
        let stat = &ctx.stat_info;
        let rows = match &ctx.root {
            Some(root) if root.op_type == OpType::Select => stat.num_returned_rows,
            Some(_) => stat.num_affected_rows,
            None => 0,
        };

        if ctx.mysql_cmd == COM_QUERY {
            let namespace = ctx
                .user_info
                .as_ref()
                .map(|u| u.namespace.clone())
                .unwrap_or_default();
            let mut database = format!("{}.{}", namespace, stat.family);
            if stat.family.is_empty() {
                database.push_str("adp");
            }
            metrics::incr_database_request(&database);

            info!(
                family = %stat.family,
                ip = %conn.ip,
                port = conn.port,
                fd = conn.fd,
                cost = stat.total_time,
                read_time = stat.query_read_time,
                plan_time = stat.query_plan_time,
                exec_time = stat.query_exec_time,
                send_time = stat.result_send_time,
                rows,
                bufsize = stat.send_buf_size,
                log_id = %stat.log_id,
                user = %conn.username,
                errno = stat.error_code,
                txn_id = ctx.runtime_state.txn_id,
                seq_id = ctx.runtime_state.seq_id,
                optimize_1pc = ctx.runtime_state.optimize_1pc,
                sqllen = stat.sql_length,
                sql = %ctx.sql,
                "common_query"
            );
        } else {
            debug!(
                ip = %conn.ip,
                port = conn.port,
                fd = conn.fd,
                cost = stat.total_time,
                cmd = ctx.mysql_cmd,
                stmt_type = ?ctx.stmt_type,
                user = %conn.username,
                "stmt_query"
            );
        }
    }
}

fn micros_since(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}
