use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;

use crate::catalog::UserInfo;
use crate::query::QueryContext;
use super::protocol::{CHARSET_GBK_NAME, CHARSET_GBK_NUM};
use super::send_buf::SendBuf;

/// Non-blocking byte stream under a connection.
///
/// `mio::net::TcpStream` satisfies this in production; tests drive the state
/// machine through scripted in-memory implementations.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Protocol state machine alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    ConnectedClient,
    SendHandshake,
    ReadAuth,
    SendAuthResult,
    ReadQueryResult,
    ErrorReuse,
    Error,
}

/// Per-socket state. Owned by the reactor while registered; handed back to
/// the socket pool on teardown.
pub struct Connection {
    pub fd: i32,
    pub ip: String,
    pub port: u16,
    pub thread_idx: usize,
    pub state: ConnState,
    pub in_pool: bool,
    pub is_authed: bool,
    pub is_counted: bool,

    pub transport: Box<dyn Transport>,
    /// Inbound bytes, appended to by the codec until the response is sent.
    pub self_buf: BytesMut,
    pub send_buf: SendBuf,
    pub send_buf_offset: usize,

    // Inbound decode cursors; header_read_len is 0 or 4 between packets.
    pub header_read_len: usize,
    pub header_offset: usize,
    pub packet_len: usize,
    pub packet_read_len: usize,
    pub packet_id: u8,

    pub username: String,
    pub current_db: String,
    pub user_info: Option<Arc<UserInfo>>,
    pub charset_name: &'static str,
    pub charset_num: u8,

    /// 0 means no open transaction.
    pub txn_id: u64,
    pub seq_id: i32,

    pub query_ctx: QueryContext,
    pub connect_time: Instant,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, fd: i32, ip: String, port: u16) -> Self {
        Self::with_buffers(transport, fd, ip, port, 8192, 8192)
    }

    pub fn with_buffers(
        transport: Box<dyn Transport>,
        fd: i32,
        ip: String,
        port: u16,
        read_capacity: usize,
        send_capacity: usize,
    ) -> Self {
        Self {
            fd,
            ip,
            port,
            thread_idx: 0,
            state: ConnState::ConnectedClient,
            in_pool: false,
            is_authed: false,
            is_counted: false,
            transport,
            self_buf: BytesMut::with_capacity(read_capacity),
            send_buf: SendBuf::with_capacity(send_capacity),
            send_buf_offset: 0,
            header_read_len: 0,
            header_offset: 0,
            packet_len: 0,
            packet_read_len: 0,
            packet_id: 0,
            username: String::new(),
            current_db: String::new(),
            user_info: None,
            charset_name: CHARSET_GBK_NAME,
            charset_num: CHARSET_GBK_NUM,
            txn_id: 0,
            seq_id: 0,
            query_ctx: QueryContext::default(),
            connect_time: Instant::now(),
        }
    }

    /// Clears both buffers and the decode cursors after a response has been
    /// fully flushed, readying the connection for the next command.
    pub fn reset_per_query(&mut self) {
        self.self_buf.clear();
        self.send_buf.clear();
        self.send_buf_offset = 0;
        self.reset_read_cursors();
    }

    /// Recoverable per-query error: drop whatever was in flight.
    pub fn reset_when_err(&mut self) {
        self.reset_per_query();
    }

    pub fn reset_read_cursors(&mut self) {
        self.header_read_len = 0;
        self.header_offset = 0;
        self.packet_len = 0;
        self.packet_read_len = 0;
    }

    /// Bookkeeping once an autocommit statement finishes: the transaction
    /// sequence restarts from zero.
    pub fn on_commit_rollback(&mut self) {
        self.seq_id = 0;
    }
}
