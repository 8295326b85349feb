//! Shared fixtures: a scripted transport, a recording reactor and a mock
//! planner, so FSM scenarios run without sockets.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use granite_fe::catalog::MemoryCatalog;
use granite_fe::mysql::packet::handshake_salt;
use granite_fe::mysql::protocol::{scramble_password, COM_QUERY};
use granite_fe::query::{OpType, PlanError, PlanNode, Planner, QueryContext};
use granite_fe::{Config, Connection, ConnectionPool, Interest, Reactor, StateMachine};

#[derive(Default)]
struct WireInner {
    inbound: Vec<u8>,
    written: Vec<u8>,
    peer_closed: bool,
    write_limit: Option<usize>,
}

/// Both ends of a fake socket: the test pushes client bytes and inspects
/// what the server wrote.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<WireInner>>,
}

impl MockTransport {
    pub fn push(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().inbound.extend_from_slice(bytes);
    }

    pub fn close_peer(&self) {
        self.inner.lock().unwrap().peer_closed = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().unwrap().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().unwrap().written)
    }

    #[allow(dead_code)]
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.inner.lock().unwrap().write_limit = limit;
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.inbound.is_empty() {
            if inner.peer_closed {
                return Ok(0);
            }
            return Err(io::Error::new(ErrorKind::WouldBlock, "no data"));
        }
        let n = inner.inbound.len().min(buf.len());
        buf[..n].copy_from_slice(&inner.inbound[..n]);
        inner.inbound.drain(..n);
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let n = match inner.write_limit {
            Some(limit) => limit.min(buf.len()),
            None => buf.len(),
        };
        if n == 0 {
            return Err(io::Error::new(ErrorKind::WouldBlock, "send buffer full"));
        }
        inner.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorEvent {
    Arm(i32, Interest),
    DeleteFd(i32),
    Remove(i32),
}

#[derive(Default)]
pub struct RecordingReactor {
    events: Mutex<Vec<ReactorEvent>>,
}

impl RecordingReactor {
    #[allow(dead_code)]
    pub fn events(&self) -> Vec<ReactorEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Reactor for RecordingReactor {
    fn arm(&self, fd: i32, interest: Interest) {
        self.events.lock().unwrap().push(ReactorEvent::Arm(fd, interest));
    }

    fn delete_fd_mapping(&self, fd: i32) {
        self.events.lock().unwrap().push(ReactorEvent::DeleteFd(fd));
    }

    fn remove(&self, fd: i32) {
        self.events.lock().unwrap().push(ReactorEvent::Remove(fd));
    }
}

/// Executor stand-in: records every statement it runs, replies OK, and
/// reports a scripted transaction id back through the runtime state.
#[derive(Default)]
pub struct MockPlanner {
    pub executed: Mutex<Vec<String>>,
    pub logical_error: Option<PlanError>,
    pub exec_error: Option<PlanError>,
    pub open_txn_id: Mutex<u64>,
}

impl MockPlanner {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn set_open_txn(&self, txn_id: u64) {
        *self.open_txn_id.lock().unwrap() = txn_id;
    }
}

impl Planner for MockPlanner {
    fn analyze_logical(&self, _ctx: &mut QueryContext) -> Result<(), PlanError> {
        match &self.logical_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn create_plan_tree(&self, ctx: &mut QueryContext) -> Result<(), PlanError> {
        ctx.root = Some(PlanNode::leaf(OpType::Select));
        Ok(())
    }

    fn analyze_physical(&self, _ctx: &mut QueryContext) -> Result<(), PlanError> {
        Ok(())
    }

    fn execute(
        &self,
        ctx: &mut QueryContext,
        send_buf: &mut granite_fe::mysql::SendBuf,
    ) -> Result<(), PlanError> {
        self.executed.lock().unwrap().push(ctx.sql.clone());
        if let Some(e) = &self.exec_error {
            return Err(e.clone());
        }
        ctx.runtime_state.txn_id = if ctx.sql.eq_ignore_ascii_case("rollback") {
            0
        } else {
            *self.open_txn_id.lock().unwrap()
        };
        send_buf.make_simple_ok_packet(1);
        Ok(())
    }
}

pub struct Harness {
    pub catalog: Arc<MemoryCatalog>,
    pub planner: Arc<MockPlanner>,
    pub pool: Arc<ConnectionPool>,
    pub machine: StateMachine,
    pub reactor: RecordingReactor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_planner(MockPlanner::default())
    }

    pub fn with_planner(planner: MockPlanner) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let planner = Arc::new(planner);
        let pool = Arc::new(ConnectionPool::new());
        let machine = StateMachine::new(
            catalog.clone(),
            planner.clone(),
            pool.clone(),
            &Config::default(),
        );
        Self {
            catalog,
            planner,
            pool,
            machine,
            reactor: RecordingReactor::default(),
        }
    }

    /// Opens a connection and drives the FSM through the server handshake.
    pub fn connect(&self, fd: i32) -> (MockTransport, Connection) {
        let transport = MockTransport::default();
        let mut conn = Connection::new(
            Box::new(transport.clone()),
            fd,
            "127.0.0.1".to_string(),
            40000 + fd as u16,
        );
        self.machine.run(&mut conn, &self.reactor, false);
        (transport, conn)
    }

    /// Full login flow; panics if the FSM does not reach the command loop.
    pub fn login(&self, fd: i32, username: &str, password: &str) -> (MockTransport, Connection) {
        let (transport, mut conn) = self.connect(fd);
        transport.take_written(); // discard the server handshake
        transport.push(&auth_packet(username, password, None));
        self.machine.run(&mut conn, &self.reactor, false);
        assert_eq!(
            conn.state,
            granite_fe::ConnState::SendAuthResult,
            "login did not reach the command loop"
        );
        (transport, conn)
    }

    pub fn run(&self, conn: &mut Connection) {
        self.machine.run(conn, &self.reactor, false);
    }
}

pub fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![
        (payload.len() & 0xff) as u8,
        ((payload.len() >> 8) & 0xff) as u8,
        ((payload.len() >> 16) & 0xff) as u8,
        seq,
    ];
    out.extend_from_slice(payload);
    out
}

/// Client handshake-response packet (sequence 1).
pub fn auth_packet(username: &str, password: &str, db: Option<&str>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0x0000_8200u32.to_le_bytes()); // capability flags
    payload.extend_from_slice(&1024000u32.to_le_bytes()); // max packet size
    payload.push(33); // charset: utf8
    payload.extend_from_slice(&[0u8; 23]);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    let scramble = scramble_password(password, &handshake_salt());
    payload.push(scramble.len() as u8);
    payload.extend_from_slice(&scramble);
    if let Some(db) = db {
        payload.extend_from_slice(db.as_bytes());
        payload.push(0);
    }
    frame(1, &payload)
}

/// COM_QUERY packet (sequence 0).
pub fn query_packet(sql: &str) -> Vec<u8> {
    let mut payload = vec![COM_QUERY];
    payload.extend_from_slice(sql.as_bytes());
    frame(0, &payload)
}

pub fn command_packet(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![cmd];
    body.extend_from_slice(payload);
    frame(0, &body)
}

/// Decodes the length-encoded string cells of one text-protocol row.
pub fn parse_row(body: &[u8]) -> Vec<String> {
    let mut cells = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let len = body[pos] as usize;
        assert!(len < 251, "long cells not expected in tests");
        pos += 1;
        assert!(pos + len <= body.len(), "truncated cell in row packet");
        cells.push(String::from_utf8_lossy(&body[pos..pos + len]).into_owned());
        pos += len;
    }
    cells
}

/// Splits a server byte stream back into (sequence, body) packets.
pub fn parse_packets(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 4 <= bytes.len() {
        let len = bytes[pos] as usize | (bytes[pos + 1] as usize) << 8 | (bytes[pos + 2] as usize) << 16;
        let seq = bytes[pos + 3];
        assert!(pos + 4 + len <= bytes.len(), "truncated packet in stream");
        out.push((seq, bytes[pos + 4..pos + 4 + len].to_vec()));
        pos += 4 + len;
    }
    assert_eq!(pos, bytes.len(), "trailing garbage after last packet");
    out
}
