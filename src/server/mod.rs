//! Reactor and socket-pool contracts, plus the mio-backed event loop that
//! drives the protocol state machine.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::mysql::connection::Connection;
use crate::mysql::machine::StateMachine;

/// Readiness interest the state machine asks for at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    None,
}

/// Narrow reactor interface consumed by the state machine.
pub trait Reactor {
    fn arm(&self, fd: i32, interest: Interest);
    fn delete_fd_mapping(&self, fd: i32);
    fn remove(&self, fd: i32);
}

/// Receives connections on teardown.
pub trait SocketPool: Send + Sync {
    fn free(&self, conn: &mut Connection);
}

/// Marks torn-down connections as pooled; the owning event loop drops the
/// socket once a connection carries the flag.
pub struct ConnectionPool {
    freed: AtomicU64,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            freed: AtomicU64::new(0),
        }
    }

    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketPool for ConnectionPool {
    fn free(&self, conn: &mut Connection) {
        conn.in_pool = true;
        self.freed.fetch_add(1, Ordering::Relaxed);
    }
}

struct MioReactor {
    registry: mio::Registry,
}

impl Reactor for MioReactor {
    fn arm(&self, fd: i32, interest: Interest) {
        let interests = match interest {
            Interest::Read => mio::Interest::READABLE,
            Interest::Write => mio::Interest::WRITABLE,
            Interest::None => return,
        };
        if let Err(e) = self
            .registry
            .reregister(&mut SourceFd(&fd), Token(fd as usize), interests)
        {
            warn!(fd, error = %e, "failed to reregister fd");
        }
    }

    fn delete_fd_mapping(&self, fd: i32) {
        // The event loop drops pooled connections from its fd map.
        debug!(fd, "fd mapping scheduled for removal");
    }

    fn remove(&self, fd: i32) {
        let _ = self.registry.deregister(&mut SourceFd(&fd));
    }
}

const LISTENER: Token = Token(0);

/// Accepts MySQL clients and runs their state machines off one mio poll
/// loop. Worker sizing for a blocking planner is the embedder's concern.
pub struct Gateway {
    machine: Arc<StateMachine>,
    port: u16,
    read_buffer_size: usize,
    send_buffer_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(machine: Arc<StateMachine>, config: &Config) -> Self {
        Self {
            machine,
            port: config.mysql_port,
            read_buffer_size: config.read_buffer_size,
            send_buffer_size: config.send_buffer_size,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between poll rounds; setting it drains every connection
    /// through the FSM's shutdown path.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn serve(&self) -> Result<()> {
        let mut poll = Poll::new()?;
        let addr = format!("0.0.0.0:{}", self.port)
            .parse()
            .map_err(|e| crate::error::FrontendError::Config(format!("bad listen address: {}", e)))?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, mio::Interest::READABLE)?;
        let reactor = MioReactor {
            registry: poll.registry().try_clone()?,
        };

        let mut events = Events::with_capacity(256);
        let mut connections: HashMap<usize, Connection> = HashMap::new();
        info!(port = self.port, "mysql gateway listening");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                for (_, conn) in connections.iter_mut() {
                    self.machine.run(conn, &reactor, true);
                }
                connections.clear();
                info!("mysql gateway shut down");
                return Ok(());
            }

            if let Err(e) = poll.poll(&mut events, Some(Duration::from_millis(500))) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => loop {
                        match listener.accept() {
                            Ok((stream, peer)) => {
                                let fd = stream.as_raw_fd();
                                if let Err(e) = poll.registry().register(
                                    &mut SourceFd(&fd),
                                    Token(fd as usize),
                                    mio::Interest::READABLE,
                                ) {
                                    error!(fd, error = %e, "failed to register connection");
                                    continue;
                                }
                                let mut conn = Connection::with_buffers(
                                    Box::new(stream),
                                    fd,
                                    peer.ip().to_string(),
                                    peer.port(),
                                    self.read_buffer_size,
                                    self.send_buffer_size,
                                );
                                info!(fd, peer = %peer, "accepted connection");
                                // Send the handshake without waiting for a
                                // readiness event.
                                self.machine.run(&mut conn, &reactor, false);
                                if !conn.in_pool {
                                    connections.insert(fd as usize, conn);
                                }
                            }
                            Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                            Err(e) => {
                                error!(error = %e, "failed to accept connection");
                                break;
                            }
                        }
                    },
                    Token(fd) => {
                        if let Some(conn) = connections.get_mut(&fd) {
                            self.machine
                                .run(conn, &reactor, self.shutdown.load(Ordering::Relaxed));
                            if conn.in_pool {
                                connections.remove(&fd);
                            }
                        }
                    }
                }
            }
        }
    }
}
