// Library exports for granite-fe
// This allows tests and embedders to use the modules

pub mod catalog;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mysql;
pub mod query;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{FrontendError, Result};
pub use mysql::{ConnState, Connection, StateMachine};
pub use server::{ConnectionPool, Gateway, Interest, Reactor, SocketPool};
