pub mod builtin;
pub mod classify;
pub mod codec;
pub mod connection;
pub mod machine;
pub mod packet;
pub mod protocol;
pub mod send_buf;

pub use connection::{ConnState, Connection, Transport};
pub use machine::StateMachine;
pub use send_buf::{ResultField, SendBuf};
