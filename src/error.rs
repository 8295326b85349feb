use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("peer closed connection")]
    PeerClosed,

    #[error("MySQL protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FrontendError>;
