use thiserror::Error;

/// Errors produced by the gateway layer.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not connected: no active session for '{0}'")]
    NotConnected(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("timeout establishing backend connection")]
    ConnectTimeout,

    #[error("timeout waiting for backend reply")]
    CommandTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session limit reached ({0})")]
    AtCapacity(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
