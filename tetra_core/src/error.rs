use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TetraError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("invalid state: {0}")]
    State(String),
}

/// Failures decoding or encoding one protocol line.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed json: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected a json object, got {0}")]
    NotAnObject(&'static str),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
