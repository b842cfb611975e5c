use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("timeout")]
    Timeout,
    #[error("transport disconnected")]
    Disconnected,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial: {0}")]
    Serial(String),
    #[error("actuator: {0}")]
    Actuator(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
