use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum LockError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("calibration error: {0}")]
    Calibration(&'static str),
    #[error("invalid state: {0}")]
    State(String),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing shared secret (set one or enable skip_auth)")]
    MissingSecret,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
