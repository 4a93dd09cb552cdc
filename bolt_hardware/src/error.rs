use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
    #[error("servo is not powered")]
    Detached,
    #[error("corrupt nonce slot: {0} bytes")]
    CorruptSlot(usize),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
