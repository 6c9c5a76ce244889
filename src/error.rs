use thiserror::Error;

#[derive(Debug, Error)]
pub enum MagpieBotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid reminder format: {0}")]
    InvalidFormat(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("notification error: {0}")]
    Notify(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub use crate::Result;
