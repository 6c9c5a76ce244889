pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod reminders;
pub mod runtime_paths;
pub mod scheduler;
pub mod telegram;

pub use error::MagpieBotError;

pub type Result<T> = std::result::Result<T, MagpieBotError>;
