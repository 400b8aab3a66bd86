use thiserror::Error;

use crate::models::{DisplayId, DisplayMode};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{display} is busy in mode {mode}")]
    Busy { display: DisplayId, mode: DisplayMode },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Text suitable for a transient banner message
    #[must_use]
    pub fn banner_text(&self) -> String {
        match self {
            Self::Busy { .. } => "Please wait for the current operation to finish".to_string(),
            Self::Conflict(msg) | Self::InvalidInput(msg) => msg.clone(),
            Self::NotFound(what) => format!("{what} not found"),
            other => {
                tracing::error!("Internal error: {other}");
                "Operation failed".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_display() {
        let err = Error::Busy {
            display: DisplayId(1),
            mode: DisplayMode::ChangingPage,
        };
        assert_eq!(err.to_string(), "display-1 is busy in mode ChangingPage");
        assert_eq!(
            err.banner_text(),
            "Please wait for the current operation to finish"
        );
    }

    #[test]
    fn test_conflict_banner_passes_message_through() {
        let err = Error::Conflict("Display sequencing is running".to_string());
        assert_eq!(err.banner_text(), "Display sequencing is running");
    }
}
