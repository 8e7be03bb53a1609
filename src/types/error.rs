#[derive(Debug, thiserror::Error)]
pub enum EngageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

impl From<r2d2::Error> for EngageError {
    fn from(e: r2d2::Error) -> Self {
        EngageError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for EngageError {
    fn from(e: rusqlite::Error) -> Self {
        EngageError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for EngageError {
    fn from(e: reqwest::Error) -> Self {
        EngageError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for EngageError {
    fn from(e: serde_json::Error) -> Self {
        EngageError::MalformedRecord(e.to_string())
    }
}
