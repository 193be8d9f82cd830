use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("audio output unavailable: {0}")]
    Initialization(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("unregistered modulation destination '{0}'")]
    InvalidDestination(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidPatch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
