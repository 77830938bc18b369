use crate::types::SessionState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarionetteError {
    #[error("session busy: {0} in progress, run stop first")]
    Busy(SessionState),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("trajectory load error: {0}")]
    Load(String),
    #[error("trajectory persist error: {0}")]
    Persist(String),
    #[error("actuator transport error: {0}")]
    Transport(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("worker error: {0}")]
    Worker(String),
}
