//! Error taxonomy shared by every Diffuser crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiffuserError {
    /// A channel that is unknown or not present in the channel map.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// A rule with an unparseable time, recurrence or timing field.
    #[error("Malformed rule: {0}")]
    MalformedRule(String),

    /// A write to the output hardware failed.
    #[error("Actuator fault: {0}")]
    ActuatorFault(String),

    #[error("Rule store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DiffuserError>;
