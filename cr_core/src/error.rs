use std::{fmt::Display, io};

use thiserror::Error;

/// Error kinds raised by the normalization core
///
/// The string carrying variants hold a message that can be extended with
/// [`CoreError::chain`] as the error moves up through dependent steps
#[derive(Error, Debug)]
pub enum CoreError {
    /// A required count is zero so the scale factor is undefined
    #[error("Normalization error: {0}")]
    Normalization(String),
    /// Inputs disagree with each other (chromosome sets, unknown sample ids, bad intervals)
    #[error("Data consistency error: {0}")]
    DataConsistency(String),
    /// Malformed table or track input
    #[error("Parse error: {0}")]
    Parse(String),
    /// Inconsistent run set up
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// External tool could not be launched or failed
    #[error("External tool error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Prefix the message with a step in the dependency chain, i.e.
    /// `group G -> sample S -> spikein factor: ...`
    pub fn chain<D: Display>(self, step: D) -> Self {
        match self {
            Self::Normalization(s) => Self::Normalization(format!("{} -> {}", step, s)),
            Self::DataConsistency(s) => Self::DataConsistency(format!("{} -> {}", step, s)),
            Self::Parse(s) => Self::Parse(format!("{} -> {}", step, s)),
            Self::Config(s) => Self::Config(format!("{} -> {}", step, s)),
            Self::External(s) => Self::External(format!("{} -> {}", step, s)),
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), format!("{} -> {}", step, e))),
        }
    }
}

// Line readers from utils report through anyhow
impl From<anyhow::Error> for CoreError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<io::Error>() {
            Ok(e) => Self::Io(e),
            Err(e) => Self::Parse(format!("{:#}", e)),
        }
    }
}
