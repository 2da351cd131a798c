//! Error types for the machine pool

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to create machine: {0}")]
    Create(String),

    #[error("failed to provision machine: {0}")]
    Provision(String),

    #[error("failed to connect to machine: {0}")]
    Connect(String),

    #[error("failed to remove machine: {0}")]
    Remove(String),

    #[error("failed to list machines: {0}")]
    List(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a connectivity error, the class that `use_machine`
    /// retries before surfacing.
    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connect(_))
    }
}
