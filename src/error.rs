//! Error types for the sparse inverted index

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid metric type: {0}")]
    InvalidMetricType(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Disk file error: {0}")]
    DiskFile(String),

    #[error("Corrupted index stream: {0}")]
    Corrupted(String),

    /// The caller broke the index contract (e.g. mutating an mmap-backed index).
    /// Retrying with different input cannot succeed.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Error::InvalidArgs(msg.into())
    }

    pub fn disk_file(msg: impl Into<String>) -> Self {
        Error::DiskFile(msg.into())
    }

    pub fn corrupted(msg: impl Into<String>) -> Self {
        Error::Corrupted(msg.into())
    }

    /// Builds a contract violation and logs it; these are never expected on a
    /// correct call path.
    pub fn contract(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(reason = %msg, "sparse index contract violation");
        Error::ContractViolation(msg)
    }

    /// Input and environment failures are recoverable; logic errors are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::ContractViolation(_))
    }
}
