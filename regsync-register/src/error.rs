//! Registry error taxonomy

use thiserror::Error;

/// Errors surfaced by stores, writers and the watcher
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed path input, rejected before any I/O
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection or session failure talking to the store
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The store rejected a write
    #[error("Registration write failed: {0}")]
    RegistrationWriteFailed(String),

    /// A stored value is not a valid record
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Create on a node that is already present
    #[error("Node already exists: {0}")]
    NodeExists(String),

    /// Operation on a node that is absent
    #[error("No such node: {0}")]
    NoNode(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::BackendUnavailable(err.to_string())
    }
}

impl From<regsync_config::ConfigError> for RegistryError {
    fn from(err: regsync_config::ConfigError) -> Self {
        RegistryError::InvalidArgument(err.to_string())
    }
}

impl RegistryError {
    /// Map a store-level failure during a producer write.
    ///
    /// Connectivity problems stay `BackendUnavailable`; everything else the
    /// store reports becomes `RegistrationWriteFailed`.
    pub fn into_write_failure(self) -> Self {
        match self {
            RegistryError::BackendUnavailable(_)
            | RegistryError::InvalidArgument(_)
            | RegistryError::RegistrationWriteFailed(_) => self,
            other => RegistryError::RegistrationWriteFailed(other.to_string()),
        }
    }
}

/// Result alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
