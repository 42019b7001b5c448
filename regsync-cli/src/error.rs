//! Error types for the regsync CLI.

use std::fmt;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types.
#[derive(Debug)]
pub enum CliError {
    /// IO error (reading record files, etc.)
    Io(std::io::Error),

    /// Register center configuration error
    Config(String),

    /// Store or watcher error
    Registry(String),

    /// Invalid argument
    InvalidArgument(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Io(e) => write!(f, "IO error: {}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Registry(msg) => write!(f, "Register center error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<regsync_config::ConfigError> for CliError {
    fn from(e: regsync_config::ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<regsync_register::RegistryError> for CliError {
    fn from(e: regsync_register::RegistryError) -> Self {
        CliError::Registry(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::InvalidArgument(format!("record is not valid JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CliError::Config("serverLists must not be empty".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: serverLists must not be empty"
        );
    }

    #[test]
    fn test_from_registry_error() {
        let err: CliError =
            regsync_register::RegistryError::BackendUnavailable("refused".to_string()).into();
        assert!(matches!(err, CliError::Registry(_)));
        assert!(err.to_string().contains("refused"));
    }
}
