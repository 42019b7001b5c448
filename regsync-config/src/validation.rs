// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that every comma-separated entry is an http(s) URL
    pub fn is_url_list(value: &str, field: &str) -> Result<()> {
        for entry in value.split(',').map(str::trim) {
            if !entry.starts_with("http://") && !entry.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a comma-separated list of http(s) URLs, got {}",
                    field, entry
                )));
            }
        }
        Ok(())
    }

    /// Validate that a value parses as a strictly positive integer
    pub fn positive_integer(value: &str, field: &str) -> Result<u64> {
        match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ConfigError::InvalidProperty {
                key: field.to_string(),
                value: value.to_string(),
            }),
        }
    }
}
