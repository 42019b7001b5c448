// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all environment variables, keyed by lowercase name with the prefix removed
    pub fn load(&self) -> HashMap<String, String> {
        self.collect(env::vars())
    }

    fn collect(&self, vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for (key, value) in vars {
            match self.prefix {
                Some(ref prefix) => {
                    if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                        if let Some(trimmed) = rest.strip_prefix('_') {
                            config.insert(trimmed.to_lowercase(), value);
                        }
                    }
                }
                None => {
                    config.insert(key.to_lowercase(), value);
                }
            }
        }

        config
    }

    /// Load a `.env` file into the process environment
    pub fn load_dotenv(path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }
        Ok(())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_collect_with_prefix() {
        let loader = EnvLoader::new(Some("REGSYNC".to_string()));
        let config = loader.collect(vars(&[
            ("REGSYNC_REGISTER_TYPE", "etcd"),
            ("REGSYNCX_OTHER", "ignored"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(config.len(), 1);
        assert_eq!(config.get("register_type").map(String::as_str), Some("etcd"));
    }

    #[test]
    fn test_collect_without_prefix() {
        let loader = EnvLoader::default();
        let config = loader.collect(vars(&[("HOME", "/root")]));
        assert_eq!(config.get("home").map(String::as_str), Some("/root"));
    }

    #[test]
    fn test_missing_dotenv_file() {
        assert!(matches!(
            EnvLoader::load_dotenv(Some("/nonexistent/regsync.env")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
