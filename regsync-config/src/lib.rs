// Register center configuration for regsync

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "REGSYNC";

/// Property: session timeout in milliseconds.
pub const PROP_SESSION_TIMEOUT: &str = "zookeeperSessionTimeout";
/// Property: connection timeout in milliseconds.
pub const PROP_CONNECTION_TIMEOUT: &str = "zookeeperConnectionTimeout";
/// Property: root of the registration tree.
pub const PROP_ROOT_PATH: &str = "rootPath";
/// Property: drop watcher state for context paths that disappear.
pub const PROP_EVICT_REMOVED: &str = "evictRemovedContextPaths";
/// Property: id of the producer's own service registration (flat backend).
pub const PROP_SERVICE_ID: &str = "serviceId";
/// Property: name of the producer's own service registration (flat backend).
pub const PROP_SERVICE_NAME: &str = "serviceName";
/// Property: advertised host of the producer.
pub const PROP_HOST: &str = "host";
/// Property: advertised port of the producer.
pub const PROP_PORT: &str = "port";

const KNOWN_PROPS: &[&str] = &[
    PROP_SESSION_TIMEOUT,
    PROP_CONNECTION_TIMEOUT,
    PROP_ROOT_PATH,
    PROP_EVICT_REMOVED,
    PROP_SERVICE_ID,
    PROP_SERVICE_NAME,
    PROP_HOST,
    PROP_PORT,
];

const DEFAULT_TIMEOUT_MS: u64 = 3000;
const DEFAULT_ROOT_PATH: &str = "/regsync/register";

/// Store a register center talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    /// Process-local tree store (development and tests)
    Memory,
    /// Tree store over the etcd v3 JSON gateway
    Etcd,
    /// Flat key-value store plus agent service registrations
    Consul,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Memory => "memory",
            RegisterType::Etcd => "etcd",
            RegisterType::Consul => "consul",
        }
    }

    /// Whether this store exposes a watchable hierarchical namespace.
    pub fn is_tree(&self) -> bool {
        !matches!(self, RegisterType::Consul)
    }
}

impl FromStr for RegisterType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(RegisterType::Memory),
            "etcd" => Ok(RegisterType::Etcd),
            "consul" => Ok(RegisterType::Consul),
            other => Err(ConfigError::UnsupportedRegisterType(other.to_string())),
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Register center configuration shared by producers and consumers.
///
/// Field names follow the camelCase property names used by existing
/// deployments, so JSON and TOML files written for them load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCenterConfig {
    /// Backend selector: `memory`, `etcd` or `consul`
    #[serde(default = "default_register_type")]
    pub register_type: String,

    /// Store endpoint(s), comma separated
    #[serde(default)]
    pub server_lists: String,

    /// Free-form backend properties
    #[serde(default, deserialize_with = "stringly_map")]
    pub props: HashMap<String, String>,
}

fn default_register_type() -> String {
    RegisterType::Memory.as_str().to_string()
}

// TOML and JSON files commonly write numeric and boolean props unquoted.
fn stringly_map<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, serde_json::Value> = HashMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

impl Default for RegisterCenterConfig {
    fn default() -> Self {
        Self {
            register_type: default_register_type(),
            server_lists: String::new(),
            props: HashMap::new(),
        }
    }
}

impl RegisterCenterConfig {
    /// Create a configuration for the given backend and endpoints
    pub fn new(register_type: RegisterType, server_lists: impl Into<String>) -> Self {
        Self {
            register_type: register_type.as_str().to_string(),
            server_lists: server_lists.into(),
            props: HashMap::new(),
        }
    }

    /// Set a property
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Load from an optional JSON/TOML file, then apply `REGSYNC_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(&EnvLoader::new(Some(ENV_PREFIX.to_string())).load());
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON or TOML file, format chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::auto(path.as_ref())?;
        let value = loader.load_file(path.as_ref())?;
        serde_json::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply overrides keyed like [`EnvLoader::load`] output
    ///
    /// `register_type` and `server_lists` replace the top-level fields,
    /// `props_<name>` sets a property (matched case-insensitively against
    /// the known property names).
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) {
        for (key, value) in vars {
            match key.as_str() {
                "register_type" => self.register_type = value.clone(),
                "server_lists" => self.server_lists = value.clone(),
                _ => {
                    if let Some(prop) = key.strip_prefix("props_") {
                        let name = KNOWN_PROPS
                            .iter()
                            .find(|known| known.eq_ignore_ascii_case(prop))
                            .map(|known| known.to_string())
                            .unwrap_or_else(|| prop.to_string());
                        self.props.insert(name, value.clone());
                    }
                }
            }
        }
    }

    /// Parsed backend selector
    pub fn register_type(&self) -> Result<RegisterType> {
        self.register_type.parse()
    }

    /// Raw property lookup
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Session timeout (default 3000ms)
    pub fn session_timeout(&self) -> Result<Duration> {
        self.millis_prop(PROP_SESSION_TIMEOUT)
    }

    /// Connection timeout (default 3000ms)
    pub fn connection_timeout(&self) -> Result<Duration> {
        self.millis_prop(PROP_CONNECTION_TIMEOUT)
    }

    fn millis_prop(&self, key: &str) -> Result<Duration> {
        match self.prop(key) {
            Some(raw) => ConfigValidator::positive_integer(raw, key).map(Duration::from_millis),
            None => Ok(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
        }
    }

    /// Root of the registration tree, without a trailing `/`
    pub fn root_path(&self) -> String {
        let root = self.prop(PROP_ROOT_PATH).unwrap_or(DEFAULT_ROOT_PATH);
        let trimmed = root.trim_end_matches('/');
        if trimmed.is_empty() {
            DEFAULT_ROOT_PATH.to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Whether watcher state for vanished context paths is dropped
    pub fn evict_removed_context_paths(&self) -> Result<bool> {
        match self.prop(PROP_EVICT_REMOVED) {
            None => Ok(false),
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ConfigError::InvalidProperty {
                    key: PROP_EVICT_REMOVED.to_string(),
                    value: raw.to_string(),
                }),
            },
        }
    }

    /// Advertised port of the producer, if configured
    pub fn port(&self) -> Result<Option<u16>> {
        match self.prop(PROP_PORT) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidProperty {
                    key: PROP_PORT.to_string(),
                    value: raw.to_string(),
                }),
        }
    }
}

impl Validate for RegisterCenterConfig {
    fn validate(&self) -> Result<()> {
        let register_type = self.register_type()?;
        if register_type != RegisterType::Memory {
            ConfigValidator::not_empty(&self.server_lists, "serverLists")?;
            ConfigValidator::is_url_list(&self.server_lists, "serverLists")?;
        }
        self.session_timeout()?;
        self.connection_timeout()?;
        self.evict_removed_context_paths()?;
        self.port()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegisterCenterConfig::default();
        assert_eq!(config.register_type().unwrap(), RegisterType::Memory);
        assert_eq!(config.session_timeout().unwrap(), Duration::from_millis(3000));
        assert_eq!(config.connection_timeout().unwrap(), Duration::from_millis(3000));
        assert_eq!(config.root_path(), "/regsync/register");
        assert!(!config.evict_removed_context_paths().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeouts_from_props() {
        let config = RegisterCenterConfig::default()
            .with_prop(PROP_SESSION_TIMEOUT, "5000")
            .with_prop(PROP_CONNECTION_TIMEOUT, "1500");

        assert_eq!(config.session_timeout().unwrap(), Duration::from_millis(5000));
        assert_eq!(config.connection_timeout().unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let config = RegisterCenterConfig::default().with_prop(PROP_SESSION_TIMEOUT, "-1");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_network_backend_requires_servers() {
        let config = RegisterCenterConfig::new(RegisterType::Etcd, "");
        assert!(config.validate().is_err());

        let config = RegisterCenterConfig::new(RegisterType::Etcd, "http://127.0.0.1:2379");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_register_type() {
        let config = RegisterCenterConfig {
            register_type: "nacos".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedRegisterType(_))
        ));
    }

    #[test]
    fn test_root_path_normalized() {
        let config = RegisterCenterConfig::default().with_prop(PROP_ROOT_PATH, "soul/register/");
        assert_eq!(config.root_path(), "/soul/register");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RegisterCenterConfig::default();
        let vars: HashMap<String, String> = [
            ("register_type", "consul"),
            ("server_lists", "http://localhost:8500"),
            ("props_zookeepersessiontimeout", "4000"),
            ("props_custom", "x"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        config.apply_env(&vars);

        assert_eq!(config.register_type().unwrap(), RegisterType::Consul);
        assert_eq!(config.server_lists, "http://localhost:8500");
        assert_eq!(config.prop(PROP_SESSION_TIMEOUT), Some("4000"));
        assert_eq!(config.prop("custom"), Some("x"));
    }

    #[test]
    fn test_numeric_props_deserialize_as_strings() {
        let config: RegisterCenterConfig = serde_json::from_str(
            r#"{"registerType":"etcd","serverLists":"http://e:2379","props":{"zookeeperSessionTimeout":4500,"evictRemovedContextPaths":true}}"#,
        )
        .unwrap();

        assert_eq!(config.session_timeout().unwrap(), Duration::from_millis(4500));
        assert!(config.evict_removed_context_paths().unwrap());
    }
}
