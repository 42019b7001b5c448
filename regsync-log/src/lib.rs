//! Logging bootstrap for regsync processes
//!
//! Library crates in this workspace log through `tracing` macros and never
//! install a subscriber themselves. Binaries call [`init`] once at startup to
//! install a `tracing-subscriber` registry configured from the environment.
//!
//! # Environment Variables
//!
//! - `REGSYNC_DEBUG=1` - Enable debug logging
//! - `REGSYNC_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `REGSYNC_LOG_FORMAT=pretty|compact|json` - Set output format
//! - `REGSYNC_LOG_COLOR=1|0` - Enable/disable colors
//! - `RUST_LOG` - When set, takes precedence over `REGSYNC_LOG_LEVEL`
//!
//! # Usage
//!
//! ```rust,ignore
//! fn main() {
//!     regsync_log::init();
//!     tracing::info!("synchronizer starting");
//! }
//! ```

use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level for regsync logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Get level from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Compact,
            color: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.to_lowercase() == "true");

        let debug = flag("REGSYNC_DEBUG").unwrap_or(false);

        let level = lookup("REGSYNC_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("REGSYNC_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Compact);

        // JSON output never carries ANSI escapes
        let color = format != Format::Json
            && flag("REGSYNC_LOG_COLOR")
                .unwrap_or_else(|| lookup("NO_COLOR").is_none() && lookup("TERM").is_some());

        Self {
            debug,
            level,
            format,
            color,
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self.format {
            Format::Json => Box::new(fmt::layer().json().flatten_event(true).with_ansi(false)),
            Format::Pretty => Box::new(fmt::layer().pretty().with_ansi(self.color)),
            Format::Compact => Box::new(fmt::layer().compact().with_ansi(self.color)),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Install the global subscriber using [`LogConfig::from_env`].
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    init_with(&LogConfig::from_env())
}

/// Install the global subscriber using the given configuration.
pub fn init_with(config: &LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.filter())
        .try_init()
        .is_ok()
}

// ============================================================================
// Tests
// ============================================================================
