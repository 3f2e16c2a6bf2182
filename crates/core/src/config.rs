//! Runtime Configuration
//!
//! Tunables for the value core, parsed from TOML.
//!
//! # Example
//!
//! ```toml
//! default_table_capacity = 16
//! in_place_growth = false
//! ```
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_toml(text)?;
//! ice_core::runtime::init(config);
//! ```

use serde::Deserialize;
use std::path::Path;

/// Embedded default configuration
pub static DEFAULT_CONFIG: &str = include_str!("defaults.toml");

/// Largest table capacity a config may request for the empty-table path
const MAX_DEFAULT_TABLE_CAPACITY: u32 = 1 << 16;

/// Error while loading a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io(std::io::Error),
    /// The text is not valid TOML for this schema
    Parse(toml::de::Error),
    /// Parsed, but a value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read runtime config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse runtime config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid runtime config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Tunables for a runtime context
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Capacity used when inserting into the empty-table singleton
    pub default_table_capacity: u32,

    /// Grow exclusively-owned Flat leaves in place on append
    pub in_place_growth: bool,

    /// Minimum byte capacity of a freshly allocated growable leaf
    pub min_growth_bytes: u32,

    /// Emit a trace event per block allocation and free
    pub trace_allocations: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_table_capacity: 8,
            in_place_growth: true,
            min_growth_bytes: 64,
            trace_allocations: false,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from TOML text
    ///
    /// Keys missing from `text` take their default values.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the embedded defaults
    pub fn default_config() -> Result<Self, ConfigError> {
        Self::from_toml(DEFAULT_CONFIG)
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let cap = self.default_table_capacity;
        if cap == 0 || !cap.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "default_table_capacity must be a nonzero power of two, got {}",
                cap
            )));
        }
        if cap > MAX_DEFAULT_TABLE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "default_table_capacity {} exceeds {}",
                cap, MAX_DEFAULT_TABLE_CAPACITY
            )));
        }
        if self.min_growth_bytes == 0 {
            return Err(ConfigError::Invalid(
                "min_growth_bytes must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_default_impl() {
        let parsed = RuntimeConfig::default_config().unwrap();
        assert_eq!(parsed, RuntimeConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = RuntimeConfig::from_toml("in_place_growth = false").unwrap();
        assert!(!config.in_place_growth);
        assert_eq!(config.default_table_capacity, 8);
        assert_eq!(config.min_growth_bytes, 64);
    }

    #[test]
    fn test_rejects_non_power_of_two_capacity() {
        let err = RuntimeConfig::from_toml("default_table_capacity = 12").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn test_rejects_zero_growth() {
        let err = RuntimeConfig::from_toml("min_growth_bytes = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = RuntimeConfig::from_toml("table_capacity = 8").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/ice.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
