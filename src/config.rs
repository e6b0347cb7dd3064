//! Engine-wide defaults, loadable from JSON.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_TRANSFORM_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How an execution treats input keys that match no input slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownInputPolicy {
    /// Drop the key and log it at debug level.
    #[default]
    Ignore,
    /// Fail `execute` with [`ExecutionError::UnknownInput`](crate::ExecutionError::UnknownInput).
    Reject,
}

/// Defaults applied to every execution of an [`Executable`](crate::Executable)
/// and to compilation. Per-execution [`ExecuteOptions`](crate::ExecuteOptions)
/// take precedence.
///
/// ```
/// use std::time::Duration;
/// use sqrl::{EngineConfig, UnknownInputPolicy};
///
/// let config = EngineConfig::from_json_str(
///     r#"{ "feature_timeout": 250, "unknown_inputs": "reject" }"#,
/// )
/// .unwrap();
/// assert_eq!(config.feature_timeout, Some(Duration::from_millis(250)));
/// assert_eq!(config.unknown_inputs, UnknownInputPolicy::Reject);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for all feature computation of one execution, in
    /// milliseconds. Absent means unbounded.
    #[serde(default, with = "optional_duration_ms")]
    pub feature_timeout: Option<Duration>,

    #[serde(default)]
    pub unknown_inputs: UnknownInputPolicy,

    /// Maximum number of rewrite passes per call site.
    #[serde(default = "default_max_transform_depth")]
    pub max_transform_depth: usize,

    /// Base configuration handed to registered functions through
    /// [`FunctionRegistry::config`](crate::FunctionRegistry::config).
    #[serde(default)]
    pub functions: serde_json::Value,
}

fn default_max_transform_depth() -> usize {
    DEFAULT_MAX_TRANSFORM_DEPTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feature_timeout: None,
            unknown_inputs: UnknownInputPolicy::default(),
            max_transform_depth: DEFAULT_MAX_TRANSFORM_DEPTH,
            functions: serde_json::Value::Null,
        }
    }
}

impl EngineConfig {
    /// Parse a config from a JSON string. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON or wrong field types.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be opened, or
    /// [`ConfigError::Parse`] if its content is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

mod optional_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
