//! Engine configuration
//!
//! [`EngineConfig`] carries the hard ceilings and pool sizes the engine and the iteration
//! executor respect. It can be built in code, loaded from YAML or TOML, and adjusted from the
//! process environment.
//!
//! YAML files may reference environment variables with `${NAME:default}`:
//!
//! ```yaml
//! max_execution_steps: ${WORKFLOW_STEPS:500}
//! max_workers: 4
//! ```
//!
//! | Environment variable           | Field                     |
//! |--------------------------------|---------------------------|
//! | `WORKFLOW_MAX_EXECUTION_STEPS` | `max_execution_steps`     |
//! | `WORKFLOW_MAX_EXECUTION_TIME`  | `max_execution_time_secs` |
//! | `GRAPH_ENGINE_MAX_WORKERS`     | `max_workers`             |
//! | `MAX_SUBMIT_COUNT`             | `max_submit_count`        |

use crate::error::{GraphError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

pub const ENV_MAX_EXECUTION_STEPS: &str = "WORKFLOW_MAX_EXECUTION_STEPS";
pub const ENV_MAX_EXECUTION_TIME: &str = "WORKFLOW_MAX_EXECUTION_TIME";
pub const ENV_MAX_WORKERS: &str = "GRAPH_ENGINE_MAX_WORKERS";
pub const ENV_MAX_SUBMIT_COUNT: &str = "MAX_SUBMIT_COUNT";

/// Upper bound for `max_execution_time_secs` (one year)
pub const MAX_EXECUTION_TIME_LIMIT_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound for `ping_interval_ms` (one day)
pub const MAX_PING_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Limits and pool sizes for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node dispatches allowed per engine run
    pub max_execution_steps: u64,

    /// Wall-clock ceiling per engine run, in seconds
    pub max_execution_time_secs: u64,

    /// Concurrently running nodes per engine
    pub max_workers: usize,

    /// Global cap on parallel iteration workers
    pub max_submit_count: usize,

    /// Parallel iteration workers when a node does not set `parallel_nums`
    pub default_parallel_nums: usize,

    /// Idle period after which a `Ping` event is emitted, in milliseconds
    pub ping_interval_ms: u64,

    /// Capacity of the engine's event channels
    pub event_buffer: usize,

    /// Maximum nesting depth of workflow invocations
    pub max_call_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_steps: 500,
            max_execution_time_secs: 1200,
            max_workers: 10,
            max_submit_count: 100,
            default_parallel_nums: 10,
            ping_interval_ms: 10_000,
            event_buffer: 100,
            max_call_depth: 5,
        }
    }
}

impl EngineConfig {
    pub fn with_max_execution_steps(mut self, steps: u64) -> Self {
        self.max_execution_steps = steps;
        self
    }

    pub fn with_max_execution_time(mut self, duration: Duration) -> Self {
        self.max_execution_time_secs = duration.as_secs();
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_max_submit_count(mut self, count: usize) -> Self {
        self.max_submit_count = count;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_time_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// Worker count for a parallel iteration that asked for `requested` workers
    pub fn parallel_workers(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_parallel_nums)
            .min(self.max_submit_count)
            .max(1)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply the recognised environment variables on top of `self`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(steps) = read_env_number(ENV_MAX_EXECUTION_STEPS)? {
            self.max_execution_steps = steps;
        }
        if let Some(secs) = read_env_number(ENV_MAX_EXECUTION_TIME)? {
            self.max_execution_time_secs = secs;
        }
        if let Some(workers) = read_env_number(ENV_MAX_WORKERS)? {
            self.max_workers = workers as usize;
        }
        if let Some(count) = read_env_number(ENV_MAX_SUBMIT_COUNT)? {
            self.max_submit_count = count as usize;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut value: YamlValue = serde_yaml::from_str(content)?;
        expand_variables(&mut value);
        let config: Self = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.toml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(GraphError::Configuration(format!(
                "Unsupported config file extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(GraphError::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(GraphError::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.max_execution_time_secs > MAX_EXECUTION_TIME_LIMIT_SECS {
            return Err(GraphError::Configuration(format!(
                "max_execution_time_secs must be at most {}, got {}",
                MAX_EXECUTION_TIME_LIMIT_SECS, self.max_execution_time_secs
            )));
        }
        if self.ping_interval_ms > MAX_PING_INTERVAL_MS {
            return Err(GraphError::Configuration(format!(
                "ping_interval_ms must be at most {}, got {}",
                MAX_PING_INTERVAL_MS, self.ping_interval_ms
            )));
        }
        Ok(())
    }
}

fn read_env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|e| {
            GraphError::Configuration(format!("Invalid value for {}: {} ({})", name, raw, e))
        }),
        Err(_) => Ok(None),
    }
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok())
        .as_ref()
}

/// Expand `${NAME:default}` references in every string of a YAML tree
///
/// A string that becomes a plain scalar after expansion (`"${STEPS:10}"` → `10`) is re-read
/// so that numeric and boolean fields keep their types.
fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *value = match serde_yaml::from_str::<YamlValue>(&expanded) {
                    Ok(parsed @ (YamlValue::Number(_) | YamlValue::Bool(_))) => parsed,
                    _ => YamlValue::String(expanded),
                };
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let mut result = s.to_string();
    for cap in env_pattern()?.captures_iter(s) {
        let full_match = cap.get(0)?.as_str();
        let var_name = cap.get(1)?.as_str();
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");

        let value = std::env::var(var_name).unwrap_or_else(|_| default_value.to_string());
        result = result.replace(full_match, &value);
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_execution_steps, 500);
        assert_eq!(config.max_execution_time_secs, 1200);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.max_submit_count, 100);
        assert_eq!(config.ping_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_with_env_defaults() {
        let yaml = r#"
max_execution_steps: ${GRAPHFLOW_TEST_UNSET_STEPS:42}
max_workers: 3
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.max_execution_steps, 42);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.event_buffer, 100);
    }

    #[test]
    fn test_toml_partial() {
        let config = EngineConfig::from_toml_str("max_submit_count = 4\n").unwrap();
        assert_eq!(config.max_submit_count, 4);
        assert_eq!(config.max_execution_steps, 500);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = EngineConfig::from_toml_str("max_workers = 0\n").unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let config = EngineConfig::default().with_max_execution_time(Duration::from_secs(u64::MAX));
        assert!(matches!(config.validate(), Err(GraphError::Configuration(_))));

        let config = EngineConfig::default().with_ping_interval(Duration::from_secs(u64::MAX));
        assert!(matches!(config.validate(), Err(GraphError::Configuration(_))));

        let err = EngineConfig::from_yaml_str("max_execution_time_secs: 18446744073709551615\n")
            .unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));

        let config = EngineConfig::default()
            .with_max_execution_time(Duration::from_secs(MAX_EXECUTION_TIME_LIMIT_SECS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parallel_workers_capped() {
        let config = EngineConfig::default().with_max_submit_count(3);
        assert_eq!(config.parallel_workers(Some(8)), 3);
        assert_eq!(config.parallel_workers(Some(2)), 2);
        assert_eq!(config.parallel_workers(None), 3);
        assert_eq!(config.parallel_workers(Some(0)), 1);
    }

    #[test]
    fn test_from_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "ping_interval_ms: 250").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ping_interval(), Duration::from_millis(250));

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(EngineConfig::from_file(other.path()).is_err());
    }
}
