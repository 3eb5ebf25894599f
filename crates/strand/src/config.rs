//! Scheduler configuration.
//!
//! Parsed from a TOML document with `SchedulerConfig::from_toml_str`, or built
//! in code starting from `SchedulerConfig::default()`.

use crate::error::{SchedError, SchedResult};
use crate::time::MonotonicMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cooperative time slot (10ms).
pub const DEFAULT_YIELD_SLOT_US: u64 = 10_000;

/// Default capacity of a trimmed display name.
pub const DEFAULT_NAME_LIMIT: usize = 99;

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wall time (microseconds) a callback may run before
    /// `Scheduler::should_yield` reports true.
    pub yield_slot_us: u64,

    /// How monotonic time is produced.
    pub monotonic: MonotonicMode,

    /// Cap on task objects in existence, queued or pooled (None = unlimited).
    pub max_tasks: Option<usize>,

    /// Maximum length of a trimmed display name.
    pub name_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            yield_slot_us: DEFAULT_YIELD_SLOT_US,
            monotonic: MonotonicMode::Native,
            max_tasks: None,
            name_limit: DEFAULT_NAME_LIMIT,
        }
    }
}

impl SchedulerConfig {
    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> SchedResult<Self> {
        let config: SchedulerConfig =
            toml::from_str(text).map_err(|e| SchedError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> SchedResult<()> {
        if self.name_limit == 0 {
            return Err(SchedError::Config("name_limit must be at least 1".into()));
        }
        if self.max_tasks == Some(0) {
            return Err(SchedError::Config("max_tasks must be at least 1".into()));
        }
        Ok(())
    }

    /// Yield slot as a `Duration`.
    pub fn yield_slot(&self) -> Duration {
        Duration::from_micros(self.yield_slot_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.yield_slot(), Duration::from_millis(10));
        assert_eq!(config.monotonic, MonotonicMode::Native);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            yield_slot_us = 250
            monotonic = "derived"
            "#,
        )
        .unwrap();
        assert_eq!(config.yield_slot_us, 250);
        assert_eq!(config.monotonic, MonotonicMode::Derived);
        assert_eq!(config.name_limit, DEFAULT_NAME_LIMIT);
        assert_eq!(config.max_tasks, None);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(matches!(
            SchedulerConfig::from_toml_str("name_limit = 0"),
            Err(SchedError::Config(_))
        ));
        assert!(matches!(
            SchedulerConfig::from_toml_str("monotonic = \"sundial\""),
            Err(SchedError::Config(_))
        ));
    }
}
