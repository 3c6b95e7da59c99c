//! Runtime configuration, read from environment variables.
//!
//! | variable | default |
//! |----------|---------|
//! | `OUTBOX_SCHEDULER_ENABLED` | `false` |
//! | `OUTBOX_SCHEDULER_DELAY_MS` | `10000` |
//! | `OUTBOX_SCHEDULER_INITIAL_DELAY_MS` | `OUTBOX_SCHEDULER_DELAY_MS` |
//! | `BACKGROUND_POOL_CORE_SIZE` | `4` |
//! | `BACKGROUND_POOL_MAX_SIZE` | `16` |
//! | `BACKGROUND_POOL_QUEUE_CAPACITY` | `100` |
//! | `BACKGROUND_POOL_KEEP_ALIVE_MS` | `60000` |
//! | `SCHEDULER_POOL_SIZE` | `2` |

use std::str::FromStr;
use std::time::Duration;

use workforce_context::PoolConfig;

pub const OUTBOX_SCHEDULER_ENABLED: &str = "OUTBOX_SCHEDULER_ENABLED";
pub const OUTBOX_SCHEDULER_DELAY_MS: &str = "OUTBOX_SCHEDULER_DELAY_MS";
pub const OUTBOX_SCHEDULER_INITIAL_DELAY_MS: &str = "OUTBOX_SCHEDULER_INITIAL_DELAY_MS";
pub const BACKGROUND_POOL_CORE_SIZE: &str = "BACKGROUND_POOL_CORE_SIZE";
pub const BACKGROUND_POOL_MAX_SIZE: &str = "BACKGROUND_POOL_MAX_SIZE";
pub const BACKGROUND_POOL_QUEUE_CAPACITY: &str = "BACKGROUND_POOL_QUEUE_CAPACITY";
pub const BACKGROUND_POOL_KEEP_ALIVE_MS: &str = "BACKGROUND_POOL_KEEP_ALIVE_MS";
pub const SCHEDULER_POOL_SIZE: &str = "SCHEDULER_POOL_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Outbox scheduler switch and cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    pub enabled: bool,
    /// Pause between the end of one tick and the start of the next.
    pub delay: Duration,
    pub initial_delay: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_secs(10),
            initial_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundPoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
}

impl Default for BackgroundPoolConfig {
    fn default() -> Self {
        Self {
            core_size: 4,
            max_size: 16,
            queue_capacity: 100,
            keep_alive: Duration::from_secs(60),
        }
    }
}

impl BackgroundPoolConfig {
    pub fn to_pool_config(&self, name: impl Into<String>) -> PoolConfig {
        PoolConfig {
            name: name.into(),
            core_size: self.core_size,
            max_size: self.max_size,
            queue_capacity: self.queue_capacity,
            keep_alive: self.keep_alive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPoolConfig {
    pub threads: usize,
}

impl Default for SchedulerPoolConfig {
    fn default() -> Self {
        Self { threads: 2 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub outbox: OutboxConfig,
    pub background: BackgroundPoolConfig,
    pub scheduler: SchedulerPoolConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();

        let enabled = parse_bool(&lookup, OUTBOX_SCHEDULER_ENABLED)?.unwrap_or(defaults.outbox.enabled);
        let delay = parse_millis(&lookup, OUTBOX_SCHEDULER_DELAY_MS)?.unwrap_or(defaults.outbox.delay);
        let initial_delay = parse_millis(&lookup, OUTBOX_SCHEDULER_INITIAL_DELAY_MS)?.unwrap_or(delay);

        let background = BackgroundPoolConfig {
            core_size: parse(&lookup, BACKGROUND_POOL_CORE_SIZE)?.unwrap_or(defaults.background.core_size),
            max_size: parse(&lookup, BACKGROUND_POOL_MAX_SIZE)?.unwrap_or(defaults.background.max_size),
            queue_capacity: parse(&lookup, BACKGROUND_POOL_QUEUE_CAPACITY)?
                .unwrap_or(defaults.background.queue_capacity),
            keep_alive: parse_millis(&lookup, BACKGROUND_POOL_KEEP_ALIVE_MS)?
                .unwrap_or(defaults.background.keep_alive),
        };
        let scheduler = SchedulerPoolConfig {
            threads: parse(&lookup, SCHEDULER_POOL_SIZE)?.unwrap_or(defaults.scheduler.threads),
        };

        let config = AppConfig {
            outbox: OutboxConfig {
                enabled,
                delay,
                initial_delay,
            },
            background,
            scheduler,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbox.delay.is_zero() {
            return Err(ConfigError::Inconsistent(format!("{OUTBOX_SCHEDULER_DELAY_MS} must be positive")));
        }
        if self.background.max_size == 0 {
            return Err(ConfigError::Inconsistent(format!("{BACKGROUND_POOL_MAX_SIZE} must be positive")));
        }
        if self.background.max_size < self.background.core_size {
            return Err(ConfigError::Inconsistent(format!(
                "{BACKGROUND_POOL_MAX_SIZE} ({}) is below {BACKGROUND_POOL_CORE_SIZE} ({})",
                self.background.max_size, self.background.core_size
            )));
        }
        if self.scheduler.threads == 0 {
            return Err(ConfigError::Inconsistent(format!("{SCHEDULER_POOL_SIZE} must be positive")));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, key)?.map(Duration::from_millis))
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_leave_the_scheduler_off() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(!config.outbox.enabled);
        assert_eq!(config.outbox.delay, Duration::from_secs(10));
        assert_eq!(config.scheduler.threads, 2);
    }

    #[test]
    fn values_are_read_from_the_lookup() {
        let config = from_pairs(&[
            (OUTBOX_SCHEDULER_ENABLED, "TRUE"),
            (OUTBOX_SCHEDULER_DELAY_MS, "250"),
            (BACKGROUND_POOL_CORE_SIZE, "2"),
            (BACKGROUND_POOL_MAX_SIZE, "3"),
            (BACKGROUND_POOL_QUEUE_CAPACITY, "0"),
            (SCHEDULER_POOL_SIZE, "1"),
        ])
        .unwrap();

        assert!(config.outbox.enabled);
        assert_eq!(config.outbox.delay, Duration::from_millis(250));
        assert_eq!(config.outbox.initial_delay, Duration::from_millis(250));
        let pool = config.background.to_pool_config("bg");
        assert_eq!((pool.core_size, pool.max_size, pool.queue_capacity), (2, 3, 0));
        assert_eq!(pool.name, "bg");
    }

    #[test]
    fn unparseable_values_name_the_key() {
        let err = from_pairs(&[(OUTBOX_SCHEDULER_DELAY_MS, "soon")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: OUTBOX_SCHEDULER_DELAY_MS,
                value: "soon".to_string()
            }
        );
        assert!(from_pairs(&[(OUTBOX_SCHEDULER_ENABLED, "maybe")]).is_err());
    }

    #[test]
    fn max_below_core_is_inconsistent() {
        let err = from_pairs(&[(BACKGROUND_POOL_CORE_SIZE, "8"), (BACKGROUND_POOL_MAX_SIZE, "4")]).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}
