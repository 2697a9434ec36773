use crate::ConveyorError;
use serde::Deserialize;
use std::{str::FromStr, time::Duration};

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(60 * 5);
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60 * 5);

/// Tunables of a [crate::Conveyor].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    /// Maximum number of jobs in flight at once.
    pub concurrency: usize,
    /// Downstream attempts per job, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each one after.
    pub backoff_base: Duration,
    /// Wall-clock budget for a job, measured from when processing begins.
    pub job_timeout: Duration,
    /// How long a record is kept after submission.
    pub retention: Duration,
    /// Time between reaper sweeps.
    pub reap_interval: Duration,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        ConveyorConfig {
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            retention: DEFAULT_RETENTION,
            reap_interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

impl ConveyorConfig {
    /// The defaults, overridden by any `CONVEYOR_*` environment variables
    /// that are set.
    pub fn from_env() -> Result<Self, ConveyorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, ConveyorError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = ConveyorConfig::default();

        if let Some(value) = parse(&lookup, "CONVEYOR_CONCURRENCY")? {
            config.concurrency = value;
        }
        if let Some(value) = parse(&lookup, "CONVEYOR_MAX_ATTEMPTS")? {
            config.max_attempts = value;
        }
        if let Some(value) = parse(&lookup, "CONVEYOR_BACKOFF_BASE_MS")? {
            config.backoff_base = Duration::from_millis(value);
        }
        if let Some(value) = parse(&lookup, "CONVEYOR_JOB_TIMEOUT_SECS")? {
            config.job_timeout = Duration::from_secs(value);
        }
        if let Some(value) = parse(&lookup, "CONVEYOR_RETENTION_SECS")? {
            config.retention = Duration::from_secs(value);
        }
        if let Some(value) = parse(&lookup, "CONVEYOR_REAP_INTERVAL_SECS")? {
            config.reap_interval = Duration::from_secs(value);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConveyorError> {
        if self.concurrency == 0 {
            return Err(ConveyorError::InvalidConfiguration(
                "concurrency must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConveyorError::InvalidConfiguration(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.reap_interval.is_zero() {
            return Err(ConveyorError::InvalidConfiguration(
                "reap_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse<L, T>(lookup: &L, key: &str) -> Result<Option<T>, ConveyorError>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|error| {
            ConveyorError::InvalidConfiguration(format!("{key}={raw:?}: {error}"))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn it_defaults_to_documented_values() -> Result<()> {
        let config = ConveyorConfig::from_lookup(lookup(&[]))?;
        assert_eq!(config, ConveyorConfig::default());
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.reap_interval, Duration::from_secs(300));
        config.validate()?;
        Ok(())
    }

    #[test]
    fn it_applies_environment_overrides() -> Result<()> {
        let config = ConveyorConfig::from_lookup(lookup(&[
            ("CONVEYOR_CONCURRENCY", "8"),
            ("CONVEYOR_BACKOFF_BASE_MS", " 250 "),
            ("CONVEYOR_RETENTION_SECS", "120"),
        ]))?;

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.retention, Duration::from_secs(120));
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        Ok(())
    }

    #[test]
    fn it_rejects_unparseable_overrides() {
        let result = ConveyorConfig::from_lookup(lookup(&[("CONVEYOR_MAX_ATTEMPTS", "many")]));
        assert!(matches!(
            result,
            Err(ConveyorError::InvalidConfiguration(message)) if message.contains("CONVEYOR_MAX_ATTEMPTS")
        ));
    }

    #[test]
    fn it_rejects_zero_bounds() {
        for config in [
            ConveyorConfig {
                concurrency: 0,
                ..Default::default()
            },
            ConveyorConfig {
                max_attempts: 0,
                ..Default::default()
            },
            ConveyorConfig {
                reap_interval: Duration::ZERO,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err());
        }
    }
}
