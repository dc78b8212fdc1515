//! Configuration loaded from environment variables.
//!
//! | variable                   | default | invalid value             |
//! |----------------------------|---------|---------------------------|
//! | `BASE_DELAY_SECONDS`       | 2       | error                     |
//! | `MAX_DELAY_SECONDS`        | 900     | error                     |
//! | `MAX_RETRIES`              | 2       | 0 (never retry) + warning |
//! | `FAILURE_RATE`             | 0.3     | error                     |
//! | `WORKER_CONCURRENCY`       | 4       | error                     |
//! | `MAX_RECEIVE_COUNT`        | 3       | error                     |
//! | `REDELIVERY_DELAY_SECONDS` | 1       | error                     |
//!
//! Unset and blank variables take the default.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::app::RedeliveryPolicy;
use crate::domain::{BackoffPolicy, ConfigError};

pub const BASE_DELAY_SECONDS: &str = "BASE_DELAY_SECONDS";
pub const MAX_DELAY_SECONDS: &str = "MAX_DELAY_SECONDS";
pub const MAX_RETRIES: &str = "MAX_RETRIES";
pub const FAILURE_RATE: &str = "FAILURE_RATE";
pub const WORKER_CONCURRENCY: &str = "WORKER_CONCURRENCY";
pub const MAX_RECEIVE_COUNT: &str = "MAX_RECEIVE_COUNT";
pub const REDELIVERY_DELAY_SECONDS: &str = "REDELIVERY_DELAY_SECONDS";

/// Runtime configuration for the processor, the worker pool and the demo work.
#[derive(Debug, Clone, PartialEq)]
pub struct ReboundConfig {
    pub backoff: BackoffPolicy,

    /// Failure rate of the simulated unit of work, in `[0, 1]`.
    pub failure_rate: f64,

    /// Number of processor workers.
    pub workers: usize,

    pub redelivery: RedeliveryPolicy,
}

impl Default for ReboundConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            failure_rate: 0.3,
            workers: 4,
            redelivery: RedeliveryPolicy::default(),
        }
    }
}

impl ReboundConfig {
    /// Read the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first variable that is set but cannot be used.
    /// `MAX_RETRIES` never errors: anything that is not a positive integer disables retries.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let base_delay = seconds(BASE_DELAY_SECONDS, get(BASE_DELAY_SECONDS))?
            .unwrap_or(defaults.backoff.base_delay);
        let max_delay = seconds(MAX_DELAY_SECONDS, get(MAX_DELAY_SECONDS))?
            .unwrap_or(defaults.backoff.max_delay);
        let max_retries = match get(MAX_RETRIES) {
            Some(raw) => max_retries(&raw),
            None => defaults.backoff.max_retries,
        };

        let failure_rate = match parse::<f64>(FAILURE_RATE, get(FAILURE_RATE))? {
            Some(rate) if (0.0..=1.0).contains(&rate) => rate,
            Some(rate) => {
                return Err(ConfigError {
                    key: FAILURE_RATE,
                    value: rate.to_string(),
                    reason: "must be between 0 and 1".into(),
                });
            }
            None => defaults.failure_rate,
        };

        let workers = match parse::<usize>(WORKER_CONCURRENCY, get(WORKER_CONCURRENCY))? {
            Some(0) => {
                return Err(ConfigError {
                    key: WORKER_CONCURRENCY,
                    value: "0".into(),
                    reason: "at least one worker is required".into(),
                });
            }
            Some(n) => n,
            None => defaults.workers,
        };

        let redelivery = RedeliveryPolicy {
            max_receive_count: parse(MAX_RECEIVE_COUNT, get(MAX_RECEIVE_COUNT))?
                .unwrap_or(defaults.redelivery.max_receive_count)
                .max(1),
            delay: seconds(REDELIVERY_DELAY_SECONDS, get(REDELIVERY_DELAY_SECONDS))?
                .unwrap_or(defaults.redelivery.delay),
        };

        Ok(Self {
            backoff: BackoffPolicy::new(base_delay, max_delay, max_retries),
            failure_rate,
            workers,
            redelivery,
        })
    }
}

fn parse<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| ConfigError {
            key,
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

fn seconds(key: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(key, raw)?.map(Duration::from_secs))
}

/// Fail closed: non-numeric, zero or negative means "never retry".
fn max_retries(raw: &str) -> u32 {
    match raw.parse::<i64>() {
        Ok(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        Ok(0) => 0,
        _ => {
            warn!(key = MAX_RETRIES, value = raw, "invalid value; retries disabled");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ReboundConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ReboundConfig::default());
        assert_eq!(config.backoff.base_delay, Duration::from_secs(2));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(900));
        assert_eq!(config.backoff.max_retries, 2);
        assert_eq!(config.failure_rate, 0.3);
    }

    #[test]
    fn reads_every_variable() {
        let config = ReboundConfig::from_lookup(lookup(&[
            (BASE_DELAY_SECONDS, "5"),
            (MAX_DELAY_SECONDS, "60"),
            (MAX_RETRIES, "4"),
            (FAILURE_RATE, "0"),
            (WORKER_CONCURRENCY, "8"),
            (MAX_RECEIVE_COUNT, "5"),
            (REDELIVERY_DELAY_SECONDS, "0"),
        ]))
        .unwrap();

        assert_eq!(
            config.backoff,
            BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(60), 4)
        );
        assert_eq!(config.failure_rate, 0.0);
        assert_eq!(config.workers, 8);
        assert_eq!(config.redelivery.max_receive_count, 5);
        assert_eq!(config.redelivery.delay, Duration::ZERO);
    }

    #[rstest]
    #[case::zero("0")]
    #[case::negative("-3")]
    #[case::not_a_number("abc")]
    #[case::fractional("1.5")]
    fn bad_max_retries_disables_retries(#[case] raw: &str) {
        let config = ReboundConfig::from_lookup(lookup(&[(MAX_RETRIES, raw)])).unwrap();
        assert_eq!(config.backoff.max_retries, 0);
        assert!(!config.backoff.should_retry(0));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            ReboundConfig::from_lookup(lookup(&[(MAX_RETRIES, "  "), (BASE_DELAY_SECONDS, "")]))
                .unwrap();
        assert_eq!(config, ReboundConfig::default());
    }

    #[rstest]
    #[case::base_delay(BASE_DELAY_SECONDS, "soon")]
    #[case::negative_delay(MAX_DELAY_SECONDS, "-1")]
    #[case::rate_too_high(FAILURE_RATE, "1.5")]
    #[case::rate_not_a_number(FAILURE_RATE, "often")]
    #[case::no_workers(WORKER_CONCURRENCY, "0")]
    #[case::receive_count(MAX_RECEIVE_COUNT, "many")]
    fn invalid_values_are_errors(#[case] key: &'static str, #[case] raw: &str) {
        let err = ReboundConfig::from_lookup(lookup(&[(key, raw)])).unwrap_err();
        assert_eq!(err.key, key);
        assert!(err.to_string().contains(key));
    }

    #[test]
    fn from_env_reads_process_environment() {
        temp_env::with_vars(
            [
                (BASE_DELAY_SECONDS, Some("3")),
                (MAX_RETRIES, Some("-1")),
                (FAILURE_RATE, Some("0.5")),
                (WORKER_CONCURRENCY, None),
            ],
            || {
                let config = ReboundConfig::from_env().unwrap();
                assert_eq!(config.backoff.base_delay, Duration::from_secs(3));
                assert_eq!(config.backoff.max_retries, 0);
                assert_eq!(config.failure_rate, 0.5);
                assert_eq!(config.workers, 4);
            },
        );
    }

    #[test]
    fn from_env_surfaces_invalid_values() {
        temp_env::with_var(MAX_DELAY_SECONDS, Some("forever"), || {
            let err = ReboundConfig::from_env().unwrap_err();
            assert_eq!(err.key, MAX_DELAY_SECONDS);
            assert_eq!(err.value, "forever");
        });
    }
}
