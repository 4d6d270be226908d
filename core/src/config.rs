//! Session configuration.
//!
//! A `ClientConfig` can be built in code, deserialized from any serde format,
//! or read from `RADIUS_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::auth::Credentials;
use crate::error::{RadiusError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How export-filter tasks are polled.
///
/// After the initial status check the task is re-checked up to `max_checks`
/// times, sleeping `interval` before each check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollPolicy {
    #[serde(rename = "interval_ms", deserialize_with = "millis")]
    pub interval: Duration,
    pub max_checks: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_checks: u32) -> Self {
        Self {
            interval,
            max_checks,
        }
    }

    /// Longest time spent sleeping before a timeout.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_checks
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_checks: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(rename = "timeout_secs", default = "default_timeout", deserialize_with = "seconds")]
    pub timeout: Duration,
    #[serde(default)]
    pub poll: PollPolicy,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            timeout: DEFAULT_TIMEOUT,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Read `RADIUS_BASE_URL`, `RADIUS_USERNAME`, `RADIUS_PASSWORD` and the
    /// optional `RADIUS_TIMEOUT_SECS`, `RADIUS_POLL_INTERVAL_MS`,
    /// `RADIUS_POLL_CHECKS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| RadiusError::Config(format!("{key} is not set")))
        };
        let optional_u64 = |key: &str| -> Result<Option<u64>> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| RadiusError::Config(format!("{key} must be a non-negative integer, got <{raw}>"))),
                None => Ok(None),
            }
        };

        let credentials = Credentials::new(required("RADIUS_USERNAME")?, required("RADIUS_PASSWORD")?);
        let mut config = Self::new(required("RADIUS_BASE_URL")?, credentials);
        if let Some(secs) = optional_u64("RADIUS_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = optional_u64("RADIUS_POLL_INTERVAL_MS")? {
            config.poll.interval = Duration::from_millis(ms);
        }
        if let Some(checks) = optional_u64("RADIUS_POLL_CHECKS")? {
            config.poll.max_checks = u32::try_from(checks)
                .map_err(|_| RadiusError::Config(format!("RADIUS_POLL_CHECKS out of range: {checks}")))?;
        }
        Ok(config)
    }
}
