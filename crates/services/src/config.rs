use std::time::Duration;

use quiz_core::scheduler::SchedulePolicy;
use serde::{Deserialize, Serialize};

/// Environment key for the bounded response wait, in whole seconds.
pub const RESPONSE_TIMEOUT_ENV: &str = "QUIZ_RESPONSE_TIMEOUT_SECS";

/// How long a delivered question waits for its single response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);

/// Runtime knobs for a practice cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeConfig {
    pub response_timeout: Duration,
    pub policy: SchedulePolicy,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            policy: SchedulePolicy::default(),
        }
    }
}

impl PracticeConfig {
    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Unparseable or zero values are
    /// ignored with a warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(RESPONSE_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.response_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    key = RESPONSE_TIMEOUT_ENV,
                    value = %raw,
                    "ignoring invalid response timeout"
                ),
            }
        }

        config
    }
}
