use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_max_batch() -> usize {
    10
}

const fn default_interval() -> u64 {
    300 // 5 minutes
}

const fn default_visibility_timeout() -> u64 {
    60
}

const fn default_retention() -> u64 {
    1_209_600 // 14 days
}

/// Retry scheduler and dead-letter channel settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Most entries republished by one run
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// How often the scheduler runs when serving (in seconds)
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How long a received entry stays invisible to other receivers
    /// (in seconds)
    ///
    /// Should exceed the time a run needs to republish a batch, otherwise
    /// overlapping runs may republish the same entry twice.
    ///
    /// Default: 60 seconds
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Age after which the channel discards an entry (in seconds)
    ///
    /// Default: 1209600 seconds (14 days)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
            interval_secs: default_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
            retention_secs: default_retention(),
        }
    }
}

impl RetryConfig {
    /// Never zero, a zero period would make the timer spin
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}
