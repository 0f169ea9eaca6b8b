//! Timing Profiles
//!
//! Immutable bundles of the poll/timeout/attempt tunables. A dispatcher
//! captures one at construction and every wait it starts reads from that
//! copy, so switching profiles means building a dispatcher with another one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default timeout for joining a handle without an explicit timeout (30 seconds)
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 30_000;

/// Timeout for UI-loop condition waits shared by the stock profiles
pub const DEFAULT_UI_TIMEOUT_MS: u64 = 5_000;

/// Poll interval used by `wait_for_ui_condition`
pub const UI_CONDITION_SLEEP_MS: u64 = 10;

/// Name of a stock profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileName {
    /// Balanced defaults
    #[default]
    Default,
    /// No sleeping, fewest attempts
    Aggressive,
    /// More attempts and timing traces
    Debug,
    /// Hand-built profile
    Custom,
}

impl ProfileName {
    /// Get the profile name string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Aggressive => "aggressive",
            Self::Debug => "debug",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "aggressive" => Ok(Self::Aggressive),
            "debug" => Ok(Self::Debug),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown timing profile: {other}")),
        }
    }
}

/// Tunables consumed by the dispatcher and the condition waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingProfile {
    /// Which profile this is
    pub name: ProfileName,
    /// Sleep between predicate polls on the calling thread
    pub condition_sleep_ms: u64,
    /// Sleep between UI-loop round trips while waiting for idle
    pub background_sleep_ms: u64,
    /// UI-loop turns to let pass when waiting for idle
    pub attempts: u32,
    /// Render pulses to let pass when waiting for idle
    pub pulses: u32,
    /// Timeout for UI-loop condition waits
    pub ui_timeout_ms: u64,
    /// Timeout for joining a handle without an explicit timeout
    pub join_timeout_ms: u64,
    /// Emit timing traces for every wait
    pub trace_timing: bool,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self::default_profile()
    }
}

impl TimingProfile {
    /// The default profile
    #[must_use]
    pub const fn default_profile() -> Self {
        Self {
            name: ProfileName::Default,
            condition_sleep_ms: 10,
            background_sleep_ms: 10,
            attempts: 5,
            pulses: 2,
            ui_timeout_ms: DEFAULT_UI_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            trace_timing: false,
        }
    }

    /// The aggressive profile: never sleeps
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            name: ProfileName::Aggressive,
            condition_sleep_ms: 0,
            background_sleep_ms: 0,
            attempts: 2,
            pulses: 1,
            ui_timeout_ms: DEFAULT_UI_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            trace_timing: false,
        }
    }

    /// The debug profile: more attempts, timing traces on
    #[must_use]
    pub const fn debug() -> Self {
        Self {
            name: ProfileName::Debug,
            condition_sleep_ms: 10,
            background_sleep_ms: 10,
            attempts: 10,
            pulses: 5,
            ui_timeout_ms: DEFAULT_UI_TIMEOUT_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            trace_timing: true,
        }
    }

    /// Look up a stock profile by name; `Custom` yields the defaults
    #[must_use]
    pub const fn named(name: ProfileName) -> Self {
        match name {
            ProfileName::Default | ProfileName::Custom => Self::default_profile(),
            ProfileName::Aggressive => Self::aggressive(),
            ProfileName::Debug => Self::debug(),
        }
    }

    /// Set the predicate poll interval
    #[must_use]
    pub const fn with_condition_sleep(mut self, ms: u64) -> Self {
        self.condition_sleep_ms = ms;
        self.name = ProfileName::Custom;
        self
    }

    /// Set the UI round-trip sleep
    #[must_use]
    pub const fn with_background_sleep(mut self, ms: u64) -> Self {
        self.background_sleep_ms = ms;
        self.name = ProfileName::Custom;
        self
    }

    /// Set the number of UI-loop turns
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.name = ProfileName::Custom;
        self
    }

    /// Set the number of render pulses
    #[must_use]
    pub const fn with_pulses(mut self, pulses: u32) -> Self {
        self.pulses = pulses;
        self.name = ProfileName::Custom;
        self
    }

    /// Set the UI-loop wait timeout
    #[must_use]
    pub const fn with_ui_timeout(mut self, ms: u64) -> Self {
        self.ui_timeout_ms = ms;
        self.name = ProfileName::Custom;
        self
    }

    /// Set the default join timeout
    #[must_use]
    pub const fn with_join_timeout(mut self, ms: u64) -> Self {
        self.join_timeout_ms = ms;
        self.name = ProfileName::Custom;
        self
    }

    /// Enable or disable timing traces
    #[must_use]
    pub const fn with_trace_timing(mut self, enabled: bool) -> Self {
        self.trace_timing = enabled;
        self
    }

    /// Predicate poll interval as Duration
    #[must_use]
    pub const fn condition_sleep(&self) -> Duration {
        Duration::from_millis(self.condition_sleep_ms)
    }

    /// UI round-trip sleep as Duration
    #[must_use]
    pub const fn background_sleep(&self) -> Duration {
        Duration::from_millis(self.background_sleep_ms)
    }

    /// UI-loop wait timeout as Duration
    #[must_use]
    pub const fn ui_timeout(&self) -> Duration {
        Duration::from_millis(self.ui_timeout_ms)
    }

    /// Default join timeout as Duration
    #[must_use]
    pub const fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
