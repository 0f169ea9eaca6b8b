//! Dispatcher configuration
//!
//! Loadable from YAML or JSON, or picked by name from `PROBAR_ASYNC_PROFILE`.
//!
//! ```yaml
//! profile: aggressive
//! auto_check_failures: true
//! print_failures_on_occurrence: false
//! pool:
//!   thread_name_prefix: my-pool
//! ```

use crate::pool::PoolConfig;
use crate::result::{AsyncError, AsyncResult};
use crate::timing::{ProfileName, TimingProfile};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable naming the stock timing profile
pub const PROFILE_ENV: &str = "PROBAR_ASYNC_PROFILE";

/// Everything needed to build a [`Dispatcher`](crate::Dispatcher)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Stock timing profile
    pub profile: ProfileName,
    /// Full timing override; wins over `profile` when present
    pub timing: Option<TimingProfile>,
    /// Surface a stale failure before every dispatch
    pub auto_check_failures: bool,
    /// Report failures as soon as they are staged
    pub print_failures_on_occurrence: bool,
    /// Funnel panics from every thread into the failure registry
    pub check_all_thread_failures: bool,
    /// Background pool settings
    pub pool: PoolConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            profile: ProfileName::Default,
            timing: None,
            auto_check_failures: true,
            print_failures_on_occurrence: true,
            check_all_thread_failures: false,
            pool: PoolConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Parse from YAML
    pub fn from_yaml_str(yaml: &str) -> AsyncResult<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> AsyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a `.yaml`, `.yml` or `.json` file
    pub fn from_path(path: &Path) -> AsyncResult<Self> {
        let text = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(AsyncError::Config {
                message: format!(
                    "unsupported config file extension: {}",
                    path.display()
                ),
            }),
        }
    }

    /// Defaults with the profile named by `PROBAR_ASYNC_PROFILE`, if set
    pub fn from_env() -> AsyncResult<Self> {
        match std::env::var(PROFILE_ENV) {
            Ok(name) => Self::default().with_profile_name(&name),
            Err(_) => Ok(Self::default()),
        }
    }

    fn with_profile_name(mut self, name: &str) -> AsyncResult<Self> {
        self.profile = name
            .parse()
            .map_err(|message| AsyncError::Config { message })?;
        Ok(self)
    }

    /// Select a stock profile
    #[must_use]
    pub fn with_profile(mut self, profile: ProfileName) -> Self {
        self.profile = profile;
        self
    }

    /// Use a fully custom timing profile
    #[must_use]
    pub fn with_timing(mut self, timing: TimingProfile) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Set auto-check of stale failures
    #[must_use]
    pub fn with_auto_check_failures(mut self, enabled: bool) -> Self {
        self.auto_check_failures = enabled;
        self
    }

    /// Set reporting on occurrence
    #[must_use]
    pub fn with_print_failures_on_occurrence(mut self, enabled: bool) -> Self {
        self.print_failures_on_occurrence = enabled;
        self
    }

    /// Set funnelling of every thread's panics
    #[must_use]
    pub fn with_check_all_thread_failures(mut self, enabled: bool) -> Self {
        self.check_all_thread_failures = enabled;
        self
    }

    /// Set pool settings
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// The timing profile this config selects
    #[must_use]
    pub fn timing_profile(&self) -> TimingProfile {
        self.timing
            .unwrap_or_else(|| TimingProfile::named(self.profile))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io::Write;

    mod defaults_tests {
        use super::*;

        #[test]
        fn test_default_flags() {
            let config = DispatcherConfig::default();
            assert!(config.auto_check_failures);
            assert!(config.print_failures_on_occurrence);
            assert!(!config.check_all_thread_failures);
            assert_eq!(config.timing_profile(), TimingProfile::default_profile());
        }

        #[test]
        fn test_timing_override_wins() {
            let custom = TimingProfile::aggressive().with_attempts(9);
            let config = DispatcherConfig::default()
                .with_profile(ProfileName::Debug)
                .with_timing(custom);
            assert_eq!(config.timing_profile(), custom);
        }

        #[test]
        fn test_profile_name_selects_stock_profile() {
            let config = DispatcherConfig::default().with_profile(ProfileName::Aggressive);
            assert_eq!(config.timing_profile(), TimingProfile::aggressive());
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_from_yaml() {
            let yaml = "profile: debug\nprint_failures_on_occurrence: false\npool:\n  max_threads: 4\n";
            let config = DispatcherConfig::from_yaml_str(yaml).unwrap();
            assert_eq!(config.profile, ProfileName::Debug);
            assert!(!config.print_failures_on_occurrence);
            assert!(config.auto_check_failures);
            assert_eq!(config.pool.max_threads, 4);
            assert_eq!(config.pool.thread_name_prefix, "probar-async-pool-thread");
        }

        #[test]
        fn test_from_json_with_timing() {
            let json = r#"{"timing":{"condition_sleep_ms":1,"ui_timeout_ms":250}}"#;
            let config = DispatcherConfig::from_json_str(json).unwrap();
            let timing = config.timing_profile();
            assert_eq!(timing.condition_sleep_ms, 1);
            assert_eq!(timing.ui_timeout_ms, 250);
            assert_eq!(timing.attempts, 5);
        }

        #[test]
        fn test_bad_yaml_is_yaml_error() {
            let err = DispatcherConfig::from_yaml_str("profile: [").unwrap_err();
            assert!(matches!(err, AsyncError::Yaml(_)));
        }

        #[test]
        fn test_unknown_profile_name_is_config_error() {
            let err = DispatcherConfig::default()
                .with_profile_name("turbo")
                .unwrap_err();
            assert!(matches!(err, AsyncError::Config { .. }));
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_from_yaml_file() {
            let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
            writeln!(file, "profile: aggressive").unwrap();
            let config = DispatcherConfig::from_path(file.path()).unwrap();
            assert_eq!(config.profile, ProfileName::Aggressive);
        }

        #[test]
        fn test_from_json_file() {
            let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
            writeln!(file, r#"{{"check_all_thread_failures": true}}"#).unwrap();
            let config = DispatcherConfig::from_path(file.path()).unwrap();
            assert!(config.check_all_thread_failures);
        }

        #[test]
        fn test_unknown_extension() {
            let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
            let err = DispatcherConfig::from_path(file.path()).unwrap_err();
            assert!(matches!(err, AsyncError::Config { .. }));
        }

        #[test]
        fn test_missing_file_is_io_error() {
            let dir = tempfile::tempdir().unwrap();
            let err = DispatcherConfig::from_path(&dir.path().join("nope.yaml")).unwrap_err();
            assert!(matches!(err, AsyncError::Io(_)));
        }
    }
}
