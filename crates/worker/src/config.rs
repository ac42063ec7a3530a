use std::time::Duration;

use ocforge_backend::messages::ResolveSize;
use ocforge_core::archive::DEFAULT_ARCHIVE_CAPACITY;
use ocforge_core::error::CoreError;
use ocforge_core::generation::{DEFAULT_DESIGN_SHEET_LABEL, DEFAULT_DESIGN_SHEET_MODEL};
use ocforge_core::polling::{PollingPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use ocforge_pipeline::coordinator::CoordinatorConfig;
use ocforge_pipeline::submitter::SubmissionDefaults;

const DEFAULT_API_URL: &str = "http://localhost:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid polling configuration: {0}")]
    Polling(#[source] CoreError),
}

/// Worker configuration loaded from environment variables.
///
/// Every field has a default suitable for local development.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Base URL of the generation backend.
    pub generation_api_url: String,
    /// Base URL of the character persistence endpoint.
    pub character_api_url: String,
    pub archive_capacity: usize,
    pub coordinator: CoordinatorConfig,
}

impl StudioConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                         |
    /// |----------------------|---------------------------------|
    /// | `GENERATION_API_URL` | `http://localhost:3000`         |
    /// | `CHARACTER_API_URL`  | value of `GENERATION_API_URL`   |
    /// | `POLL_INTERVAL_MS`   | `3000`                          |
    /// | `POLL_MAX_ATTEMPTS`  | `100`                           |
    /// | `POLL_TIMEOUT_SECS`  | `600`                           |
    /// | `ARCHIVE_CAPACITY`   | `10`                            |
    /// | `DESIGN_SHEET_MODEL` | `google/nano-banana`            |
    /// | `DESIGN_SHEET_LABEL` | `Design Sheet`                  |
    /// | `RESOLVE_SIZE`       | `auto`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let generation_api_url = var("GENERATION_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let character_api_url = var("CHARACTER_API_URL").unwrap_or_else(|| generation_api_url.clone());

        let interval_ms: u64 = parse_or(
            var("POLL_INTERVAL_MS"),
            "POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )?;
        let max_attempts: u32 = parse_or(var("POLL_MAX_ATTEMPTS"), "POLL_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let timeout_secs: u64 = parse_or(
            var("POLL_TIMEOUT_SECS"),
            "POLL_TIMEOUT_SECS",
            DEFAULT_POLL_TIMEOUT.as_secs(),
        )?;

        let polling = PollingPolicy::fixed(Duration::from_millis(interval_ms))
            .with_max_attempts(max_attempts)
            .with_timeout(Duration::from_secs(timeout_secs));
        polling.validate().map_err(ConfigError::Polling)?;

        let archive_capacity: usize =
            parse_or(var("ARCHIVE_CAPACITY"), "ARCHIVE_CAPACITY", DEFAULT_ARCHIVE_CAPACITY)?;
        if archive_capacity == 0 {
            return Err(ConfigError::Invalid {
                var: "ARCHIVE_CAPACITY",
                value: "0".into(),
                expected: "a positive integer",
            });
        }

        let resolve_size = match var("RESOLVE_SIZE") {
            Some(raw) => raw.parse::<ResolveSize>().map_err(|_| ConfigError::Invalid {
                var: "RESOLVE_SIZE",
                value: raw,
                expected: "one of auto, desktop, mobile",
            })?,
            None => ResolveSize::default(),
        };

        let defaults = SubmissionDefaults {
            design_sheet_model: var("DESIGN_SHEET_MODEL")
                .unwrap_or_else(|| DEFAULT_DESIGN_SHEET_MODEL.into()),
            ..Default::default()
        };

        Ok(Self {
            generation_api_url,
            character_api_url,
            archive_capacity,
            coordinator: CoordinatorConfig {
                polling,
                defaults,
                resolve_size,
                design_sheet_label: var("DESIGN_SHEET_LABEL")
                    .unwrap_or_else(|| DEFAULT_DESIGN_SHEET_LABEL.into()),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value,
            expected: "a non-negative integer",
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<StudioConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StudioConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.generation_api_url, "http://localhost:3000");
        assert_eq!(config.character_api_url, "http://localhost:3000");
        assert_eq!(config.archive_capacity, 10);
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn character_url_follows_generation_url() {
        let config = load(&[("GENERATION_API_URL", "https://gen.example.com")]).unwrap();
        assert_eq!(config.character_api_url, "https://gen.example.com");

        let config = load(&[
            ("GENERATION_API_URL", "https://gen.example.com"),
            ("CHARACTER_API_URL", "https://chars.example.com"),
        ])
        .unwrap();
        assert_eq!(config.character_api_url, "https://chars.example.com");
    }

    #[test]
    fn polling_overrides() {
        let config = load(&[
            ("POLL_INTERVAL_MS", "500"),
            ("POLL_MAX_ATTEMPTS", "20"),
            ("POLL_TIMEOUT_SECS", "60"),
        ])
        .unwrap();
        let polling = &config.coordinator.polling;
        assert_eq!(polling.interval, Duration::from_millis(500));
        assert_eq!(polling.max_attempts, 20);
        assert_eq!(polling.timeout, Duration::from_secs(60));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("DESIGN_SHEET_LABEL", "  "), ("RESOLVE_SIZE", "")]).unwrap();
        assert_eq!(config.coordinator.design_sheet_label, "Design Sheet");
        assert_eq!(config.coordinator.resolve_size, ResolveSize::Auto);
    }

    #[test]
    fn design_sheet_settings() {
        let config = load(&[
            ("DESIGN_SHEET_MODEL", "acme/sheet-v2"),
            ("DESIGN_SHEET_LABEL", "Turnaround"),
            ("RESOLVE_SIZE", "desktop"),
        ])
        .unwrap();
        assert_eq!(config.coordinator.defaults.design_sheet_model, "acme/sheet-v2");
        assert_eq!(config.coordinator.design_sheet_label, "Turnaround");
        assert_eq!(config.coordinator.resolve_size, ResolveSize::Desktop);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("POLL_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "POLL_MAX_ATTEMPTS", .. });
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = load(&[("POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Polling(CoreError::Validation(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = load(&[("ARCHIVE_CAPACITY", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "ARCHIVE_CAPACITY", .. });
    }

    #[test]
    fn unknown_resolve_size_is_rejected() {
        let err = load(&[("RESOLVE_SIZE", "huge")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "RESOLVE_SIZE", value, .. } if value == "huge");
    }
}
