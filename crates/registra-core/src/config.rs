//! Configuration management for Registra.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. The configuration is built once at
//! startup and handed to every component; nothing else reads the process
//! environment.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on attempts per query request.
pub const MAX_ATTEMPTS_CEILING: u32 = 5;

/// Main application configuration.
///
/// This is loaded from `~/.config/registra/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Query engine and retry settings
    pub engine: EngineConfig,
    /// External captcha solving service settings
    pub solver: SolverConfig,
    /// Transport (HTTP or headless browser) settings
    pub transport: TransportConfig,
    /// Portal definition settings
    pub portals: PortalsConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &std::path::Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `REGISTRA_SOLVER_API_KEY`: Solver service API key
    /// - `REGISTRA_TRANSPORT`: Transport kind (`http` or `browser`)
    /// - `REGISTRA_MAX_ATTEMPTS`: Override attempt bound
    /// - `REGISTRA_PORTALS_DIR`: Override portal definitions directory
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `REGISTRA_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REGISTRA_SOLVER_API_KEY") {
            if !val.trim().is_empty() {
                self.solver.api_key = Some(val.trim().to_string());
                tracing::debug!("Override solver.api_key from env");
            }
        }

        if let Ok(val) = std::env::var("REGISTRA_TRANSPORT") {
            match val.trim().to_ascii_lowercase().as_str() {
                "http" => self.transport.kind = TransportKind::Http,
                "browser" => self.transport.kind = TransportKind::Browser,
                other => tracing::warn!("Ignoring unknown REGISTRA_TRANSPORT value: {}", other),
            }
        }

        if let Ok(val) = std::env::var("REGISTRA_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.engine.max_attempts = attempts;
                tracing::debug!("Override engine.max_attempts from env: {}", attempts);
            }
        }

        if let Ok(val) = std::env::var("REGISTRA_PORTALS_DIR") {
            self.portals.definitions_dir = Some(PathBuf::from(val));
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.max_attempts == 0 || self.engine.max_attempts > MAX_ATTEMPTS_CEILING {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_attempts".to_string(),
                reason: format!(
                    "must be 1-{MAX_ATTEMPTS_CEILING}, got {}",
                    self.engine.max_attempts
                ),
            });
        }

        let timeouts = [
            ("engine.attempt_timeout_secs", self.engine.attempt_timeout_secs),
            ("engine.request_timeout_secs", self.engine.request_timeout_secs),
            ("engine.session_timeout_secs", self.engine.session_timeout_secs),
            ("engine.challenge_wait_secs", self.engine.challenge_wait_secs),
            ("engine.challenge_poll_interval_ms", self.engine.challenge_poll_interval_ms),
            ("engine.result_wait_secs", self.engine.result_wait_secs),
            ("solver.poll_interval_secs", self.solver.poll_interval_secs),
            ("solver.image_timeout_secs", self.solver.image_timeout_secs),
            ("solver.widget_timeout_secs", self.solver.widget_timeout_secs),
            ("transport.timeout_secs", self.transport.timeout_secs),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.engine.request_timeout_secs < self.engine.attempt_timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "engine.request_timeout_secs".to_string(),
                reason: "must not be shorter than engine.attempt_timeout_secs".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist. The solver API key
    /// is never written.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/registra/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("org", "registra", "registra").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

/// Query engine and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum attempts per query request (1-5)
    pub max_attempts: u32,
    /// Base backoff between attempts; grows linearly with the attempt number
    pub retry_base_delay_ms: u64,
    /// Deadline for one full attempt
    pub attempt_timeout_secs: u64,
    /// Deadline for the whole request across attempts
    pub request_timeout_secs: u64,
    /// Deadline for opening a session
    pub session_timeout_secs: u64,
    /// How long to wait for a challenge that is present but not yet loaded
    pub challenge_wait_secs: u64,
    /// Poll interval while waiting for a challenge to load
    pub challenge_poll_interval_ms: u64,
    /// How long to wait for a client-rendered result page to settle
    pub result_wait_secs: u64,
    /// Extra attempts allowed after a solver service error
    pub solver_error_retries: u32,
    /// Extra attempts allowed after a missing selector / changed site
    pub site_changed_retries: u32,
}

impl EngineConfig {
    /// Backoff before `attempt` (1-based attempt that just failed).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Per-attempt deadline.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Whole-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Session open deadline.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Challenge load wait.
    #[must_use]
    pub fn challenge_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_wait_secs)
    }

    /// Challenge load poll interval.
    #[must_use]
    pub fn challenge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.challenge_poll_interval_ms)
    }

    /// Result settle wait.
    #[must_use]
    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 3000,
            attempt_timeout_secs: 420,
            request_timeout_secs: 1500,
            session_timeout_secs: 30,
            challenge_wait_secs: 10,
            challenge_poll_interval_ms: 500,
            result_wait_secs: 15,
            solver_error_retries: 1,
            site_changed_retries: 1,
        }
    }
}

/// External captcha solving service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Service protocol: currently `2captcha`
    pub provider: String,
    /// Service base URL
    pub base_url: String,
    /// API key (environment only, never serialized)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Delay between result polls
    pub poll_interval_secs: u64,
    /// Ceiling for image challenges
    pub image_timeout_secs: u64,
    /// Ceiling for widget challenges
    pub widget_timeout_secs: u64,
    /// Wait before the first poll of an image job
    pub image_initial_delay_secs: u64,
    /// Wait before the first poll of a widget job
    pub widget_initial_delay_secs: u64,
    /// Report answers the portal rejected back to the service
    pub report_incorrect: bool,
}

impl SolverConfig {
    /// Poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            provider: "2captcha".to_string(),
            base_url: "https://2captcha.com".to_string(),
            api_key: None,
            poll_interval_secs: 2,
            image_timeout_secs: 30,
            widget_timeout_secs: 300,
            image_initial_delay_secs: 5,
            widget_initial_delay_secs: 15,
            report_incorrect: true,
        }
    }
}

/// Which transport drives the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Plain HTTP with a per-session cookie jar
    Http,
    /// Headless Chromium
    Browser,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport kind
    pub kind: TransportKind,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Fixed user agent; a randomized desktop fingerprint is used when unset
    pub user_agent: Option<String>,
    /// Accept invalid TLS certificates (some legacy portals ship broken chains)
    pub accept_invalid_certs: bool,
    /// Run the browser in headless mode
    pub headless: bool,
    /// Maximum redirects followed per request
    pub max_redirects: usize,
}

impl TransportConfig {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Http,
            timeout_secs: 30,
            user_agent: None,
            accept_invalid_certs: false,
            headless: true,
            max_redirects: 10,
        }
    }
}

/// Portal definition settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalsConfig {
    /// Directory holding portal definition TOML files
    pub definitions_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.solver.provider, "2captcha");
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert!(config.solver.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_delay_grows_with_attempt() {
        let engine = EngineConfig::default();
        assert_eq!(engine.retry_delay(1), Duration::from_secs(3));
        assert_eq!(engine.retry_delay(2), Duration::from_secs(6));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = AppConfig::default();
        config.solver.api_key = Some("secret-key".to_string());
        let toml_str = toml::to_string_pretty(&config).expect("serialize config");
        assert!(!toml_str.contains("secret-key"));
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[solver]"));
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.engine.max_attempts = 2;
        config.transport.kind = TransportKind::Browser;
        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.engine.max_attempts, 2);
        assert_eq!(loaded.transport.kind, TransportKind::Browser);
    }

    #[test]
    fn test_validate_rejects_bad_attempt_bound() {
        let mut config = AppConfig::default();
        config.engine.max_attempts = 0;
        assert!(config.validate().is_err());

        config.engine.max_attempts = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.solver.poll_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("solver.poll_interval_secs"));
    }

    #[test]
    fn test_validate_rejects_zero_wait_settings() {
        let cases: [(&str, fn(&mut EngineConfig)); 3] = [
            ("engine.challenge_poll_interval_ms", |e| e.challenge_poll_interval_ms = 0),
            ("engine.challenge_wait_secs", |e| e.challenge_wait_secs = 0),
            ("engine.result_wait_secs", |e| e.result_wait_secs = 0),
        ];
        for (field, zero) in cases {
            let mut config = AppConfig::default();
            zero(&mut config.engine);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[engine]
max_attempts = 4

[transport]
kind = "browser"
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.engine.max_attempts, 4);
        assert_eq!(config.transport.kind, TransportKind::Browser);
        // These should be defaults
        assert_eq!(config.engine.retry_base_delay_ms, 3000);
        assert_eq!(config.solver.widget_timeout_secs, 300);
    }
}
