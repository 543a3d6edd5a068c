//! # Scanner Configuration
//!
//! Configuration for the visit endpoint, scan timing and the kiosk host.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STAMP_API_URL=https://api.example.org                              │
//! │     STAMP_SUPPRESS_MS=3000                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/passport/scanner.toml (Linux)                            │
//! │     ~/Library/Application Support/com.stamp.passport/scanner.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     http://localhost:3000, 2s suppression, 8 decodes/s                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # scanner.toml
//! [api]
//! base_url = "https://passport.example.org"
//! submit_timeout_secs = 30   # 0 = no client-side timeout
//!
//! [scanner]
//! suppress_after_error_ms = 2000
//! success_display_ms = 1500
//! max_decode_per_sec = 8
//!
//! [kiosk]
//! token_path = "/var/lib/stamp/token"
//! cameras_dir = "/var/lib/stamp/cameras"
//! frame_interval_ms = 100
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decode::MAX_DECODE_PER_SEC;
use crate::error::{ScannerError, ScannerResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where visits are submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Backend base URL. `/passport/visit` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Client-side request timeout (seconds). 0 disables it.
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_submit_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            submit_timeout_secs: default_submit_timeout(),
        }
    }
}

// =============================================================================
// Scanner Settings
// =============================================================================

/// Timing of the scan session itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Decode events are ignored for this long after a failed submission.
    #[serde(default = "default_suppress_ms")]
    pub suppress_after_error_ms: u64,

    /// How long the success message stays up before leaving the screen.
    #[serde(default = "default_success_display_ms")]
    pub success_display_ms: u64,

    /// Upper bound on decode attempts per second.
    #[serde(default = "default_max_decode_per_sec")]
    pub max_decode_per_sec: u32,

    /// Capacity of the controller's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_suppress_ms() -> u64 {
    2000
}

fn default_success_display_ms() -> u64 {
    1500
}

fn default_max_decode_per_sec() -> u32 {
    8
}

fn default_command_buffer() -> usize {
    32
}

impl Default for ScannerSettings {
    fn default() -> Self {
        ScannerSettings {
            suppress_after_error_ms: default_suppress_ms(),
            success_display_ms: default_success_display_ms(),
            max_decode_per_sec: default_max_decode_per_sec(),
            command_buffer: default_command_buffer(),
        }
    }
}

// =============================================================================
// Kiosk Settings
// =============================================================================

/// Host-specific paths, only read by the kiosk binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskSettings {
    /// File holding the bearer token.
    #[serde(default)]
    pub token_path: Option<PathBuf>,

    /// Directory with one sub-directory of still frames per camera.
    #[serde(default)]
    pub cameras_dir: Option<PathBuf>,

    /// Delay between replayed frames (milliseconds).
    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,
}

fn default_frame_interval() -> u64 {
    100
}

impl Default for KioskSettings {
    fn default() -> Self {
        KioskSettings {
            token_path: None,
            cameras_dir: None,
            frame_interval_ms: default_frame_interval(),
        }
    }
}

// =============================================================================
// Main Scanner Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub scanner: ScannerSettings,

    #[serde(default)]
    pub kiosk: KioskSettings,
}

impl ScanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (scanner.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ScannerResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading scanner config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load scanner config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ScannerResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ScannerError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ScannerError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| ScannerError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Scanner config saved");
        Ok(())
    }

    pub fn validate(&self) -> ScannerResult<()> {
        let url = url::Url::parse(&self.api.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ScannerError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.scanner.max_decode_per_sec == 0
            || self.scanner.max_decode_per_sec > MAX_DECODE_PER_SEC
        {
            return Err(ScannerError::InvalidConfig(format!(
                "max_decode_per_sec must be between 1 and {}, got: {}",
                MAX_DECODE_PER_SEC, self.scanner.max_decode_per_sec
            )));
        }

        if self.scanner.command_buffer == 0 {
            return Err(ScannerError::InvalidConfig(
                "command_buffer must be greater than 0".into(),
            ));
        }

        if self.kiosk.frame_interval_ms == 0 {
            return Err(ScannerError::InvalidConfig(
                "frame_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STAMP_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Ok(secs) = std::env::var("STAMP_SUBMIT_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.api.submit_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid STAMP_SUBMIT_TIMEOUT_SECS"),
            }
        }

        if let Ok(ms) = std::env::var("STAMP_SUPPRESS_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                debug!(ms, "Overriding suppression window from environment");
                self.scanner.suppress_after_error_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("STAMP_SUCCESS_DELAY_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.scanner.success_display_ms = ms;
            }
        }

        if let Ok(rate) = std::env::var("STAMP_MAX_DECODE_PER_SEC") {
            if let Ok(rate) = rate.parse::<u32>() {
                self.scanner.max_decode_per_sec = rate;
            }
        }

        if let Ok(path) = std::env::var("STAMP_TOKEN_PATH") {
            self.kiosk.token_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("STAMP_CAMERAS_DIR") {
            self.kiosk.cameras_dir = Some(PathBuf::from(path));
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stamp", "passport")
            .map(|dirs| dirs.config_dir().join("scanner.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Full URL of the visit endpoint.
    pub fn visit_url(&self) -> ScannerResult<url::Url> {
        let base = url::Url::parse(self.api.base_url.trim_end_matches('/'))?;
        let joined = format!("{}/passport/visit", base.as_str().trim_end_matches('/'));
        Ok(url::Url::parse(&joined)?)
    }

    pub fn submit_timeout(&self) -> Option<Duration> {
        match self.api.submit_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn suppress_window(&self) -> Duration {
        Duration::from_millis(self.scanner.suppress_after_error_ms)
    }

    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.scanner.success_display_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.kiosk.frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.scanner.suppress_after_error_ms, 2000);
        assert_eq!(config.scanner.success_display_ms, 1500);
        assert_eq!(config.submit_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScanConfig::default();

        config.api.base_url = "ws://localhost:3000".to_string();
        assert!(matches!(config.validate(), Err(ScannerError::InvalidUrl(_))));

        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.api.base_url = "https://passport.example.org".to_string();
        config.scanner.max_decode_per_sec = 0;
        assert!(matches!(config.validate(), Err(ScannerError::InvalidConfig(_))));

        config.scanner.max_decode_per_sec = 2000;
        assert!(matches!(config.validate(), Err(ScannerError::InvalidConfig(_))));

        config.scanner.max_decode_per_sec = MAX_DECODE_PER_SEC;
        assert!(config.validate().is_ok());

        config.scanner.max_decode_per_sec = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_visit_url() {
        let mut config = ScanConfig::default();
        config.api.base_url = "https://passport.example.org/api/".to_string();
        assert_eq!(
            config.visit_url().unwrap().as_str(),
            "https://passport.example.org/api/passport/visit"
        );
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut config = ScanConfig::default();
        config.api.submit_timeout_secs = 0;
        assert_eq!(config.submit_timeout(), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ScanConfig = toml::from_str(
            r#"
            [scanner]
            suppress_after_error_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.scanner.suppress_after_error_ms, 500);
        assert_eq!(config.scanner.max_decode_per_sec, 8);
        assert_eq!(config.api.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("stamp-scan-{}", uuid::Uuid::new_v4()))
            .join("scanner.toml");

        let mut config = ScanConfig::default();
        config.scanner.success_display_ms = 900;
        config.kiosk.cameras_dir = Some(PathBuf::from("/srv/cameras"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[api]"));
        assert!(contents.contains("[scanner]"));

        let loaded: ScanConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.scanner.success_display_ms, 900);
        assert_eq!(loaded.kiosk.cameras_dir, Some(PathBuf::from("/srv/cameras")));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
