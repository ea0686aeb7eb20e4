//! Configuration file parser for ~/.config/smartmarks/config.toml.
//!
//! The config file is optional. A missing file yields `Config::default()`;
//! the backend URL and key may then come from `SUPABASE_URL` and
//! `SUPABASE_ANON_KEY`, which take precedence over the file when set.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::util::{validate_backend_url, UrlValidationError};

/// Environment variable holding the backend base URL.
pub const ENV_BACKEND_URL: &str = "SUPABASE_URL";
/// Environment variable holding the backend's public API key.
pub const ENV_BACKEND_KEY: &str = "SUPABASE_ANON_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A required setting is absent from both the environment and the file.
    #[error("Missing {setting}: set {env_var} or `{key}` in the config file")]
    MissingSetting {
        setting: &'static str,
        env_var: &'static str,
        key: &'static str,
    },

    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(UrlValidationError),

    #[error("Backend URL must use HTTPS (plain HTTP is only allowed for localhost): {0}")]
    InsecureBackendUrl(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL (alternative to `SUPABASE_URL`).
    pub backend_url: Option<String>,

    /// Backend public API key (alternative to `SUPABASE_ANON_KEY`).
    pub backend_key: Option<String>,

    /// Loopback port the OAuth provider redirects back to.
    pub callback_port: u16,

    /// OAuth provider name passed to the backend.
    pub oauth_provider: String,

    /// Per-request timeout for backend HTTP calls.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_key: None,
            callback_port: 54321,
            oauth_provider: "google".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend_url", &self.backend_url)
            .field(
                "backend_key",
                &self.backend_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("callback_port", &self.callback_port)
            .field("oauth_provider", &self.oauth_provider)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Resolved connection settings for the backend.
pub struct BackendSettings {
    /// Base URL, always ending in `/` so service paths join beneath it.
    pub url: Url,
    pub api_key: SecretString,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSettings")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "backend_url",
        "backend_key",
        "callback_port",
        "oauth_provider",
        "request_timeout_secs",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            callback_port = config.callback_port,
            provider = %config.oauth_provider,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Merge the environment over the file and validate the backend settings.
    pub fn backend_settings(&self) -> Result<BackendSettings, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Like [`Config::backend_settings`], reading variables through `env`.
    pub fn resolve_with<F>(&self, env: F) -> Result<BackendSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |var: &str, file: &Option<String>| {
            env(var)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| file.clone().filter(|v| !v.trim().is_empty()))
                .map(|v| v.trim().to_string())
        };

        let raw_url = pick(ENV_BACKEND_URL, &self.backend_url).ok_or(
            ConfigError::MissingSetting {
                setting: "backend URL",
                env_var: ENV_BACKEND_URL,
                key: "backend_url",
            },
        )?;
        let api_key = pick(ENV_BACKEND_KEY, &self.backend_key).ok_or(
            ConfigError::MissingSetting {
                setting: "backend API key",
                env_var: ENV_BACKEND_KEY,
                key: "backend_key",
            },
        )?;

        let mut url = validate_backend_url(&raw_url).map_err(|e| match e {
            UrlValidationError::Insecure(u) => ConfigError::InsecureBackendUrl(u),
            other => ConfigError::InvalidBackendUrl(other),
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(BackendSettings {
            url,
            api_key: SecretString::from(api_key),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        })
    }
}

impl BackendSettings {
    /// Hostname shown in the UI; never includes the key.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("smartmarks_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.callback_port, 54321);
        assert_eq!(config.oauth_provider, "google");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.backend_url.is_none());
        assert!(config.backend_key.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/smartmarks_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.callback_port, 54321);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.oauth_provider, "google");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "callback_port = 8765\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.callback_port, 8765);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml_and_wrong_type() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        let path = write_config("wrongtype", "callback_port = \"high\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "oauth_provider = \"github\"\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.oauth_provider, "github");
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = Config {
            backend_key: Some("super-secret-key-12345".to_string()),
            ..Config::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_env_takes_precedence_over_file() {
        let config = Config {
            backend_url: Some("https://file.example.com".to_string()),
            backend_key: Some("file-key".to_string()),
            ..Config::default()
        };
        let settings = config
            .resolve_with(env_of(&[
                (ENV_BACKEND_URL, "https://env.example.com"),
                (ENV_BACKEND_KEY, "env-key"),
            ]))
            .unwrap();
        assert_eq!(settings.url.as_str(), "https://env.example.com/");
        assert_eq!(settings.api_key.expose_secret(), "env-key");
    }

    #[test]
    fn test_file_used_when_env_absent_or_blank() {
        let config = Config {
            backend_url: Some("https://file.example.com/base".to_string()),
            backend_key: Some("file-key".to_string()),
            request_timeout_secs: 5,
            ..Config::default()
        };
        let settings = config
            .resolve_with(env_of(&[(ENV_BACKEND_URL, "  ")]))
            .unwrap();
        assert_eq!(settings.url.as_str(), "https://file.example.com/base/");
        assert_eq!(settings.host(), "file.example.com");
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_settings_are_fatal() {
        let err = Config::default().resolve_with(env_of(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSetting { key: "backend_url", .. }
        ));

        let err = Config::default()
            .resolve_with(env_of(&[(ENV_BACKEND_URL, "https://x.example.com")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingSetting { key: "backend_key", .. }
        ));
        assert!(err.to_string().contains(ENV_BACKEND_KEY));
    }

    #[test]
    fn test_insecure_backend_rejected() {
        let err = Config::default()
            .resolve_with(env_of(&[
                (ENV_BACKEND_URL, "http://project.example.com"),
                (ENV_BACKEND_KEY, "k"),
            ]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InsecureBackendUrl(_)));

        let settings = Config::default()
            .resolve_with(env_of(&[
                (ENV_BACKEND_URL, "http://localhost:54321"),
                (ENV_BACKEND_KEY, "k"),
            ]))
            .unwrap();
        assert_eq!(settings.url.as_str(), "http://localhost:54321/");
    }

    #[test]
    fn test_settings_debug_redacted() {
        let settings = Config::default()
            .resolve_with(env_of(&[
                (ENV_BACKEND_URL, "https://x.example.com"),
                (ENV_BACKEND_KEY, "very-secret"),
            ]))
            .unwrap();
        assert!(!format!("{:?}", settings).contains("very-secret"));
    }
}
