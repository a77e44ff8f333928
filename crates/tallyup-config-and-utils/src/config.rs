//! Configuration management for the session client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Default backend URL (can be overridden at compile time via TALLYUP_DEFAULT_BACKEND_URL).
pub const DEFAULT_BACKEND_URL: &str = match option_env!("TALLYUP_DEFAULT_BACKEND_URL") {
    Some(url) => url,
    None => "http://localhost:8000",
};

/// Default secure-store service name (can be overridden at compile time via TALLYUP_KEYCHAIN_SERVICE).
pub const DEFAULT_KEYCHAIN_SERVICE: &str = match option_env!("TALLYUP_KEYCHAIN_SERVICE") {
    Some(service) => service,
    None => "com.tallyup.app",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default OAuth provider segment of `/auth/authorize/{provider}`.
pub const DEFAULT_OAUTH_PROVIDER: &str = "google";

/// Default OAuth client id sent to the authorization endpoint.
pub const DEFAULT_OAUTH_CLIENT_ID: &str = "google";

/// Default loopback port for the OAuth redirect (0 = pick a free port).
pub const DEFAULT_REDIRECT_PORT: u16 = 0;

/// Default time to wait for the OAuth redirect, in seconds.
pub const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 120;

/// How the session is carried to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Bearer tokens held in the platform secure store.
    #[default]
    Native,
    /// http-only session cookies managed by the backend.
    Web,
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Platform::Native),
            "web" => Ok(Platform::Web),
            other => Err(CoreError::Config(format!("Unknown platform: {}", other))),
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend base URL hosting the `/auth/*` endpoints.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Session custody mode.
    #[serde(default)]
    pub platform: Platform,
    /// OAuth provider name.
    #[serde(default = "default_oauth_provider")]
    pub oauth_provider: String,
    /// OAuth client id.
    #[serde(default = "default_oauth_client_id")]
    pub oauth_client_id: String,
    /// OAuth scopes requested at the authorization endpoint.
    #[serde(default = "default_oauth_scopes")]
    pub oauth_scopes: Vec<String>,
    /// Loopback port for the redirect listener.
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,
    /// Seconds to wait for the OAuth redirect before giving up.
    #[serde(default = "default_oauth_timeout_secs")]
    pub oauth_timeout_secs: u64,
    /// Secure-store service name tokens are filed under.
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_oauth_provider() -> String {
    DEFAULT_OAUTH_PROVIDER.to_string()
}

fn default_oauth_client_id() -> String {
    DEFAULT_OAUTH_CLIENT_ID.to_string()
}

fn default_oauth_scopes() -> Vec<String> {
    vec!["openid".into(), "profile".into(), "email".into()]
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_oauth_timeout_secs() -> u64 {
    DEFAULT_OAUTH_TIMEOUT_SECS
}

fn default_keychain_service() -> String {
    DEFAULT_KEYCHAIN_SERVICE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend_url: default_backend_url(),
            platform: Platform::default(),
            oauth_provider: default_oauth_provider(),
            oauth_client_id: default_oauth_client_id(),
            oauth_scopes: default_oauth_scopes(),
            redirect_port: default_redirect_port(),
            oauth_timeout_secs: default_oauth_timeout_secs(),
            keychain_service: default_keychain_service(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(log_level) = env_value("TALLYUP_LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Some(url) = env_value("TALLYUP_BACKEND_URL").or_else(|| env_value("BACKEND_URL")) {
            self.backend_url = url;
        }

        if let Some(raw) = env_value("TALLYUP_PLATFORM") {
            match raw.parse() {
                Ok(platform) => self.platform = platform,
                Err(e) => tracing::warn!(error = %e, "Ignoring TALLYUP_PLATFORM"),
            }
        }
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> CoreResult<Url> {
        Url::parse(&self.backend_url).map_err(CoreError::from)
    }

    /// Backend URL without a trailing slash, ready for path concatenation.
    pub fn backend_base(&self) -> CoreResult<String> {
        let url = self.backend_url()?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
