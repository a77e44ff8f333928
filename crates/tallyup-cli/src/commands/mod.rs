//! CLI command implementations.

mod auth;
mod fetch;

pub use auth::{login, logout, refresh, status};
pub use fetch::fetch;

use anyhow::{Context, Result};
use auth_redirect::{LoopbackRedirectFlow, RedirectConfig};
use hange::{carrier_for_platform, BackendEndpoints, ReqwestTransport, Session};
use std::sync::Arc;
use std::time::Duration;
use tallyup_config_and_utils::{init_logging, Config, Paths, Platform};
use tallyup_storage::{create_token_store, MemoryStorage, TokenStore};
use tracing::debug;

/// Resolved configuration for one CLI invocation.
pub struct CommandContext {
    config: Config,
}

impl CommandContext {
    /// Load the config file, apply flag overrides, and start logging.
    pub fn load(log_level: Option<&str>, platform: Option<Platform>) -> Result<Self> {
        let paths = Paths::new()?;
        let mut config = Config::load(&paths).context("Failed to load config")?;

        if let Some(level) = log_level {
            config.log_level = level.to_string();
        }
        if let Some(platform) = platform {
            config.platform = platform;
        }

        init_logging(&config.log_level);
        debug!(
            platform = ?config.platform,
            backend_url = %config.backend_url,
            "CLI config loaded"
        );

        Ok(Self { config })
    }

    /// Build a session for the configured platform.
    ///
    /// `provider` overrides the configured OAuth provider for sign-in.
    pub fn session(&self, provider: Option<&str>) -> Result<Session> {
        let base = self.config.backend_base()?;
        let store = self.token_store()?;
        let carrier = carrier_for_platform(self.config.platform, store);
        let transport = Arc::new(ReqwestTransport::new()?);
        let prompt = Arc::new(LoopbackRedirectFlow::new(self.redirect_config(&base, provider)));

        Ok(Session::new(
            carrier,
            transport,
            prompt,
            BackendEndpoints::new(base),
        ))
    }

    fn token_store(&self) -> Result<TokenStore> {
        match self.config.platform {
            Platform::Native => create_token_store(&self.config.keychain_service)
                .context("Secure storage is unavailable"),
            // Web custody lives in cookies; nothing is written to the keychain.
            Platform::Web => Ok(TokenStore::new(Arc::new(MemoryStorage::new()))),
        }
    }

    fn redirect_config(&self, base: &str, provider: Option<&str>) -> RedirectConfig {
        let provider = provider.unwrap_or(&self.config.oauth_provider);
        let mut redirect = RedirectConfig::for_backend(base, provider);
        if provider == self.config.oauth_provider {
            redirect.client_id = self.config.oauth_client_id.clone();
        }
        redirect.scopes = self.config.oauth_scopes.clone();
        redirect.port = self.config.redirect_port;
        redirect.timeout = Duration::from_secs(self.config.oauth_timeout_secs);
        redirect
    }

    pub fn platform(&self) -> Platform {
        self.config.platform
    }
}
