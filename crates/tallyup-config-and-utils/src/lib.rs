//! Configuration, paths, and logging shared by the Tallyup session crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, Platform, DEFAULT_BACKEND_URL, DEFAULT_KEYCHAIN_SERVICE, DEFAULT_LOG_LEVEL,
    DEFAULT_OAUTH_CLIENT_ID, DEFAULT_OAUTH_PROVIDER, DEFAULT_OAUTH_TIMEOUT_SECS,
    DEFAULT_REDIRECT_PORT,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_with_path, parse_level};
pub use paths::Paths;
