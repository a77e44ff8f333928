//! OAuth authorization-code redirect flow.
//!
//! This crate provides:
//! - PKCE (RFC 7636) verifier/challenge helpers
//! - The [`AuthorizationPrompt`] seam the session manager drives on sign-in
//! - [`LoopbackRedirectFlow`], a browser + localhost callback implementation

mod error;
mod loopback;
pub mod pkce;
mod prompt;

pub use error::{RedirectError, RedirectResult};
pub use loopback::{LoopbackRedirectFlow, RedirectConfig, UrlOpener};
pub use prompt::{AuthorizationCode, AuthorizationPrompt, PromptOutcome};
