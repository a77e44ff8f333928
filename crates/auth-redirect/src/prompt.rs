//! The authorization prompt seam.

use crate::RedirectResult;
use async_trait::async_trait;

/// An authorization code ready to be exchanged at the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    /// PKCE verifier bound to the code challenge sent with the request.
    pub code_verifier: Option<String>,
}

/// How an interactive authorization attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The provider redirected back with a code.
    Success(AuthorizationCode),
    /// The user dismissed consent or never completed the flow.
    Cancelled,
    /// The provider reported an error.
    Failed(String),
}

/// Drives the external, browser-based part of an OAuth code flow.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn authorize(&self) -> RedirectResult<PromptOutcome>;
}
