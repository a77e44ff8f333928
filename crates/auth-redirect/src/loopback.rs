//! Browser + localhost callback implementation of the redirect flow.

use crate::pkce::{compute_code_challenge, generate_code_verifier, generate_state};
use crate::{
    AuthorizationCode, AuthorizationPrompt, PromptOutcome, RedirectError, RedirectResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

/// Default OAuth timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Provider error code for a user who declined consent.
const ACCESS_DENIED: &str = "access_denied";

/// Opens the authorization URL for the user.
pub type UrlOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Where and how to ask for authorization.
#[derive(Debug, Clone)]
pub struct RedirectConfig {
    /// Full authorization endpoint, e.g. `{backend}/auth/authorize/google`.
    pub authorize_url: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Loopback port for the callback; 0 picks a free port.
    pub port: u16,
    pub timeout: Duration,
}

impl RedirectConfig {
    /// Configuration for the backend's `/auth/authorize/{provider}` endpoint.
    pub fn for_backend(backend_base: &str, provider: &str) -> Self {
        Self {
            authorize_url: format!(
                "{}/auth/authorize/{}",
                backend_base.trim_end_matches('/'),
                provider
            ),
            client_id: provider.to_string(),
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            port: 0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Runs the authorization code flow through the system browser and a
/// one-shot HTTP listener on 127.0.0.1.
pub struct LoopbackRedirectFlow {
    config: RedirectConfig,
    opener: UrlOpener,
}

impl LoopbackRedirectFlow {
    /// Create a flow that opens the system browser.
    pub fn new(config: RedirectConfig) -> Self {
        Self::with_opener(config, Arc::new(|url: &str| open::that(url)))
    }

    /// Create a flow with a custom way of presenting the authorization URL.
    pub fn with_opener(config: RedirectConfig, opener: UrlOpener) -> Self {
        Self { config, opener }
    }

    /// Build the authorization URL for a given redirect target and PKCE challenge.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        code_challenge: &str,
        state: &str,
    ) -> RedirectResult<Url> {
        let scope = self.config.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )?;
        Ok(url)
    }

    /// Serve connections until one hits `/callback`.
    async fn wait_for_callback(
        &self,
        listener: &TcpListener,
        expected_state: &str,
        code_verifier: &str,
    ) -> RedirectResult<PromptOutcome> {
        loop {
            let (mut socket, peer) = listener.accept().await?;
            debug!(peer = %peer, "Callback connection accepted");

            match read_callback_query(&mut socket).await? {
                Some(params) => {
                    let outcome = outcome_from_params(&params, expected_state, code_verifier);
                    let page = match &outcome {
                        PromptOutcome::Success(_) => success_page(),
                        PromptOutcome::Cancelled => error_page("Sign in was cancelled"),
                        PromptOutcome::Failed(reason) => error_page(reason),
                    };
                    send_response(&mut socket, 200, "OK", &page).await?;
                    return Ok(outcome);
                }
                None => {
                    send_response(&mut socket, 404, "Not Found", "Not Found").await?;
                }
            }
        }
    }
}

#[async_trait]
impl AuthorizationPrompt for LoopbackRedirectFlow {
    async fn authorize(&self) -> RedirectResult<PromptOutcome> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RedirectError::Bind { addr, source })?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);

        let code_verifier = generate_code_verifier();
        let state = generate_state();
        let url = self.authorization_url(
            &redirect_uri,
            &compute_code_challenge(&code_verifier),
            &state,
        )?;

        info!(port, "Waiting for OAuth redirect");
        if let Err(e) = (self.opener)(url.as_str()) {
            warn!(error = %e, url = %url, "Could not open browser, open the URL manually");
        }

        match tokio::time::timeout(
            self.config.timeout,
            self.wait_for_callback(&listener, &state, &code_verifier),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                info!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "OAuth redirect not received, treating as cancelled"
                );
                Ok(PromptOutcome::Cancelled)
            }
        }
    }
}

/// Map callback query parameters to an outcome.
fn outcome_from_params(
    params: &HashMap<String, String>,
    expected_state: &str,
    code_verifier: &str,
) -> PromptOutcome {
    if let Some(error) = params.get("error") {
        if error == ACCESS_DENIED {
            return PromptOutcome::Cancelled;
        }
        return match params.get("error_description") {
            Some(description) => PromptOutcome::Failed(format!("{}: {}", error, description)),
            None => PromptOutcome::Failed(error.clone()),
        };
    }

    if params.get("state").map(String::as_str) != Some(expected_state) {
        warn!("OAuth callback state mismatch");
        return PromptOutcome::Failed("state mismatch".to_string());
    }

    match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => PromptOutcome::Success(AuthorizationCode {
            code: code.clone(),
            code_verifier: Some(code_verifier.to_string()),
        }),
        None => PromptOutcome::Failed("Missing authorization code".to_string()),
    }
}

/// Read the request line; returns the query parameters for `GET /callback`,
/// `None` for any other request.
async fn read_callback_query(
    socket: &mut TcpStream,
) -> RedirectResult<Option<HashMap<String, String>>> {
    let mut reader = BufReader::new(socket);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    debug!(request = %request_line.trim(), "Received request");

    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };

    // Only the path and query matter; the base is a placeholder.
    let Ok(url) = Url::parse("http://127.0.0.1").and_then(|base| base.join(target)) else {
        return Ok(None);
    };
    if url.path() != "/callback" {
        return Ok(None);
    }

    Ok(Some(url.query_pairs().into_owned().collect()))
}

async fn send_response(
    socket: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    body: &str,
) -> RedirectResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    Ok(())
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Tallyup - Signed In</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1 style="color: #22c55e;">You're signed in</h1>
<p>You can close this window and return to Tallyup.</p>
<script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Tallyup - Sign In Failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1 style="color: #ef4444;">Sign in failed</h1>
<p>{}</p>
<p style="color: #888;">You can close this window and try again.</p>
</body>
</html>"#,
        escape_html(reason)
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
