//! Authentication commands.

use super::CommandContext;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use hange::{AuthUser, SessionSnapshot, SessionState};
use serde::Serialize;
use std::fmt;
use tallyup_config_and_utils::Platform;

/// Sign in through the browser.
pub async fn login(
    ctx: CommandContext,
    provider: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let session = ctx.session(provider)?;
    let restored = session.restore_session().await;

    if let Some(user) = restored.user.filter(|_| provider.is_none()) {
        output::print_success(
            &format!("Already logged in as {}", display_name(&user)),
            format,
        );
        return Ok(());
    }

    if matches!(format, OutputFormat::Text) {
        println!("Opening browser to sign in...");
    }

    match session.sign_in().await? {
        Some(user) => {
            output::print_success(&format!("Logged in as {}", display_name(&user)), format);
            if !session.snapshot().durable {
                output::print_error(
                    "Tokens could not be saved to secure storage; you will need to sign in again next time",
                    format,
                );
            }
        }
        None => output::print_success("Sign in cancelled", format),
    }

    Ok(())
}

/// Sign out and clear the stored session.
pub async fn logout(ctx: CommandContext, format: &OutputFormat) -> Result<()> {
    let session = ctx.session(None)?;
    let restored = session.restore_session().await;
    let was_signed_in = restored.user.is_some();

    session.sign_out().await;

    if was_signed_in {
        output::print_success("Logged out successfully", format);
    } else {
        output::print_success("Not logged in", format);
    }
    Ok(())
}

/// Show the current session.
pub async fn status(ctx: CommandContext, format: &OutputFormat) -> Result<()> {
    let session = ctx.session(None)?;
    let snapshot = session.restore_session().await;

    output::print(&StatusReport::new(ctx.platform(), &snapshot), format);
    Ok(())
}

/// Force a token refresh.
pub async fn refresh(ctx: CommandContext, format: &OutputFormat) -> Result<()> {
    let session = ctx.session(None)?;
    let restored = session.restore_session().await;
    if restored.user.is_none() {
        bail!("Not logged in. Run 'tallyup login' first");
    }

    let token = session.refresh_tokens(None).await;
    let snapshot = session.snapshot();

    match (&snapshot.user, &snapshot.last_error) {
        (Some(user), None) => {
            let message = match (ctx.platform(), token) {
                (Platform::Native, None) => {
                    bail!("Refresh did not return a new access token")
                }
                _ => format!("Session refreshed for {}", display_name(user)),
            };
            output::print_success(&message, format);
            Ok(())
        }
        (Some(_), Some(error)) => bail!("Refresh failed, session kept: {}", error.message),
        (None, Some(error)) => bail!("Session ended: {}", error.message),
        (None, None) => bail!("Session ended"),
    }
}

/// `status` output.
#[derive(Debug, Serialize)]
struct StatusReport {
    platform: Platform,
    logged_in: bool,
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    durable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl StatusReport {
    fn new(platform: Platform, snapshot: &SessionSnapshot) -> Self {
        let user = snapshot.user.as_ref();
        Self {
            platform,
            logged_in: user.is_some(),
            state: snapshot.state,
            user_id: user.map(|u| u.id.clone()),
            email: user.map(|u| u.email.clone()).filter(|e| !e.is_empty()),
            name: user.map(|u| u.name.clone()).filter(|n| !n.is_empty()),
            expires_at: user.and_then(|u| u.exp).and_then(format_timestamp),
            durable: snapshot.durable,
            last_error: snapshot.last_error.as_ref().map(|e| e.message.clone()),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let platform = match self.platform {
            Platform::Native => "native",
            Platform::Web => "web",
        };
        writeln!(f, "Platform: {}", platform)?;
        if !self.logged_in {
            write!(f, "Auth:     not logged in")?;
            if let Some(error) = &self.last_error {
                write!(f, "\nError:    {}", error)?;
            }
            return Ok(());
        }

        writeln!(f, "Auth:     logged in")?;
        writeln!(f, "User ID:  {}", self.user_id.as_deref().unwrap_or("unknown"))?;
        if let Some(email) = &self.email {
            writeln!(f, "Email:    {}", email)?;
        }
        if let Some(name) = &self.name {
            writeln!(f, "Name:     {}", name)?;
        }
        write!(f, "Expires:  {}", self.expires_at.as_deref().unwrap_or("unknown"))?;
        if !self.durable {
            write!(f, "\nStorage:  not persisted")?;
        }
        Ok(())
    }
}

fn display_name(user: &AuthUser) -> &str {
    [&user.email, &user.name]
        .into_iter()
        .find(|value| !value.is_empty())
        .map(String::as_str)
        .unwrap_or(user.id.as_str())
}

fn format_timestamp(secs: i64) -> Option<String> {
    Utc.timestamp_opt(secs, 0).single().map(|t| t.to_rfc3339())
}
