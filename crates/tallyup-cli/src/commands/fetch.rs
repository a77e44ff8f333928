//! Authenticated request command.

use super::CommandContext;
use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use hange::{HttpRequest, HttpResponse, Method};
use serde_json::Value;
use tracing::debug;

/// Send a request to the backend as the signed-in user and print the response.
pub async fn fetch(
    ctx: CommandContext,
    path: &str,
    method: &str,
    data: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let session = ctx.session(None)?;
    session.restore_session().await;

    let request = build_request(session.endpoints().resolve(path), method, data)?;
    debug!(method = %request.method, url = %request.url, "Sending authenticated request");

    let response = session.fetch_with_auth(request).await?;
    print_response(&response, format);

    if !response.is_success() {
        anyhow::bail!("Request failed with HTTP {}", response.status.as_u16());
    }
    Ok(())
}

fn build_request(url: String, method: &str, data: Option<&str>) -> Result<HttpRequest> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let request = HttpRequest::new(method, url);
    match data {
        Some(raw) => {
            let body: Value = serde_json::from_str(raw).context("--data must be valid JSON")?;
            Ok(request.json(body))
        }
        None => Ok(request),
    }
}

fn print_response(response: &HttpResponse, format: &OutputFormat) {
    let body = response
        .json::<Value>()
        .unwrap_or_else(|_| Value::String(response.text()));

    match format {
        OutputFormat::Text => {
            output::print_row("Status", &response.status.to_string());
            match &body {
                Value::String(text) => println!("{}", text),
                other => println!(
                    "{}",
                    serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string())
                ),
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "status": response.status.as_u16(), "body": body })
        ),
    }
}
