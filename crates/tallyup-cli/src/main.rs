//! Tallyup CLI - sign in and exercise the Tallyup session from a terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use tallyup_config_and_utils::Platform;

/// Tallyup CLI - Manage the Tallyup session and call the backend as the signed-in user.
#[derive(Parser)]
#[command(name = "tallyup")]
#[command(about = "Tallyup CLI for authentication and authenticated requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Session custody (native or web); defaults to the configured platform
    #[arg(long, global = true, env = "TALLYUP_PLATFORM")]
    platform: Option<Platform>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the browser
    Login {
        /// OAuth provider (defaults to the configured provider)
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Show the current session
    Status,

    /// Force a token refresh
    Refresh,

    /// Send an authenticated request to the backend
    Fetch {
        /// Path relative to the backend URL, or an absolute URL
        path: String,
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let ctx = match commands::CommandContext::load(cli.log_level.as_deref(), cli.platform) {
        Ok(ctx) => ctx,
        Err(e) => {
            output::print_error(&e.to_string(), &cli.format);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Login { provider } => {
            commands::login(ctx, provider.as_deref(), &cli.format).await
        }
        Commands::Logout => commands::logout(ctx, &cli.format).await,
        Commands::Status => commands::status(ctx, &cli.format).await,
        Commands::Refresh => commands::refresh(ctx, &cli.format).await,
        Commands::Fetch { path, method, data } => {
            commands::fetch(ctx, &path, &method, data.as_deref(), &cli.format).await
        }
    };

    if let Err(e) = result {
        output::print_error(&e.to_string(), &cli.format);
        std::process::exit(1);
    }
}
