use prefix_oracle::server::{self, LeakyLoginHandler};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::time::Duration;

/// Serve a login endpoint whose password check leaks timing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    bind: String,

    /// Credentials as user=password, repeatable
    #[arg(long = "user", value_parser = parse_credential, required = true)]
    users: Vec<(String, String)>,

    /// Delay per compared character, in milliseconds
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Maximum random extra delay per request, in milliseconds
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
}

fn parse_credential(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .ok_or_else(|| format!("expected user=password, got '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut handler = LeakyLoginHandler::new(Duration::from_millis(args.delay_ms))
        .with_jitter(Duration::from_millis(args.jitter_ms), 101);
    for (user, password) in &args.users {
        handler = handler.with_user(user, password);
    }

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(address = %args.bind, users = args.users.len(), "serving leaky login");
    axum::serve(listener, server::router(&handler)).await?;
    Ok(())
}
