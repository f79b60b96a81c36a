//! # agent-pty
//!
//! Drives interactive AI coding-assistant CLIs on pseudo-terminals and
//! serves their conversations over a JSON-lines protocol on stdio.
//!
//! ## Overview
//!
//! - One long-lived CLI process per owner, started on a PTY
//! - Replies streamed back as plain-text chunks, delimited by the CLI's
//!   ready prompt or by an idle timeout
//! - Idle and over-capacity sessions evicted in the background
//!
//! ## Architecture
//!
//! This is Layer 3 - the binary that ties together:
//! - agent-pty-core: Core types and configuration
//! - agent-pty-session: Session pool and interactive sessions
//!
//! stdout carries protocol lines only; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::BufReader;

use agent_pty::{protocol_schema, Server, SessionService};
use agent_pty_core::EngineConfig;
use agent_pty_session::SessionPool;

const USAGE: &str = "Usage: agent-pty [--config <path>] [--print-schema]";

struct Args {
    config: Option<PathBuf>,
    print_schema: bool,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        config: None,
        print_schema: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--print-schema" => args.print_schema = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(None);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }

    Ok(Some(args))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    if args.print_schema {
        println!("{}", serde_json::to_string_pretty(&protocol_schema())?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let config = EngineConfig::default();
            config.validate()?;
            config
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "agent-pty v{} starting: executable={}, max_sessions={}",
        env!("CARGO_PKG_VERSION"),
        config.session.executable,
        config.pool.max_sessions
    );

    let pool = SessionPool::new(&config)?;
    let service = Arc::new(SessionService::start(pool));
    let server = Server::new(Arc::clone(&service));

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            shutdown.cancel();
        }
    });

    tracing::info!("Serving JSON-lines protocol on stdio");

    server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .map_err(|e| {
            tracing::error!("Server error: {}", e);
            e
        })?;

    tracing::info!("agent-pty shutting down");

    Ok(())
}
