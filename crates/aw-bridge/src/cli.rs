//! `aw-bridge` command line.
//!
//! ```bash
//! # Normally started by awd; can be driven by hand for debugging
//! echo '{"cmd":"send","id":"1","sessionId":"<uuid>","message":"hi","cwd":"/code/app"}' | aw-bridge
//!
//! # Use a specific agent binary and pass extra environment to each turn
//! aw-bridge --agent /opt/claude/bin/claude --env CLAUDE_CODE_ENTRYPOINT=agent-watch
//!
//! # Debug logging (stderr)
//! RUST_LOG=aw_bridge=debug aw-bridge
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::control::run_bridge;
use crate::spawner::TurnSpawner;

/// agent-watch turn bridge
#[derive(Parser, Debug)]
#[command(name = "aw-bridge", version, about)]
pub struct Args {
    /// Agent executable, resolved against PATH on every turn
    #[arg(long, env = "AW_AGENT_BIN", default_value = "claude")]
    pub agent: String,

    /// Directory used when a session's directory no longer exists
    /// [default: home directory]
    #[arg(long)]
    pub fallback_dir: Option<PathBuf>,

    /// Extra environment for every turn, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

impl Args {
    /// Builds the spawner described by these arguments.
    pub fn spawner(&self) -> TurnSpawner {
        let fallback = self
            .fallback_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));
        self.env
            .iter()
            .fold(TurnSpawner::new(self.agent.clone(), fallback), |spawner, (k, v)| {
                spawner.with_env(k, v)
            })
    }
}

/// Entry point for the `aw-bridge` binary.
pub fn main() -> Result<()> {
    let args = Args::parse();
    run(args)
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    // stdout is the protocol channel
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("aw_bridge=info".parse()?),
        )
        .init();

    let spawner = args.spawner();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        agent = %args.agent,
        fallback_dir = %spawner.fallback_dir().display(),
        "Bridge starting"
    );

    run_bridge(tokio::io::stdin(), tokio::io::stdout(), spawner)
        .await
        .context("Bridge control loop failed")?;

    info!("Bridge stopped");
    Ok(())
}
