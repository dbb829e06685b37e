//! `awd` command line.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! awd start
//!
//! # Start the daemon (background/daemonized)
//! awd start -d
//!
//! # Stop the daemon / check on it
//! awd stop
//! awd status
//!
//! # Talk to a running daemon over the socket
//! awd sessions
//! awd send <session-id> "run the tests" --project-path /code/app
//! awd watch
//!
//! # Enable debug logging
//! RUST_LOG=awd=debug awd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use aw_core::SessionId;
use aw_protocol::{ClientRequest, ServerMessage};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{state_dir, Config};
use crate::daemon::Daemon;
use crate::discovery::SystemProcessSource;
use crate::transport::{SocketClient, Transport};

/// agent-watch daemon - Claude Code session monitor and turn bridge
#[derive(Parser, Debug)]
#[command(name = "awd", version, about)]
pub struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// List sessions from the running daemon
    Sessions {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a session's conversation
    Show { session_id: String },
    /// Send one turn to a session
    Send {
        session_id: String,
        message: String,
        /// Working directory of the session
        #[arg(long)]
        project_path: String,
        /// PID of the process currently running the session
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Print pushes as they arrive
    Watch,
    /// Act on an agentwatch:// deep link
    Open { url: String },
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("awd.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("awd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
        remove_pid_file();
    }
    None
}

/// Entry point for the `awd` binary.
pub fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match args.command.unwrap_or(Command::Start { daemon: false }) {
        Command::Start { daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'awd stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Must happen before the tokio runtime exists
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };
            println!("Stopping daemon (PID {pid})...");
            crate::actions::stop_process(pid).with_context(|| format!("Failed to stop process {pid}"))?;

            // Wait for process to exit (up to 5 seconds)
            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Listening: {}", config.listen_addr);
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
        command => run_client(config, command),
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("awd=info".parse()?)
                .add_directive("aw_core=info".parse()?)
                .add_directive("aw_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "agent-watch daemon starting"
    );

    let token = config.resolve_token().context("Failed to resolve auth token")?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let source = Arc::new(SystemProcessSource::new(config.agent_signature.clone()));
    let daemon = Daemon::build(config, source);

    if let Err(e) = daemon.run(&token, cancel_token).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("agent-watch daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// Client Commands
// ============================================================================

#[tokio::main]
async fn run_client(config: Config, command: Command) -> Result<()> {
    let token = config.resolve_token().context("Failed to resolve auth token")?;
    let client = SocketClient::connect(&config.listen_addr, &token, None)
        .await
        .with_context(|| format!("Failed to reach daemon at {}", config.listen_addr))?;

    let request = match command {
        Command::Sessions { json } => {
            let response = client.request(ClientRequest::GetSessions).await?;
            let ServerMessage::Sessions { data } = expect_ok(response)? else {
                bail!("Unexpected response to getSessions");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                for session in &data {
                    println!(
                        "{:<8} {:<18} {:<7} {:<20} {}",
                        session.id.short(),
                        session.status.label(),
                        session.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        session.project_name(),
                        session.display_title(),
                    );
                }
            }
            return Ok(());
        }
        Command::Show { session_id } => {
            let response = client
                .request(ClientRequest::GetConversation {
                    session_id: SessionId::new(session_id),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&expect_ok(response)?)?);
            return Ok(());
        }
        Command::Watch => return watch(&client).await,
        Command::Send {
            session_id,
            message,
            project_path,
            pid,
        } => ClientRequest::SendInput {
            session_id: SessionId::new(session_id),
            input: message,
            project_path,
            pid,
        },
        Command::Open { url } => ClientRequest::OpenUrl { url },
        Command::Start { .. } | Command::Stop | Command::Status => {
            bail!("Not a client command")
        }
    };

    expect_ok(client.request(request).await?)?;
    println!("ok");
    Ok(())
}

fn expect_ok(response: ServerMessage) -> Result<ServerMessage> {
    match response {
        ServerMessage::Error { message } => bail!("{message}"),
        other => Ok(other),
    }
}

async fn watch(client: &SocketClient) -> Result<()> {
    let mut pushes = client.subscribe();
    loop {
        tokio::select! {
            _ = client.closed() => {
                eprintln!("Daemon closed the connection.");
                return Ok(());
            }
            received = pushes.recv() => match received {
                Ok(push) => println!("{}", serde_json::to_string(&push)?),
                Err(RecvError::Lagged(n)) => eprintln!("(skipped {n} messages)"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
