//! Session actions: stopping an agent process and opening a session.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Invalid pid: {0}")]
    InvalidPid(u32),

    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Project path does not exist: {0}")]
    MissingPath(String),

    #[error("Failed to run {program}: {source}")]
    Open {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Sends SIGTERM to an agent process.
#[cfg(unix)]
pub fn stop_process(pid: u32) -> Result<(), ActionError> {
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return Err(ActionError::InvalidPid(pid)),
    };
    // SAFETY: kill has no memory-safety preconditions
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        info!(pid, "Sent SIGTERM");
        return Ok(());
    }
    let source = std::io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        Err(ActionError::NoSuchProcess(pid))
    } else {
        Err(ActionError::Signal { pid, source })
    }
}

#[cfg(not(unix))]
pub fn stop_process(pid: u32) -> Result<(), ActionError> {
    Err(ActionError::Signal {
        pid,
        source: std::io::Error::new(std::io::ErrorKind::Unsupported, "signals need a Unix host"),
    })
}

/// Opens a session for the user.
///
/// Runs `<program> <project_path>` with `AW_SESSION_PID` set, so a custom
/// opener can focus the terminal running that pid. The default program is
/// the platform's file opener.
#[derive(Debug, Clone)]
pub struct Opener {
    program: String,
}

impl Opener {
    pub fn new(program: Option<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| default_opener().to_string()),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn open(&self, pid: u32, project_path: &str) -> Result<(), ActionError> {
        if !Path::new(project_path).is_dir() {
            return Err(ActionError::MissingPath(project_path.to_string()));
        }

        let mut child = Command::new(&self.program)
            .arg(project_path)
            .env("AW_SESSION_PID", pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ActionError::Open {
                program: self.program.clone(),
                source,
            })?;
        info!(pid, project_path, program = %self.program, "Opening session");

        // Reap the opener in the background
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!("Opener exited"),
                Ok(status) => warn!(status = %status, "Opener exited with failure"),
                Err(e) => warn!(error = %e, "Failed to wait for opener"),
            }
        });
        Ok(())
    }
}

fn default_opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}
