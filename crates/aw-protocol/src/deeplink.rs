//! Deep links embedded in notification bodies.
//!
//! ```text
//! agentwatch://open-session?pid=4242&path=%2Fhome%2Fme%2Fmy%20project
//! ```

use thiserror::Error;

const ACTION: &str = "open-session";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeepLinkError {
    #[error("Not a URL: {0}")]
    NotAUrl(String),

    #[error("Unexpected scheme '{got}', expected '{expected}'")]
    WrongScheme { got: String, expected: String },

    #[error("Unknown deep link action: {0}")]
    UnknownAction(String),

    #[error("Missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error("Invalid pid: {0}")]
    InvalidPid(String),

    #[error("Invalid percent-encoding: {0}")]
    Decode(String),
}

/// Target of an `open-session` deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    pub pid: u32,
    pub project_path: String,
}

impl DeepLink {
    pub fn new(pid: u32, project_path: impl Into<String>) -> Self {
        Self {
            pid,
            project_path: project_path.into(),
        }
    }

    /// Renders the link, percent-encoding the path.
    pub fn to_url(&self, scheme: &str) -> String {
        format!(
            "{scheme}://{ACTION}?pid={}&path={}",
            self.pid,
            urlencoding::encode(&self.project_path)
        )
    }

    /// Parses and percent-decodes a link for `scheme`.
    pub fn parse(url: &str, scheme: &str) -> Result<Self, DeepLinkError> {
        let (got_scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| DeepLinkError::NotAUrl(url.to_string()))?;
        if got_scheme != scheme {
            return Err(DeepLinkError::WrongScheme {
                got: got_scheme.to_string(),
                expected: scheme.to_string(),
            });
        }

        let (action, query) = rest.split_once('?').unwrap_or((rest, ""));
        let action = action.trim_end_matches('/');
        if action != ACTION {
            return Err(DeepLinkError::UnknownAction(action.to_string()));
        }

        let mut pid = None;
        let mut path = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key {
                "pid" => pid = Some(value),
                "path" => path = Some(value),
                _ => {}
            }
        }

        let pid = pid.ok_or(DeepLinkError::MissingParam("pid"))?;
        let pid = pid
            .parse::<u32>()
            .map_err(|_| DeepLinkError::InvalidPid(pid.to_string()))?;
        let path = path.ok_or(DeepLinkError::MissingParam("path"))?;
        let project_path = urlencoding::decode(path)
            .map_err(|e| DeepLinkError::Decode(e.to_string()))?
            .into_owned();

        Ok(Self { pid, project_path })
    }
}
