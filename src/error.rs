//! Error types for shipcheck
//!
//! All modules use `ShipcheckResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for shipcheck operations
pub type ShipcheckResult<T> = Result<T, ShipcheckError>;

/// All errors that can occur in shipcheck
#[derive(Error, Debug)]
pub enum ShipcheckError {
    // Readiness errors
    #[error("{what} did not become reachable within {}s", timeout.as_secs_f64())]
    StartupTimeout { what: String, timeout: Duration },

    #[error("Port {0} is still in use")]
    PortInUse(u16),

    // Manifest errors
    #[error("No manifest backup found at {0}")]
    MissingBackup(PathBuf),

    #[error("Invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    // Pipeline step errors
    #[error("Publish failed during {step}:\n{output}")]
    PublishFailure { step: String, output: String },

    #[error("Dependency installation failed for {project}:\n{output}")]
    InstallFailure { project: String, output: String },

    #[error("Test suite failed for {project} (exit code {code})")]
    TestSuiteFailure { project: String, code: i32 },

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Cache errors
    #[error("Invalid cache key: {0:?}")]
    InvalidCacheKey(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Cancelled,

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl ShipcheckError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound(_) => Some("Run: shipcheck config init"),
            Self::PortInUse(_) => Some("Stop the process holding the port or pick another with --port"),
            Self::StartupTimeout { .. } => {
                Some("Increase the timeout in shipcheck.toml or run with -vv to see process output")
            }
            Self::MissingBackup(_) => Some("The manifest was already restored or never bumped"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ShipcheckError::StartupTimeout {
            what: "registry".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("registry did not become reachable within 5s"));
    }

    #[test]
    fn error_hint() {
        assert!(ShipcheckError::PortInUse(3000).hint().is_some());
        assert_eq!(ShipcheckError::Internal("x".into()).hint(), None);
    }
}
