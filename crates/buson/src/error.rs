//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use buson_config::ConfigError;
use buson_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(buson::no_config),
        help(
            "Create one with: buson config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Cannot load configuration")]
    #[diagnostic(
        code(buson::config),
        help("Fix the file, or recreate it with: buson config init")
    )]
    Config {
        #[source]
        source: ConfigError,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(buson::validation))]
    Validation { field: String, reason: String },

    // ── Link ─────────────────────────────────────────────────────────
    #[error("Device link error: {reason}")]
    #[diagnostic(
        code(buson::connection),
        help("Check server_ip and port, and that the dispatch server is reachable.")
    )]
    Connection { reason: String },

    #[error("{0}")]
    #[diagnostic(code(buson::internal))]
    Internal(String),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config { .. } => exit_code::CONFIG,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            source => CliError::Config { source },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::ConnectionFailed { reason } | CoreError::LinkLost { reason } => {
                CliError::Connection { reason }
            }
            e @ (CoreError::AlreadyRunning | CoreError::Internal(_)) => {
                CliError::Internal(e.to_string())
            }
        }
    }
}
