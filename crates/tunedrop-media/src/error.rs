//! # Design
//!
//! - Constant-message errors; context lives in fields, never in the message.
//! - `detail()` renders the human description surfaced to HTTP clients, including
//!   the captured stderr of the failing tool.
//! - `kind()` yields a stable label for logs and metrics.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessRole;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors produced while resolving metadata or streaming a conversion.
#[derive(Debug, Error)]
pub enum MediaError {
    /// Caller supplied unusable input.
    #[error("media invalid input")]
    InvalidInput {
        /// Input field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// An external tool could not be started.
    #[error("media process spawn failure")]
    ProcessSpawn {
        /// Role of the process that failed to start.
        role: ProcessRole,
        /// Program that was invoked.
        program: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The retrieval tool exited unsuccessfully.
    #[error("media retrieval failure")]
    Retrieval {
        /// Exit code, absent when the process was killed by a signal.
        code: Option<i32>,
        /// Tail of the tool's stderr.
        stderr: String,
    },
    /// The metadata document could not be parsed.
    #[error("media metadata parse failure")]
    MetadataParse {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The metadata document exceeded the configured size cap.
    #[error("media metadata output too large")]
    OutputTooLarge {
        /// Cap in bytes that was exceeded.
        limit: usize,
    },
    /// The encoder failed or its output stream broke.
    #[error("media encoding failure")]
    Encoding {
        /// Exit code when the encoder exited on its own.
        code: Option<i32>,
        /// Tail of the encoder's stderr.
        stderr: String,
        /// Read error on the encoder's output, when that was the failure.
        source: Option<io::Error>,
    },
    /// The HTTP client went away mid-transfer.
    #[error("client disconnected")]
    ClientDisconnected,
    /// The request deadline elapsed.
    #[error("media operation timed out")]
    Timeout {
        /// Deadline that elapsed.
        after: Duration,
    },
    /// Process bookkeeping IO failed.
    #[error("media io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl MediaError {
    /// Stable, machine-readable label for the failure.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::ProcessSpawn { .. } => "process_spawn",
            Self::Retrieval { .. } => "retrieval",
            Self::MetadataParse { .. } => "metadata_parse",
            Self::OutputTooLarge { .. } => "output_too_large",
            Self::Encoding { .. } => "encoding",
            Self::ClientDisconnected => "client_disconnected",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }

    /// Human-readable description including tool output.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => format!("{field}: {reason}"),
            Self::ProcessSpawn {
                role,
                program,
                source,
            } => format!(
                "failed to start {} ({}): {source}",
                role.tool_name(),
                program.display()
            ),
            Self::Retrieval { code, stderr } => {
                with_stderr(exit_summary(ProcessRole::Retrieval, *code), stderr)
            }
            Self::MetadataParse { source } => {
                format!("yt-dlp returned unreadable metadata: {source}")
            }
            Self::OutputTooLarge { limit } => {
                format!("yt-dlp metadata exceeded {limit} bytes")
            }
            Self::Encoding {
                source: Some(source),
                ..
            } => format!("reading encoded audio failed: {source}"),
            Self::Encoding { code, stderr, .. } => {
                with_stderr(exit_summary(ProcessRole::Encoding, *code), stderr)
            }
            Self::ClientDisconnected => "client disconnected".to_string(),
            Self::Timeout { after } => {
                format!("operation timed out after {} seconds", after.as_secs())
            }
            Self::Io { operation, source } => format!("{operation}: {source}"),
        }
    }
}

fn exit_summary(role: ProcessRole, code: Option<i32>) -> String {
    code.map_or_else(
        || format!("{} was terminated by a signal", role.tool_name()),
        |code| format!("{} exited with code {code}", role.tool_name()),
    )
}

fn with_stderr(summary: String, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        summary
    } else {
        format!("{summary}: {stderr}")
    }
}
