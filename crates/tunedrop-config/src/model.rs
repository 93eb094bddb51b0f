//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; loading lives in `loader.rs`, probing in `toolchain.rs`.
//! - Resolved once at startup and shared read-only by every request.

use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::defaults::{
    DEFAULT_CONVERT_TIMEOUT, DEFAULT_INFO_TIMEOUT, DEFAULT_KILL_GRACE, DEFAULT_MAX_METADATA_BYTES,
};

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// IP address the HTTP listener binds to.
    pub bind_addr: IpAddr,
    /// HTTP port the listener binds to.
    pub port: u16,
    /// Requested log format, when set explicitly.
    pub log_format: Option<String>,
    /// Deadlines and size limits applied to every request.
    pub limits: ConversionLimits,
    /// External tools invoked by the media pipeline.
    pub toolchain: Toolchain,
}

impl AppConfig {
    /// Socket address assembled from the bind address and port.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Deadlines and resource bounds for metadata lookups and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionLimits {
    /// Watchdog deadline for metadata lookups.
    pub info_timeout: Duration,
    /// Watchdog deadline for conversions.
    pub convert_timeout: Duration,
    /// Maximum metadata document size accepted from the retrieval tool.
    pub max_metadata_bytes: usize,
    /// Grace period between the polite and the forceful termination signal.
    pub kill_grace: Duration,
}

impl Default for ConversionLimits {
    fn default() -> Self {
        Self {
            info_timeout: DEFAULT_INFO_TIMEOUT,
            convert_timeout: DEFAULT_CONVERT_TIMEOUT,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

/// The pair of external programs the pipeline drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Media retrieval tool (`yt-dlp`).
    pub retrieval: ToolCommand,
    /// Audio encoder (`ffmpeg`).
    pub encoder: ToolCommand,
}

/// How a tool's program path was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    /// Set explicitly through the environment or by the caller.
    Configured,
    /// Found on one of the probed locations.
    Probed,
    /// Not found anywhere; the bare name is left to the OS at spawn time.
    Unresolved,
}

impl ToolSource {
    /// Label used in startup logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Probed => "probed",
            Self::Unresolved => "unresolved",
        }
    }
}

/// Program plus the arguments that precede every invocation of it.
///
/// Prefix arguments allow launching a tool through an interpreter, for example
/// `python3 -m yt_dlp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable path or bare name resolved through `PATH` at spawn time.
    pub program: PathBuf,
    /// Arguments inserted ahead of the per-call arguments.
    pub prefix_args: Vec<OsString>,
    /// How `program` was chosen.
    pub source: ToolSource,
}

impl ToolCommand {
    /// Build a command without prefix arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            source: ToolSource::Configured,
        }
    }

    /// Record how the program path was chosen.
    #[must_use]
    pub const fn with_source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    /// Append prefix arguments.
    #[must_use]
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.prefix_args.extend(args.into_iter().map(Into::into));
        self
    }
}
