//! Default values and environment variable names.
//!
//! # Design
//! - Centralize defaults so the loader and tests agree on them.
//! - Keep time-based defaults explicit for auditability.

use std::time::Duration;

/// Address the HTTP listener binds to when none is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
/// HTTP port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;
/// Deadline for a metadata lookup request.
pub const DEFAULT_INFO_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for a full conversion request.
pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(120);
/// Upper bound on the metadata document accepted from the retrieval tool.
pub const DEFAULT_MAX_METADATA_BYTES: usize = 16 * 1024 * 1024;
/// Time a child process gets between the polite and the forceful termination signal.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Bind address variable.
pub const ENV_BIND_ADDR: &str = "TUNEDROP_BIND_ADDR";
/// Port variable.
pub const ENV_PORT: &str = "TUNEDROP_PORT";
/// Metadata lookup deadline variable (seconds).
pub const ENV_INFO_TIMEOUT_SECS: &str = "TUNEDROP_INFO_TIMEOUT_SECS";
/// Conversion deadline variable (seconds).
pub const ENV_CONVERT_TIMEOUT_SECS: &str = "TUNEDROP_CONVERT_TIMEOUT_SECS";
/// Metadata size cap variable (bytes).
pub const ENV_MAX_METADATA_BYTES: &str = "TUNEDROP_MAX_METADATA_BYTES";
/// Termination grace period variable (seconds).
pub const ENV_KILL_GRACE_SECS: &str = "TUNEDROP_KILL_GRACE_SECS";
/// Log format variable (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "TUNEDROP_LOG_FORMAT";
/// Explicit retrieval tool path.
pub const ENV_YTDLP_PATH: &str = "TUNEDROP_YTDLP_PATH";
/// Arguments placed before every retrieval invocation (e.g. `-m yt_dlp`).
pub const ENV_YTDLP_PREFIX_ARGS: &str = "TUNEDROP_YTDLP_PREFIX_ARGS";
/// Explicit encoder tool path.
pub const ENV_FFMPEG_PATH: &str = "TUNEDROP_FFMPEG_PATH";
/// Arguments placed before every encoder invocation.
pub const ENV_FFMPEG_PREFIX_ARGS: &str = "TUNEDROP_FFMPEG_PREFIX_ARGS";
