//! Environment loading for [`AppConfig`].
//!
//! # Design
//! - `from_lookup` takes the variable source as a function so tests never mutate
//!   the process environment.
//! - Unset or empty variables fall back to the values in `defaults.rs`.

use crate::defaults::{
    DEFAULT_BIND_ADDR, DEFAULT_PORT, ENV_BIND_ADDR, ENV_CONVERT_TIMEOUT_SECS, ENV_FFMPEG_PATH,
    ENV_FFMPEG_PREFIX_ARGS, ENV_INFO_TIMEOUT_SECS, ENV_KILL_GRACE_SECS, ENV_LOG_FORMAT,
    ENV_MAX_METADATA_BYTES, ENV_PORT, ENV_YTDLP_PATH, ENV_YTDLP_PREFIX_ARGS,
};
use crate::error::ConfigResult;
use crate::model::{AppConfig, ConversionLimits, Toolchain};
use crate::toolchain::{ToolKind, ToolProbe};
use crate::validate::{
    parse_bind_addr, parse_port, parse_positive_bytes, parse_positive_secs, split_args,
};

impl AppConfig {
    /// Load configuration from the process environment, probing for tools from the
    /// current working directory, executable directory and `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidField`] when a variable is set to an
    /// unparseable or out-of-range value.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), &ToolProbe::current())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConfigError::InvalidField`] when a variable is set to an
    /// unparseable or out-of-range value.
    pub fn from_lookup<F>(lookup: F, probe: &ToolProbe) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_addr = match get(ENV_BIND_ADDR) {
            Some(value) => parse_bind_addr(ENV_BIND_ADDR, &value)?,
            None => parse_bind_addr(ENV_BIND_ADDR, DEFAULT_BIND_ADDR)?,
        };
        let port = get(ENV_PORT)
            .map(|value| parse_port(ENV_PORT, &value))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);

        let defaults = ConversionLimits::default();
        let limits = ConversionLimits {
            info_timeout: get(ENV_INFO_TIMEOUT_SECS)
                .map(|value| parse_positive_secs(ENV_INFO_TIMEOUT_SECS, &value))
                .transpose()?
                .unwrap_or(defaults.info_timeout),
            convert_timeout: get(ENV_CONVERT_TIMEOUT_SECS)
                .map(|value| parse_positive_secs(ENV_CONVERT_TIMEOUT_SECS, &value))
                .transpose()?
                .unwrap_or(defaults.convert_timeout),
            max_metadata_bytes: get(ENV_MAX_METADATA_BYTES)
                .map(|value| parse_positive_bytes(ENV_MAX_METADATA_BYTES, &value))
                .transpose()?
                .unwrap_or(defaults.max_metadata_bytes),
            kill_grace: get(ENV_KILL_GRACE_SECS)
                .map(|value| parse_positive_secs(ENV_KILL_GRACE_SECS, &value))
                .transpose()?
                .unwrap_or(defaults.kill_grace),
        };

        let tool = |kind: ToolKind, path_key: &str, args_key: &str| {
            probe
                .locate(kind, get(path_key).as_deref())
                .with_prefix_args(get(args_key).as_deref().map(split_args).unwrap_or_default())
        };
        let toolchain = Toolchain {
            retrieval: tool(ToolKind::Retrieval, ENV_YTDLP_PATH, ENV_YTDLP_PREFIX_ARGS),
            encoder: tool(ToolKind::Encoder, ENV_FFMPEG_PATH, ENV_FFMPEG_PREFIX_ARGS),
        };

        Ok(Self {
            bind_addr,
            port,
            log_format: get(ENV_LOG_FORMAT),
            limits,
            toolchain,
        })
    }
}
