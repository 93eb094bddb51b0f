//! Validation helpers and parsing utilities for environment values.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

pub(crate) fn parse_port(field: &'static str, value: &str) -> ConfigResult<u16> {
    let port = value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::invalid(field, value, "not_an_integer"))?;
    if !(1..=65_535).contains(&port) {
        return Err(ConfigError::invalid(field, value, "out_of_range"));
    }
    u16::try_from(port).map_err(|_| ConfigError::invalid(field, value, "out_of_range"))
}

pub(crate) fn parse_bind_addr(field: &'static str, value: &str) -> ConfigResult<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| ConfigError::invalid(field, value, "not_an_ip_address"))
}

pub(crate) fn parse_positive_secs(field: &'static str, value: &str) -> ConfigResult<Duration> {
    let secs = value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::invalid(field, value, "not_an_integer"))?;
    if secs == 0 {
        return Err(ConfigError::invalid(field, value, "zero"));
    }
    Ok(Duration::from_secs(secs))
}

pub(crate) fn parse_positive_bytes(field: &'static str, value: &str) -> ConfigResult<usize> {
    let bytes = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::invalid(field, value, "not_an_integer"))?;
    if bytes == 0 {
        return Err(ConfigError::invalid(field, value, "zero"));
    }
    Ok(bytes)
}

pub(crate) fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}
