//! HTTP surface modules (router, handlers, middleware).

/// Shared constants and header names.
pub mod constants;
/// Conversion download handler.
pub mod convert;
/// Problem response helpers and error types.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Metadata lookup handler.
pub mod info;
/// Router construction and server host.
pub mod router;
/// Response sink that streams conversions into an axum body.
pub mod sink;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
