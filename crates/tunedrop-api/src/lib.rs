#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! HTTP surface for metadata lookups and audio conversions.
//!
//! Layout: `http/router.rs` (router and server host), `http/info.rs` and
//! `http/convert.rs` (handlers), `http/sink.rs` (streaming response sink),
//! `http/errors.rs` (problem responses), `http/telemetry.rs` (request metrics).

/// Crate-level error types for serving.
pub mod error;
/// HTTP routers, handlers and middleware.
pub mod http;
/// Wire models shared by handlers.
pub mod models;
pub(crate) mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use models::ProblemDetails;
