#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]

//! Environment-driven configuration for the Tunedrop service.
//!
//! Layout: `model.rs` (typed configuration), `loader.rs` (environment loading),
//! `toolchain.rs` (external tool resolution), `validate.rs` (parsing helpers),
//! `defaults.rs` (default values and variable names).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod toolchain;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{AppConfig, ConversionLimits, ToolCommand, ToolSource, Toolchain};
pub use toolchain::{ToolKind, ToolProbe};
