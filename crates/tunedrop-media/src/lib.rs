#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(unreachable_pub, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Media retrieval and conversion core.
//!
//! Layout: `resolver.rs` (metadata lookups), `pipeline.rs` (retrieval to encoder
//! processes), `process.rs` (child ownership and termination), `relay.rs` (copying
//! into a response sink), `watchdog.rs` (deadlines), `conversion.rs` (the driver that
//! composes them), `model.rs` and `error.rs` (shared types).

pub mod conversion;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod process;
pub mod relay;
pub mod resolver;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use conversion::{ConversionReport, ConversionService};
pub use error::{MediaError, MediaResult};
pub use model::{
    AUDIO_MPEG, AttachmentHead, FALLBACK_FILENAME, MediaMetadata, RetrievalMode,
    RetrievalRequest, TransferState, UNTITLED, encoder_args, sanitize_title,
};
pub use pipeline::{AudioStream, DEFAULT_CHUNK_SIZE, PipelineHandle, StreamPipeline};
pub use process::{ProcessHandle, ProcessRole, ProcessState};
pub use relay::{ResponseSink, TransferRelay};
pub use resolver::MetadataResolver;
pub use watchdog::Watchdog;
