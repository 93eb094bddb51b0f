//! Metadata lookups through the retrieval tool's JSON dump mode.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tracing::{info, warn};
use tunedrop_config::{ConversionLimits, ToolCommand};
use tunedrop_telemetry::Metrics;

use crate::error::{MediaError, MediaResult};
use crate::model::{MediaMetadata, RawMetadata, RetrievalMode, RetrievalRequest};
use crate::process::{ProcessHandle, ProcessRole, ProcessState, StderrTail};
use crate::watchdog::Watchdog;

/// Resolves [`MediaMetadata`] for a source URL.
#[derive(Clone)]
pub struct MetadataResolver {
    retrieval: ToolCommand,
    max_bytes: usize,
    kill_grace: Duration,
    metrics: Metrics,
}

impl MetadataResolver {
    /// Build a resolver around the retrieval tool.
    #[must_use]
    pub fn new(retrieval: ToolCommand, limits: &ConversionLimits, metrics: Metrics) -> Self {
        Self {
            retrieval,
            max_bytes: limits.max_metadata_bytes,
            kill_grace: limits.kill_grace,
            metrics,
        }
    }

    /// Fetch and normalize metadata with no deadline of its own.
    ///
    /// # Errors
    ///
    /// See [`MetadataResolver::fetch_metadata_within`].
    pub async fn fetch_metadata(&self, source_url: &str) -> MediaResult<MediaMetadata> {
        self.lookup(source_url, Watchdog::disarmed()).await
    }

    /// Fetch and normalize metadata, terminating the lookup after `limit`.
    ///
    /// # Errors
    ///
    /// - [`MediaError::InvalidInput`] for an empty URL, before anything is spawned.
    /// - [`MediaError::ProcessSpawn`] when the tool cannot be started.
    /// - [`MediaError::OutputTooLarge`] when stdout exceeds the configured cap.
    /// - [`MediaError::Retrieval`] on a non-zero exit, with the stderr tail.
    /// - [`MediaError::MetadataParse`] when stdout is not a JSON document.
    /// - [`MediaError::Timeout`] when `limit` elapses first.
    pub async fn fetch_metadata_within(
        &self,
        source_url: &str,
        limit: Duration,
    ) -> MediaResult<MediaMetadata> {
        self.lookup(source_url, Watchdog::armed(limit)).await
    }

    async fn lookup(&self, source_url: &str, mut watchdog: Watchdog) -> MediaResult<MediaMetadata> {
        let result = self.lookup_inner(source_url, &mut watchdog).await;
        match &result {
            Ok(metadata) => {
                self.metrics.inc_metadata_lookup("ok");
                info!(
                    source_url,
                    title = %metadata.title,
                    duration_seconds = metadata.duration_seconds,
                    "metadata resolved"
                );
            }
            Err(err) => {
                self.metrics.inc_metadata_lookup(err.kind());
                warn!(source_url, kind = err.kind(), detail = %err.detail(), "metadata lookup failed");
            }
        }
        result
    }

    async fn lookup_inner(
        &self,
        source_url: &str,
        watchdog: &mut Watchdog,
    ) -> MediaResult<MediaMetadata> {
        let request = RetrievalRequest::new(source_url, RetrievalMode::Metadata)?;
        let mut process = ProcessHandle::spawn(
            ProcessRole::Retrieval,
            &self.retrieval,
            &request.args(),
            Stdio::null(),
            self.kill_grace,
            &self.metrics,
        )?;
        let mut stderr = StderrTail::capture(ProcessRole::Retrieval, process.take_stderr());
        let stdout = process.take_stdout()?;

        let outcome = tokio::select! {
            result = self.collect(&mut process, &mut stderr, stdout) => Some(result),
            () = watchdog.expired() => None,
        };
        match outcome {
            Some(result) => {
                if result.is_err() {
                    process.terminate().await?;
                }
                result
            }
            None => {
                process.terminate().await?;
                stderr.abort();
                Err(MediaError::Timeout {
                    after: watchdog.timeout().unwrap_or_default(),
                })
            }
        }
    }

    async fn collect(
        &self,
        process: &mut ProcessHandle,
        stderr: &mut StderrTail,
        stdout: ChildStdout,
    ) -> MediaResult<MediaMetadata> {
        let document = read_bounded(stdout, self.max_bytes).await?;
        let state = process.wait().await?;
        match state {
            ProcessState::Exited(0) => serde_json::from_slice::<RawMetadata>(&document)
                .map(MediaMetadata::from)
                .map_err(|source| MediaError::MetadataParse { source }),
            ProcessState::Exited(code) => Err(MediaError::Retrieval {
                code: Some(code),
                stderr: stderr.collect().await,
            }),
            ProcessState::Killed | ProcessState::Running => Err(MediaError::Retrieval {
                code: None,
                stderr: stderr.collect().await,
            }),
        }
    }
}

async fn read_bounded(stdout: ChildStdout, limit: usize) -> MediaResult<Vec<u8>> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut document = Vec::new();
    stdout
        .take(cap)
        .read_to_end(&mut document)
        .await
        .map_err(|source| MediaError::Io {
            operation: "read_metadata",
            source,
        })?;
    if document.len() > limit {
        return Err(MediaError::OutputTooLarge { limit });
    }
    Ok(document)
}
