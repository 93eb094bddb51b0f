//! Retrieval-to-encoder process pipeline.
//!
//! # Design
//! - The retrieval tool's stdout becomes the encoder's stdin through an OS pipe;
//!   no bytes pass through this process on that hop.
//! - The encoder's stdout is exposed as an [`AudioStream`]; both children are owned
//!   by a [`PipelineHandle`] that decides the final outcome and tears them down.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};
use tunedrop_config::{ConversionLimits, Toolchain};
use tunedrop_telemetry::Metrics;

use crate::error::{MediaError, MediaResult};
use crate::model::{RetrievalMode, RetrievalRequest, encoder_args};
use crate::process::{ProcessHandle, ProcessRole, ProcessState, StderrTail};

/// Read size used when the caller does not pick one.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Spawns the two-process conversion pipeline.
#[derive(Clone)]
pub struct StreamPipeline {
    toolchain: Toolchain,
    kill_grace: Duration,
    metrics: Metrics,
}

impl StreamPipeline {
    /// Build a pipeline factory for `toolchain`.
    #[must_use]
    pub fn new(toolchain: Toolchain, limits: &ConversionLimits, metrics: Metrics) -> Self {
        Self {
            toolchain,
            kill_grace: limits.kill_grace,
            metrics,
        }
    }

    /// Start retrieval and encoding for `source_url`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`MediaError::InvalidInput`] for an empty URL, before anything is spawned.
    /// - [`MediaError::ProcessSpawn`] when either tool cannot be started; a retrieval
    ///   process that was already running is killed when its handle drops.
    /// - [`MediaError::Io`] when the pipe between the tools cannot be set up.
    pub fn open_audio_stream(
        &self,
        source_url: &str,
    ) -> MediaResult<(AudioStream, PipelineHandle)> {
        let request = RetrievalRequest::new(source_url, RetrievalMode::Stream)?;
        let mut retrieval = ProcessHandle::spawn(
            ProcessRole::Retrieval,
            &self.toolchain.retrieval,
            &request.args(),
            Stdio::null(),
            self.kill_grace,
            &self.metrics,
        )?;
        let retrieval_stderr =
            StderrTail::capture(ProcessRole::Retrieval, retrieval.take_stderr());
        let encoder_stdin: Stdio = retrieval
            .take_stdout()?
            .try_into()
            .map_err(|source| MediaError::Io {
                operation: "splice_pipe",
                source,
            })?;

        let mut encoder = ProcessHandle::spawn(
            ProcessRole::Encoding,
            &self.toolchain.encoder,
            &encoder_args(),
            encoder_stdin,
            self.kill_grace,
            &self.metrics,
        )?;
        let encoder_stderr = StderrTail::capture(ProcessRole::Encoding, encoder.take_stderr());
        let stream = AudioStream::from_reader(encoder.take_stdout()?);

        debug!(
            source_url = request.source_url(),
            retrieval_pid = retrieval.pid(),
            encoder_pid = encoder.pid(),
            "conversion pipeline started"
        );
        Ok((
            stream,
            PipelineHandle {
                retrieval,
                encoder,
                retrieval_stderr,
                encoder_stderr,
                kill_grace: self.kill_grace,
                torn_down: false,
            },
        ))
    }
}

/// Encoded audio produced by the pipeline.
pub struct AudioStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream").finish_non_exhaustive()
    }
}

impl AudioStream {
    /// Wrap any byte source, typically the encoder's stdout.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    /// Read up to `max` bytes; `Ok(None)` at end of stream. Cancel-safe.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn next_chunk(&mut self, max: usize) -> std::io::Result<Option<Bytes>> {
        let mut buffer = BytesMut::zeroed(max);
        let read = self.reader.read(&mut buffer[..]).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);
        Ok(Some(buffer.freeze()))
    }
}

/// Owner of both pipeline processes and their stderr captures.
#[derive(Debug)]
pub struct PipelineHandle {
    retrieval: ProcessHandle,
    encoder: ProcessHandle,
    retrieval_stderr: StderrTail,
    encoder_stderr: StderrTail,
    kill_grace: Duration,
    torn_down: bool,
}

impl PipelineHandle {
    /// Last observed state of the retrieval process.
    #[must_use]
    pub const fn retrieval_state(&self) -> ProcessState {
        self.retrieval.state()
    }

    /// Last observed state of the encoder process.
    #[must_use]
    pub const fn encoder_state(&self) -> ProcessState {
        self.encoder.state()
    }

    /// Wait for the encoder to exit and decide the outcome of the conversion.
    ///
    /// When the encoder fails, the retrieval process is blamed only if it had already
    /// exited with a failure when the encoder's exit was observed. A retrieval that
    /// fails afterwards is reacting to the broken pipe, so it is terminated and the
    /// encoder failure is reported.
    ///
    /// # Errors
    ///
    /// - [`MediaError::Retrieval`] when the retrieval tool failed first.
    /// - [`MediaError::Encoding`] when the encoder failed on its own.
    /// - [`MediaError::Io`] when process bookkeeping fails.
    pub async fn finish(&mut self) -> MediaResult<()> {
        match self.encoder.wait().await? {
            ProcessState::Exited(0) => self.finish_retrieval().await,
            failed => {
                let retrieval = self.retrieval.refresh()?;
                if matches!(retrieval, ProcessState::Exited(code) if code != 0) {
                    return Err(self.retrieval_error(retrieval).await);
                }
                self.retrieval.terminate().await?;
                let code = match failed {
                    ProcessState::Exited(code) => Some(code),
                    ProcessState::Killed | ProcessState::Running => None,
                };
                Err(MediaError::Encoding {
                    code,
                    stderr: self.encoder_stderr.collect().await,
                    source: None,
                })
            }
        }
    }

    async fn finish_retrieval(&mut self) -> MediaResult<()> {
        match self.retrieval.wait_for(self.kill_grace).await? {
            ProcessState::Exited(0) => Ok(()),
            ProcessState::Running => {
                warn!(
                    pid = self.retrieval.pid(),
                    "retrieval still running after encoder finished; terminating"
                );
                self.retrieval.terminate().await
            }
            failed => Err(self.retrieval_error(failed).await),
        }
    }

    async fn retrieval_error(&mut self, state: ProcessState) -> MediaError {
        let code = match state {
            ProcessState::Exited(code) => Some(code),
            ProcessState::Killed | ProcessState::Running => None,
        };
        MediaError::Retrieval {
            code,
            stderr: self.retrieval_stderr.collect().await,
        }
    }

    /// Terminate every process still running and stop stderr capture.
    ///
    /// Safe to call repeatedly and after [`PipelineHandle::finish`].
    ///
    /// # Errors
    ///
    /// Returns the first [`MediaError::Io`] raised while signalling or reaping.
    pub async fn teardown(&mut self) -> MediaResult<()> {
        if self.torn_down {
            return Ok(());
        }
        let (retrieval, encoder) =
            tokio::join!(self.retrieval.terminate(), self.encoder.terminate());
        self.retrieval_stderr.abort();
        self.encoder_stderr.abort();
        self.torn_down = true;
        debug!(
            retrieval = ?self.retrieval.state(),
            encoder = ?self.encoder.state(),
            "conversion pipeline torn down"
        );
        retrieval.and(encoder)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{sh_tool, test_metrics};
    use std::path::PathBuf;
    use tunedrop_config::ToolCommand;

    fn pipeline(retrieval: &str, encoder: &str) -> StreamPipeline {
        pipeline_with(sh_tool(retrieval), sh_tool(encoder))
    }

    fn pipeline_with(retrieval: ToolCommand, encoder: ToolCommand) -> StreamPipeline {
        let limits = ConversionLimits {
            kill_grace: Duration::from_secs(1),
            ..ConversionLimits::default()
        };
        StreamPipeline::new(Toolchain { retrieval, encoder }, &limits, test_metrics())
    }

    async fn drain(stream: &mut AudioStream) -> std::io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next_chunk(DEFAULT_CHUNK_SIZE).await? {
            collected.extend_from_slice(&chunk);
        }
        Ok(collected)
    }

    fn io_err(source: std::io::Error) -> MediaError {
        MediaError::Io {
            operation: "test_read",
            source,
        }
    }

    #[tokio::test]
    async fn retrieval_output_flows_through_the_encoder() -> MediaResult<()> {
        let (mut stream, mut handle) = pipeline("printf 'audio-bytes'", "tr 'a-z' 'A-Z'")
            .open_audio_stream("https://example.com/v")?;
        assert_eq!(drain(&mut stream).await.map_err(io_err)?, b"AUDIO-BYTES");
        handle.finish().await?;
        assert_eq!(handle.encoder_state(), ProcessState::Exited(0));
        assert_eq!(handle.retrieval_state(), ProcessState::Exited(0));
        handle.teardown().await?;
        handle.teardown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn encoder_failure_terminates_retrieval() -> MediaResult<()> {
        let (mut stream, mut handle) = pipeline(
            "exec sleep 30",
            "printf 'aaaa'; sleep 0.1; printf 'bbbb'; sleep 0.1; printf 'cccc'; echo 'encoder broke' >&2; exit 3",
        )
        .open_audio_stream("https://example.com/v")?;
        assert_eq!(drain(&mut stream).await.map_err(io_err)?.len(), 12);

        match handle.finish().await {
            Err(MediaError::Encoding { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "encoder broke");
            }
            other => panic!("expected an encoding failure, got {other:?}"),
        }
        assert!(handle.retrieval_state().is_terminal());

        handle.teardown().await?;
        handle.teardown().await?;
        assert!(handle.retrieval_state().is_terminal());
        assert!(handle.encoder_state().is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_failure_is_the_reported_root_cause() -> MediaResult<()> {
        let (mut stream, mut handle) = pipeline(
            "echo 'ERROR: Video unavailable' >&2; exit 1",
            "cat >/dev/null; sleep 0.1; echo 'pipe:0: Invalid data' >&2; exit 1",
        )
        .open_audio_stream("https://example.com/v")?;
        assert!(drain(&mut stream).await.map_err(io_err)?.is_empty());
        match handle.finish().await {
            Err(MediaError::Retrieval { code, stderr }) => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "ERROR: Video unavailable");
            }
            other => panic!("expected a retrieval failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn broken_pipe_in_retrieval_does_not_mask_the_encoder_error() -> MediaResult<()> {
        let (mut stream, mut handle) = pipeline(
            "trap '' PIPE; while printf 'xxxxxxxxxxxxxxxx' 2>/dev/null; do :; done; sleep 0.05; echo 'ERROR: [Errno 32] Broken pipe' >&2; exit 1",
            "head -c 64 >/dev/null; echo 'pipe:0: Invalid data found when processing input' >&2; exit 1",
        )
        .open_audio_stream("https://example.com/v")?;
        assert!(drain(&mut stream).await.map_err(io_err)?.is_empty());

        match handle.finish().await {
            Err(MediaError::Encoding { code, stderr, .. }) => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "pipe:0: Invalid data found when processing input");
            }
            other => panic!("expected the encoder failure, got {other:?}"),
        }
        assert!(handle.retrieval_state().is_terminal());
        handle.teardown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn teardown_stops_a_stalled_pipeline() -> MediaResult<()> {
        let (_stream, mut handle) =
            pipeline("exec sleep 30", "exec cat").open_audio_stream("https://example.com/v")?;
        assert_eq!(handle.retrieval_state(), ProcessState::Running);
        handle.teardown().await?;
        assert_eq!(handle.retrieval_state(), ProcessState::Killed);
        assert!(handle.encoder_state().is_terminal());
        handle.teardown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_encoder_is_a_spawn_error() {
        let err = pipeline_with(
            sh_tool("exec sleep 30"),
            ToolCommand::new(PathBuf::from("/nonexistent/tunedrop/ffmpeg")),
        )
        .open_audio_stream("https://example.com/v")
        .err();
        assert!(matches!(
            err,
            Some(MediaError::ProcessSpawn {
                role: ProcessRole::Encoding,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_url_spawns_nothing() {
        let missing = ToolCommand::new(PathBuf::from("/nonexistent/tunedrop/yt-dlp"));
        let err = pipeline_with(missing.clone(), missing)
            .open_audio_stream("")
            .err();
        assert!(matches!(err, Some(MediaError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn audio_stream_reads_in_bounded_chunks() -> std::io::Result<()> {
        let mut stream = AudioStream::from_reader(&b"0123456789"[..]);
        assert_eq!(stream.next_chunk(4).await?.as_deref(), Some(&b"0123"[..]));
        assert_eq!(stream.next_chunk(4).await?.as_deref(), Some(&b"4567"[..]));
        assert_eq!(stream.next_chunk(4).await?.as_deref(), Some(&b"89"[..]));
        assert_eq!(stream.next_chunk(4).await?, None);
        Ok(())
    }
}
