//! End-to-end conversion driver: metadata, pipeline, relay and teardown under one
//! deadline.
//!
//! # Design
//! - The watchdog is raced against the whole drive; whichever finishes first wins and
//!   the loser is dropped.
//! - Teardown and error reporting happen after the race, exactly once, whatever the
//!   terminal event was.

use std::time::Duration;

use tracing::{info, warn};
use tunedrop_config::{ConversionLimits, Toolchain};
use tunedrop_telemetry::Metrics;

use crate::error::{MediaError, MediaResult};
use crate::model::{AttachmentHead, MediaMetadata, TransferState};
use crate::pipeline::{PipelineHandle, StreamPipeline};
use crate::relay::{ResponseSink, TransferRelay};
use crate::resolver::MetadataResolver;
use crate::watchdog::Watchdog;

/// Summary of a finished conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// Title the download was named after.
    pub title: String,
    /// Encoded bytes delivered to the client.
    pub bytes_sent: u64,
}

/// Facade used by the HTTP layer for metadata lookups and conversions.
#[derive(Clone)]
pub struct ConversionService {
    resolver: MetadataResolver,
    pipeline: StreamPipeline,
    relay: TransferRelay,
    info_timeout: Duration,
    convert_timeout: Duration,
    metrics: Metrics,
}

impl ConversionService {
    /// Wire the resolver, pipeline and relay for `toolchain`.
    #[must_use]
    pub fn new(toolchain: Toolchain, limits: &ConversionLimits, metrics: Metrics) -> Self {
        Self {
            resolver: MetadataResolver::new(toolchain.retrieval.clone(), limits, metrics.clone()),
            pipeline: StreamPipeline::new(toolchain, limits, metrics.clone()),
            relay: TransferRelay::default(),
            info_timeout: limits.info_timeout,
            convert_timeout: limits.convert_timeout,
            metrics,
        }
    }

    /// Resolve metadata under the metadata lookup deadline.
    ///
    /// # Errors
    ///
    /// See [`MetadataResolver::fetch_metadata_within`].
    pub async fn lookup(&self, source_url: &str) -> MediaResult<MediaMetadata> {
        self.resolver
            .fetch_metadata_within(source_url, self.info_timeout)
            .await
    }

    /// Convert `source_url` to MP3 and stream it into `sink`.
    ///
    /// On return every spawned process has been reaped and the sink has received
    /// exactly one terminal call: `finish`, `reject` or `abort`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the conversion after it has been reported to the
    /// sink.
    pub async fn convert(
        &self,
        source_url: &str,
        sink: &mut dyn ResponseSink,
    ) -> MediaResult<ConversionReport> {
        self.metrics.conversion_started();
        let mut watchdog = Watchdog::armed(self.convert_timeout);
        let mut state = TransferState::default();
        let mut pipeline: Option<PipelineHandle> = None;

        let result = tokio::select! {
            result = self.drive(source_url, sink, &mut state, &mut pipeline) => result,
            () = watchdog.expired() => Err(MediaError::Timeout { after: self.convert_timeout }),
        };
        watchdog.disarm();

        if let Some(handle) = pipeline.as_mut()
            && let Err(err) = handle.teardown().await
        {
            warn!(source_url, detail = %err.detail(), "pipeline teardown failed");
        }
        self.metrics.add_relayed_bytes(state.bytes_sent());

        match &result {
            Ok(report) => {
                self.metrics.conversion_finished("completed");
                info!(
                    source_url,
                    title = %report.title,
                    bytes_sent = report.bytes_sent,
                    "conversion completed"
                );
            }
            Err(err) => {
                self.metrics.conversion_finished(err.kind());
                warn!(
                    source_url,
                    kind = err.kind(),
                    detail = %err.detail(),
                    bytes_sent = state.bytes_sent(),
                    headers_sent = state.headers_sent(),
                    "conversion failed"
                );
                report_failure(sink, &mut state, err).await;
            }
        }
        result
    }

    async fn drive(
        &self,
        source_url: &str,
        sink: &mut dyn ResponseSink,
        state: &mut TransferState,
        slot: &mut Option<PipelineHandle>,
    ) -> MediaResult<ConversionReport> {
        let metadata = tokio::select! {
            biased;
            () = sink.closed() => return Err(MediaError::ClientDisconnected),
            metadata = self.resolver.fetch_metadata(source_url) => metadata?,
        };
        let head = AttachmentHead::for_title(&metadata.title);
        let (mut stream, handle) = self.pipeline.open_audio_stream(source_url)?;
        let handle = slot.insert(handle);

        self.relay.run(&mut stream, &head, sink, state).await?;
        handle.finish().await?;

        if !state.headers_sent() {
            sink.begin(&head).await?;
            state.mark_headers_sent();
        }
        sink.finish().await?;
        state.mark_ended();
        Ok(ConversionReport {
            title: metadata.title,
            bytes_sent: state.bytes_sent(),
        })
    }
}

async fn report_failure(
    sink: &mut dyn ResponseSink,
    state: &mut TransferState,
    error: &MediaError,
) {
    if state.ended() || state.error_reported() {
        return;
    }
    state.mark_error_reported();
    if state.headers_sent() {
        sink.abort().await;
    } else {
        sink.reject(error).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, SinkEvent, sh_tool, test_metrics};
    use std::path::PathBuf;
    use tokio::time::Instant;
    use tunedrop_config::ToolCommand;

    const METADATA_BRANCH: &str = r#"case "$*" in *--dump-single-json*) printf '%s' '{"title":"Song (Official)","uploader":"Artist","duration":212}'; exit 0;; esac;"#;

    fn retrieval(stream_script: &str) -> ToolCommand {
        sh_tool(&format!("{METADATA_BRANCH} {stream_script}"))
    }

    fn service(
        retrieval: ToolCommand,
        encoder: ToolCommand,
        convert_timeout: Duration,
    ) -> ConversionService {
        let limits = ConversionLimits {
            convert_timeout,
            kill_grace: Duration::from_secs(1),
            ..ConversionLimits::default()
        };
        ConversionService::new(Toolchain { retrieval, encoder }, &limits, test_metrics())
    }

    #[tokio::test]
    async fn successful_conversion_streams_and_finishes() -> MediaResult<()> {
        let service = service(
            retrieval("printf 'source-audio'"),
            sh_tool("exec cat"),
            Duration::from_secs(30),
        );
        let mut sink = RecordingSink::default();
        let report = service.convert("https://example.com/v", &mut sink).await?;

        assert_eq!(report.title, "Song (Official)");
        assert_eq!(report.bytes_sent, 12);
        assert_eq!(sink.body(), b"source-audio");
        assert_eq!(
            sink.events.first(),
            Some(&SinkEvent::Begin("Song Official.mp3".to_string()))
        );
        assert_eq!(sink.events.last(), Some(&SinkEvent::Finish));
        assert_eq!(sink.count(&SinkEvent::Begin("Song Official.mp3".to_string())), 1);
        assert_eq!(service.metrics.snapshot().active_conversions, 0);
        assert_eq!(service.metrics.snapshot().relayed_bytes_total, 12);
        Ok(())
    }

    #[tokio::test]
    async fn empty_output_still_produces_a_response() -> MediaResult<()> {
        let service = service(retrieval("exit 0"), sh_tool("exec cat"), Duration::from_secs(30));
        let mut sink = RecordingSink::default();
        let report = service.convert("https://example.com/v", &mut sink).await?;
        assert_eq!(report.bytes_sent, 0);
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Begin("Song Official.mp3".to_string()),
                SinkEvent::Finish
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn encoder_failure_after_bytes_aborts_without_json() {
        let service = service(
            retrieval("exec sleep 30"),
            sh_tool("printf 'aaaa'; sleep 0.1; printf 'bbbb'; sleep 0.1; printf 'cccc'; exit 3"),
            Duration::from_secs(30),
        );
        let mut sink = RecordingSink::default();
        let result = service.convert("https://example.com/v", &mut sink).await;

        assert!(matches!(result, Err(MediaError::Encoding { code: Some(3), .. })));
        assert_eq!(sink.body().len(), 12);
        assert_eq!(sink.events.last(), Some(&SinkEvent::Abort));
        assert_eq!(sink.rejected_with(), None);
        assert_eq!(sink.count(&SinkEvent::Finish), 0);
    }

    #[tokio::test]
    async fn watchdog_with_zero_bytes_rejects_with_timeout() {
        let service = service(
            retrieval("exec sleep 30"),
            sh_tool("exec cat"),
            Duration::from_millis(300),
        );
        let mut sink = RecordingSink::default();
        let started = Instant::now();
        let result = service.convert("https://example.com/v", &mut sink).await;

        assert!(matches!(result, Err(MediaError::Timeout { .. })));
        assert_eq!(sink.events, vec![SinkEvent::Reject("timeout")]);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(service.metrics.snapshot().active_conversions, 0);
    }

    #[tokio::test]
    async fn watchdog_after_bytes_only_aborts() {
        let service = service(
            retrieval("printf 'head'; exec sleep 30"),
            sh_tool("exec cat"),
            Duration::from_millis(500),
        );
        let mut sink = RecordingSink::default();
        let result = service.convert("https://example.com/v", &mut sink).await;

        assert!(matches!(result, Err(MediaError::Timeout { .. })));
        assert_eq!(sink.body(), b"head");
        assert_eq!(sink.events.last(), Some(&SinkEvent::Abort));
        assert_eq!(sink.rejected_with(), None);
    }

    #[tokio::test]
    async fn client_disconnect_tears_down_the_pipeline() {
        let service = service(
            retrieval("exec yes tunedrop"),
            sh_tool("exec cat"),
            Duration::from_secs(30),
        );
        let mut sink = RecordingSink::disconnecting_after(1);
        let result = service.convert("https://example.com/v", &mut sink).await;

        assert!(matches!(result, Err(MediaError::ClientDisconnected)));
        assert_eq!(sink.count(&SinkEvent::Abort), 1);
        assert_eq!(sink.rejected_with(), None);
    }

    #[tokio::test]
    async fn metadata_failure_is_rejected_before_streaming() {
        let service = service(
            sh_tool("echo \"ERROR: Unsupported URL\" >&2; exit 1"),
            sh_tool("exec cat"),
            Duration::from_secs(30),
        );
        let mut sink = RecordingSink::default();
        let result = service.convert("https://example.com/v", &mut sink).await;

        assert!(matches!(result, Err(MediaError::Retrieval { code: Some(1), .. })));
        assert_eq!(sink.events, vec![SinkEvent::Reject("retrieval")]);
    }

    #[tokio::test]
    async fn empty_url_is_rejected_without_spawning() {
        let missing = ToolCommand::new(PathBuf::from("/nonexistent/tunedrop/yt-dlp"));
        let service = service(missing.clone(), missing, Duration::from_secs(30));
        let mut sink = RecordingSink::default();
        let result = service.convert(" ", &mut sink).await;

        assert!(matches!(result, Err(MediaError::InvalidInput { .. })));
        assert_eq!(sink.events, vec![SinkEvent::Reject("invalid_input")]);
    }

    #[tokio::test]
    async fn lookup_uses_the_metadata_branch() -> MediaResult<()> {
        let service = service(retrieval("exit 1"), sh_tool("exec cat"), Duration::from_secs(30));
        let metadata = service.lookup("https://example.com/v").await?;
        assert_eq!(metadata.author, "Artist");
        assert_eq!(metadata.duration_seconds, 212);
        Ok(())
    }
}
