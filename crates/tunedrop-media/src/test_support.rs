//! Fixtures shared by the unit tests of this crate.

use async_trait::async_trait;
use bytes::Bytes;
use tunedrop_config::ToolCommand;
use tunedrop_telemetry::Metrics;

use crate::error::{MediaError, MediaResult};
use crate::model::AttachmentHead;
use crate::relay::ResponseSink;

/// Run `script` through `/bin/sh -c`; per-call arguments land in `$@`.
pub(crate) fn sh_tool(script: &str) -> ToolCommand {
    ToolCommand::new("/bin/sh").with_prefix_args(["-c", script, "sh"])
}

pub(crate) fn test_metrics() -> Metrics {
    match Metrics::new() {
        Ok(metrics) => metrics,
        Err(err) => panic!("metrics registry should build: {err}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkEvent {
    Begin(String),
    Write(usize),
    Finish,
    Reject(&'static str),
    Abort,
}

/// In-memory sink recording every call.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) events: Vec<SinkEvent>,
    body: Vec<u8>,
    writes_before_disconnect: Option<usize>,
    disconnected: bool,
}

impl RecordingSink {
    /// A sink whose client goes away after `writes` successful writes.
    pub(crate) fn disconnecting_after(writes: usize) -> Self {
        Self {
            writes_before_disconnect: Some(writes),
            ..Self::default()
        }
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn count(&self, event: &SinkEvent) -> usize {
        self.events.iter().filter(|seen| *seen == event).count()
    }

    pub(crate) fn rejected_with(&self) -> Option<&'static str> {
        self.events.iter().find_map(|event| match event {
            SinkEvent::Reject(kind) => Some(*kind),
            _ => None,
        })
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn begin(&mut self, head: &AttachmentHead) -> MediaResult<()> {
        self.events
            .push(SinkEvent::Begin(head.filename().to_string()));
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> MediaResult<()> {
        if self.disconnected {
            return Err(MediaError::ClientDisconnected);
        }
        if let Some(remaining) = self.writes_before_disconnect.as_mut() {
            if *remaining == 0 {
                self.disconnected = true;
                return Err(MediaError::ClientDisconnected);
            }
            *remaining -= 1;
        }
        self.events.push(SinkEvent::Write(chunk.len()));
        self.body.extend_from_slice(&chunk);
        Ok(())
    }

    async fn closed(&mut self) {
        if self.disconnected {
            return;
        }
        std::future::pending::<()>().await;
    }

    async fn finish(&mut self) -> MediaResult<()> {
        self.events.push(SinkEvent::Finish);
        Ok(())
    }

    async fn reject(&mut self, error: &MediaError) {
        self.events.push(SinkEvent::Reject(error.kind()));
    }

    async fn abort(&mut self) {
        self.events.push(SinkEvent::Abort);
    }
}
