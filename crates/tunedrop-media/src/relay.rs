//! Copying encoded audio into an HTTP response.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{MediaError, MediaResult};
use crate::model::{AttachmentHead, TransferState};
use crate::pipeline::{AudioStream, DEFAULT_CHUNK_SIZE};

/// The response side of a conversion.
///
/// Implementations translate these calls onto a concrete HTTP response. The relay
/// and the conversion driver guarantee the call order: `begin` at most once and
/// before any `write`, then exactly one of `finish`, `reject` (only before `begin`)
/// or `abort` (only after `begin`).
#[async_trait]
pub trait ResponseSink: Send {
    /// Commit the response head.
    async fn begin(&mut self, head: &AttachmentHead) -> MediaResult<()>;

    /// Hand one chunk to the client; completes once the client can take more.
    /// Returns [`MediaError::ClientDisconnected`] when the client is gone.
    async fn write(&mut self, chunk: Bytes) -> MediaResult<()>;

    /// Resolves when the client has gone away.
    async fn closed(&mut self);

    /// Complete the body normally.
    async fn finish(&mut self) -> MediaResult<()>;

    /// Respond with a structured error; only valid before `begin`.
    async fn reject(&mut self, error: &MediaError);

    /// Terminate a response whose head has already been sent.
    async fn abort(&mut self);
}

/// Moves bytes from an [`AudioStream`] into a [`ResponseSink`].
#[derive(Debug, Clone, Copy)]
pub struct TransferRelay {
    chunk_size: usize,
}

impl Default for TransferRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl TransferRelay {
    /// Relay reading at most `chunk_size` bytes at a time.
    #[must_use]
    pub const fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Copy `stream` into `sink` until end of stream, committing `head` right before
    /// the first byte. Returns the bytes relayed by this call.
    ///
    /// The sink is neither finished nor aborted here; the caller decides once the
    /// producing processes have been reaped.
    ///
    /// # Errors
    ///
    /// - [`MediaError::ClientDisconnected`] when the sink closes.
    /// - [`MediaError::Encoding`] when reading the stream fails.
    /// - Any error returned by the sink.
    pub async fn run(
        &self,
        stream: &mut AudioStream,
        head: &AttachmentHead,
        sink: &mut dyn ResponseSink,
        state: &mut TransferState,
    ) -> MediaResult<u64> {
        let mut relayed = 0_u64;
        loop {
            let next = tokio::select! {
                biased;
                () = sink.closed() => return Err(MediaError::ClientDisconnected),
                read = stream.next_chunk(self.chunk_size) => read,
            };
            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return Ok(relayed),
                Err(source) => {
                    return Err(MediaError::Encoding {
                        code: None,
                        stderr: String::new(),
                        source: Some(source),
                    });
                }
            };
            if !state.headers_sent() {
                sink.begin(head).await?;
                state.mark_headers_sent();
            }
            let len = chunk.len() as u64;
            sink.write(chunk).await?;
            state.add_bytes(len);
            relayed += len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, SinkEvent};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    struct FailingReader {
        served: bool,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
            }
            self.served = true;
            buf.put_slice(b"abc");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn begin_happens_once_before_the_first_write() -> MediaResult<()> {
        let mut stream = AudioStream::from_reader(&b"0123456789"[..]);
        let head = AttachmentHead::for_title("Track");
        let mut sink = RecordingSink::default();
        let mut state = TransferState::default();

        let relayed = TransferRelay::new(4)
            .run(&mut stream, &head, &mut sink, &mut state)
            .await?;

        assert_eq!(relayed, 10);
        assert_eq!(state.bytes_sent(), 10);
        assert!(state.headers_sent());
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Begin("Track.mp3".to_string()),
                SinkEvent::Write(4),
                SinkEvent::Write(4),
                SinkEvent::Write(2),
            ]
        );
        assert_eq!(sink.body(), b"0123456789");
        Ok(())
    }

    #[tokio::test]
    async fn empty_stream_commits_nothing() -> MediaResult<()> {
        let mut stream = AudioStream::from_reader(&b""[..]);
        let mut sink = RecordingSink::default();
        let mut state = TransferState::default();
        let relayed = TransferRelay::default()
            .run(&mut stream, &AttachmentHead::for_title("x"), &mut sink, &mut state)
            .await?;
        assert_eq!(relayed, 0);
        assert!(!state.headers_sent());
        assert!(sink.events.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn read_errors_become_encoding_failures() {
        let mut stream = AudioStream::from_reader(FailingReader { served: false });
        let mut sink = RecordingSink::default();
        let mut state = TransferState::default();
        let result = TransferRelay::default()
            .run(&mut stream, &AttachmentHead::for_title("x"), &mut sink, &mut state)
            .await;
        assert!(matches!(
            result,
            Err(MediaError::Encoding {
                source: Some(_),
                ..
            })
        ));
        assert_eq!(state.bytes_sent(), 3);
    }

    #[tokio::test]
    async fn closed_sink_stops_the_relay() {
        let mut stream = AudioStream::from_reader(&b"0123456789"[..]);
        let mut sink = RecordingSink::disconnecting_after(1);
        let mut state = TransferState::default();
        let result = TransferRelay::new(2)
            .run(&mut stream, &AttachmentHead::for_title("x"), &mut sink, &mut state)
            .await;
        assert!(matches!(result, Err(MediaError::ClientDisconnected)));
        assert_eq!(state.bytes_sent(), 2);
    }
}
