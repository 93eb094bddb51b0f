//! [`ResponseSink`] over an axum streaming body.
//!
//! # Design
//! - The handler awaits a oneshot that yields either the streaming `200` response
//!   (sent by `begin`) or a problem response (sent by `reject`).
//! - Body chunks travel through a bounded channel; a full channel makes `write`
//!   wait, which is how client backpressure reaches the relay.
//! - Dropping the response body closes the channel, which the sink reports as a
//!   client disconnect.

use std::io;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tunedrop_media::{AttachmentHead, MediaError, MediaResult, ResponseSink};

use crate::http::constants::BODY_CHANNEL_CAPACITY;
use crate::http::errors::{ApiError, MediaOperation};

type BodyChunk = Result<Bytes, io::Error>;

/// Sink half handed to the conversion task.
pub(crate) struct ChannelSink {
    response_tx: Option<oneshot::Sender<Response>>,
    body_tx: Option<mpsc::Sender<BodyChunk>>,
    body_rx: Option<mpsc::Receiver<BodyChunk>>,
}

impl ChannelSink {
    /// Create the sink and the receiver the handler awaits for its response.
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (response_tx, response_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        (
            Self {
                response_tx: Some(response_tx),
                body_tx: Some(body_tx),
                body_rx: Some(body_rx),
            },
            response_rx,
        )
    }

    fn respond(&mut self, response: Response) -> MediaResult<()> {
        self.response_tx
            .take()
            .ok_or(MediaError::ClientDisconnected)?
            .send(response)
            .map_err(|_| MediaError::ClientDisconnected)
    }
}

fn attachment_response(head: &AttachmentHead, body: Body) -> MediaResult<Response> {
    let disposition = HeaderValue::from_bytes(head.content_disposition().as_bytes())
        .map_err(|err| MediaError::Io {
            operation: "content_disposition",
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })?;
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(head.content_type()),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn begin(&mut self, head: &AttachmentHead) -> MediaResult<()> {
        let body_rx = self.body_rx.take().ok_or_else(|| MediaError::Io {
            operation: "begin_response",
            source: io::Error::other("response already started"),
        })?;
        let response =
            attachment_response(head, Body::from_stream(ReceiverStream::new(body_rx)))?;
        self.respond(response)
    }

    async fn write(&mut self, chunk: Bytes) -> MediaResult<()> {
        let body_tx = self.body_tx.as_ref().ok_or(MediaError::ClientDisconnected)?;
        body_tx
            .send(Ok(chunk))
            .await
            .map_err(|_| MediaError::ClientDisconnected)
    }

    async fn closed(&mut self) {
        if self.body_rx.is_none() {
            if let Some(body_tx) = self.body_tx.as_ref() {
                body_tx.closed().await;
            }
        } else if let Some(response_tx) = self.response_tx.as_mut() {
            response_tx.closed().await;
        }
    }

    async fn finish(&mut self) -> MediaResult<()> {
        self.body_tx = None;
        Ok(())
    }

    async fn reject(&mut self, error: &MediaError) {
        let response = ApiError::from_media(MediaOperation::Conversion, error).into_response();
        if self.respond(response).is_err() {
            tracing::debug!("client left before the error response was sent");
        }
        self.body_tx = None;
    }

    async fn abort(&mut self) {
        if let Some(body_tx) = self.body_tx.take() {
            let _ = body_tx
                .send(Err(io::Error::other("conversion aborted")))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use axum::body::to_bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn begin_sends_a_streaming_attachment() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        sink.begin(&AttachmentHead::for_title("Song (Official)")).await?;
        let response = response_rx.await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Song Official.mp3\""
        );

        sink.write(Bytes::from_static(b"ID3")).await?;
        sink.write(Bytes::from_static(b"frame")).await?;
        sink.finish().await?;
        drop(sink);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"ID3frame");
        Ok(())
    }

    #[tokio::test]
    async fn unicode_titles_survive_in_the_header() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        sink.begin(&AttachmentHead::for_title("Café Ünïcode")).await?;
        let response = response_rx.await?;
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION].as_bytes(),
            "attachment; filename=\"Café Ünïcode.mp3\"".as_bytes()
        );
        Ok(())
    }

    #[tokio::test]
    async fn reject_sends_a_problem_document() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        sink.reject(&MediaError::Timeout {
            after: Duration::from_secs(120),
        })
        .await;
        let response = response_rx.await?;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let problem: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(problem["status"], 504);
        assert!(
            problem["detail"]
                .as_str()
                .is_some_and(|detail| detail.starts_with("Conversion failed: "))
        );
        Ok(())
    }

    #[tokio::test]
    async fn abort_fails_the_body() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        sink.begin(&AttachmentHead::for_title("x")).await?;
        let response = response_rx.await?;
        sink.write(Bytes::from_static(b"partial")).await?;
        sink.abort().await;
        let outcome = to_bytes(response.into_body(), usize::MAX).await;
        assert!(outcome.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_body_closes_the_sink() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        sink.begin(&AttachmentHead::for_title("x")).await?;
        drop(response_rx.await?);
        tokio::time::timeout(Duration::from_secs(1), sink.closed())
            .await
            .map_err(|_| anyhow!("sink did not observe the disconnect"))?;
        assert!(matches!(
            sink.write(Bytes::from_static(b"late")).await,
            Err(MediaError::ClientDisconnected)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_handler_closes_the_sink_before_headers() -> Result<()> {
        let (mut sink, response_rx) = ChannelSink::channel();
        drop(response_rx);
        tokio::time::timeout(Duration::from_secs(1), sink.closed())
            .await
            .map_err(|_| anyhow!("sink did not observe the disconnect"))?;
        assert!(
            sink.begin(&AttachmentHead::for_title("x"))
                .await
                .is_err()
        );
        Ok(())
    }
}
