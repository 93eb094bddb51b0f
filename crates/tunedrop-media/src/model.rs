//! Request, metadata and transfer types shared by the pipeline stages.

use std::ffi::OsString;

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Label used when the metadata document carries no title.
pub const UNTITLED: &str = "Untitled";
/// Filename stem used when sanitization leaves nothing behind.
pub const FALLBACK_FILENAME: &str = "audio";
/// Content type of every converted download.
pub const AUDIO_MPEG: &str = "audio/mpeg";

const ENCODER_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-vn",
    "-c:a",
    "libmp3lame",
    "-b:a",
    "128k",
    "-f",
    "mp3",
    "pipe:1",
];

/// How the retrieval tool is asked to behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Emit one JSON metadata document on stdout.
    Metadata,
    /// Emit the best audio-bearing format on stdout.
    Stream,
}

/// One invocation of the retrieval tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    source_url: String,
    mode: RetrievalMode,
}

impl RetrievalRequest {
    /// Validate the URL and build a request.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::InvalidInput`] when the URL is empty or whitespace.
    pub fn new(source_url: &str, mode: RetrievalMode) -> MediaResult<Self> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(MediaError::InvalidInput {
                field: "url",
                reason: "must not be empty",
            });
        }
        Ok(Self {
            source_url: source_url.to_string(),
            mode,
        })
    }

    /// Source URL with surrounding whitespace removed.
    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Mode of this invocation.
    #[must_use]
    pub const fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Argument vector for the retrieval tool. The URL always follows `--`.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        let flags: &[&str] = match self.mode {
            RetrievalMode::Metadata => &[
                "--dump-single-json",
                "--no-check-certificates",
                "--no-warnings",
                "--prefer-free-formats",
            ],
            RetrievalMode::Stream => &[
                "-o",
                "-",
                "-f",
                "bestaudio",
                "--no-check-certificates",
                "--no-warnings",
            ],
        };
        flags
            .iter()
            .copied()
            .chain(["--", self.source_url.as_str()])
            .map(OsString::from)
            .collect()
    }
}

/// Fixed encoder arguments: read stdin, drop video, 128 kbit/s MP3 to stdout.
#[must_use]
pub fn encoder_args() -> Vec<OsString> {
    ENCODER_ARGS.iter().map(OsString::from).collect()
}

/// Normalized description of a media asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMetadata {
    /// Display title.
    pub title: String,
    /// Thumbnail URL, empty when unknown.
    #[serde(rename = "thumbnail")]
    pub thumbnail_url: String,
    /// Uploader or channel name, empty when unknown.
    pub author: String,
    /// Whole seconds, `0` when unknown.
    #[serde(rename = "lengthSeconds")]
    pub duration_seconds: u64,
}

/// Subset of the retrieval tool's metadata document that the service reads.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawMetadata {
    title: Option<String>,
    thumbnail: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
}

impl From<RawMetadata> for MediaMetadata {
    fn from(raw: RawMetadata) -> Self {
        let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        Self {
            title: non_empty(raw.title).unwrap_or_else(|| UNTITLED.to_string()),
            thumbnail_url: raw.thumbnail.unwrap_or_default(),
            author: non_empty(raw.uploader)
                .or_else(|| non_empty(raw.channel))
                .unwrap_or_default(),
            duration_seconds: raw.duration.map_or(0, whole_seconds),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_seconds(duration: f64) -> u64 {
    if duration.is_finite() && duration > 0.0 {
        duration.round() as u64
    } else {
        0
    }
}

/// Reduce a title to a filename-safe stem.
///
/// Keeps letters, digits, `-` and whitespace; whitespace runs collapse to one
/// space and the result is trimmed. Returns [`FALLBACK_FILENAME`] when nothing
/// survives. Applying it twice gives the same result as applying it once.
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let normalized = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        normalized
    }
}

/// Response metadata for a download, fixed before the first byte is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentHead {
    filename: String,
    content_type: &'static str,
}

impl AttachmentHead {
    /// Build the head for an MP3 named after `title`.
    #[must_use]
    pub fn for_title(title: &str) -> Self {
        Self {
            filename: format!("{}.mp3", sanitize_title(title)),
            content_type: AUDIO_MPEG,
        }
    }

    /// Sanitized filename including the extension.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// MIME type of the body.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// `Content-Disposition` header value.
    #[must_use]
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Per-request bookkeeping that guarantees a single response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferState {
    headers_sent: bool,
    ended: bool,
    error_reported: bool,
    bytes_sent: u64,
}

impl TransferState {
    /// Whether the response head has been committed.
    #[must_use]
    pub const fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Whether the response completed normally.
    #[must_use]
    pub const fn ended(&self) -> bool {
        self.ended
    }

    /// Whether an error has already been reported to the client.
    #[must_use]
    pub const fn error_reported(&self) -> bool {
        self.error_reported
    }

    /// Body bytes handed to the client so far.
    #[must_use]
    pub const fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub(crate) const fn mark_headers_sent(&mut self) {
        self.headers_sent = true;
    }

    pub(crate) const fn mark_ended(&mut self) {
        self.ended = true;
    }

    pub(crate) const fn mark_error_reported(&mut self) {
        self.error_reported = true;
    }

    pub(crate) const fn add_bytes(&mut self, bytes: u64) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes);
    }
}
