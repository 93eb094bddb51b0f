//! Wire models returned by the HTTP surface.

use serde::{Deserialize, Serialize};

/// RFC9457 problem document returned for every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Occurrence-specific explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Extension member mirroring `detail` for clients that read `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: String,
    /// Build identifier recorded at startup.
    pub build: String,
    /// Conversions currently in flight.
    pub active_conversions: i64,
}

/// Query string accepted by `/info` and `/convert`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct UrlQuery {
    pub(crate) url: Option<String>,
}

impl UrlQuery {
    /// The trimmed URL, or `None` when absent or blank.
    pub(crate) fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
