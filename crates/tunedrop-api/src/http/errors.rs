//! RFC9457-style API error wrapper.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tunedrop_media::MediaError;

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_CONVERSION_FAILED, PROBLEM_INTERNAL, PROBLEM_LOOKUP_FAILED,
    PROBLEM_TIMEOUT,
};
use crate::models::ProblemDetails;

/// Which operation a media failure happened in; picks the problem type and the
/// detail prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaOperation {
    Lookup,
    Conversion,
}

impl MediaOperation {
    const fn problem(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Lookup => (
                PROBLEM_LOOKUP_FAILED,
                "metadata lookup failed",
                "Failed to fetch info",
            ),
            Self::Conversion => (
                PROBLEM_CONVERSION_FAILED,
                "conversion failed",
                "Conversion failed",
            ),
        }
    }
}

/// Structured API error rendered as a problem document.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    detail: Option<String>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(detail)
    }

    pub(crate) fn gateway_timeout(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, PROBLEM_TIMEOUT, "request timed out")
            .with_detail(detail)
    }

    /// Map a media failure onto a response: invalid input is the caller's fault,
    /// an elapsed deadline is a gateway timeout, everything else is a 500.
    pub(crate) fn from_media(operation: MediaOperation, error: &MediaError) -> Self {
        let (kind, title, prefix) = operation.problem();
        let detail = format!("{prefix}: {}", error.detail());
        match error {
            MediaError::InvalidInput { .. } => Self::bad_request(detail),
            MediaError::Timeout { .. } => Self::gateway_timeout(detail),
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, kind, title).with_detail(detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            error: self.detail.clone(),
            detail: self.detail,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn media_errors_map_to_statuses() {
        let retrieval = MediaError::Retrieval {
            code: Some(1),
            stderr: "ERROR: Unsupported URL".to_string(),
        };
        let lookup = ApiError::from_media(MediaOperation::Lookup, &retrieval);
        assert_eq!(lookup.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(lookup.kind, PROBLEM_LOOKUP_FAILED);
        assert_eq!(
            lookup.detail.as_deref(),
            Some("Failed to fetch info: yt-dlp exited with code 1: ERROR: Unsupported URL")
        );

        let conversion = ApiError::from_media(MediaOperation::Conversion, &retrieval);
        assert_eq!(conversion.kind, PROBLEM_CONVERSION_FAILED);
        assert!(
            conversion
                .detail
                .as_deref()
                .is_some_and(|detail| detail.starts_with("Conversion failed: "))
        );

        let timeout = MediaError::Timeout {
            after: Duration::from_secs(120),
        };
        let timed_out = ApiError::from_media(MediaOperation::Conversion, &timeout);
        assert_eq!(timed_out.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timed_out.kind, PROBLEM_TIMEOUT);

        let invalid = MediaError::InvalidInput {
            field: "url",
            reason: "must not be empty",
        };
        assert_eq!(
            ApiError::from_media(MediaOperation::Lookup, &invalid).status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn problem_documents_use_rfc9457_field_names() -> Result<(), serde_json::Error> {
        let response = ApiError::bad_request("URL is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = ProblemDetails {
            kind: PROBLEM_BAD_REQUEST.to_string(),
            title: "bad request".to_string(),
            status: 400,
            detail: Some("URL is required".to_string()),
            error: Some("URL is required".to_string()),
        };
        let value = serde_json::to_value(&body)?;
        assert_eq!(value["type"], PROBLEM_BAD_REQUEST);
        assert_eq!(value["status"], 400);
        assert_eq!(value["detail"], "URL is required");
        assert_eq!(value["error"], "URL is required");
        Ok(())
    }
}
