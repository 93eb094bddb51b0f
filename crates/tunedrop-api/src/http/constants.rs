//! Shared HTTP constants (headers, problem URIs, buffering).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://tunedrop.dev/problems/bad-request";
pub(crate) const PROBLEM_LOOKUP_FAILED: &str = "https://tunedrop.dev/problems/lookup-failed";
pub(crate) const PROBLEM_CONVERSION_FAILED: &str =
    "https://tunedrop.dev/problems/conversion-failed";
pub(crate) const PROBLEM_TIMEOUT: &str = "https://tunedrop.dev/problems/timeout";
pub(crate) const PROBLEM_INTERNAL: &str = "https://tunedrop.dev/problems/internal";

/// Encoded chunks buffered between the conversion task and the response body.
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 8;

pub(crate) const URL_REQUIRED: &str = "URL is required";
