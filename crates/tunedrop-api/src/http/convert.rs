//! `GET /convert`: streamed MP3 download.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use tracing::{Instrument, Span, error};
use tunedrop_telemetry::{current_request_id, current_route, with_request_context};

use crate::http::constants::URL_REQUIRED;
use crate::http::errors::ApiError;
use crate::http::sink::ChannelSink;
use crate::models::UrlQuery;
use crate::state::ApiState;

/// Starts the conversion on its own task and answers with whatever the sink
/// produces first: the streaming attachment or a problem document.
///
/// The task outlives this handler once streaming starts; it ends when the body is
/// complete, the client drops it, or the conversion deadline passes.
pub(crate) async fn convert(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UrlQuery>,
) -> Response {
    let Some(url) = query.url().map(str::to_string) else {
        return ApiError::bad_request(URL_REQUIRED).into_response();
    };
    let (mut sink, response_rx) = ChannelSink::channel();
    let conversions = state.conversions.clone();
    let request_id = current_request_id().unwrap_or_default();
    let route = current_route().unwrap_or_default();

    tokio::spawn(
        with_request_context(request_id, route, async move {
            // Failures have already been reported through the sink and logged.
            let _ = conversions.convert(&url, &mut sink).await;
        })
        .instrument(Span::current()),
    );

    match response_rx.await {
        Ok(response) => response,
        Err(_) => {
            error!("conversion task ended without producing a response");
            ApiError::internal("conversion ended without a response").into_response()
        }
    }
}
