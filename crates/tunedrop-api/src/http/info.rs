//! `GET /info`: metadata lookup.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use tunedrop_media::MediaMetadata;

use crate::http::constants::URL_REQUIRED;
use crate::http::errors::{ApiError, MediaOperation};
use crate::models::UrlQuery;
use crate::state::ApiState;

pub(crate) async fn info(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<MediaMetadata>, ApiError> {
    let url = query.url().ok_or_else(|| ApiError::bad_request(URL_REQUIRED))?;
    state
        .conversions
        .lookup(url)
        .await
        .map(Json)
        .map_err(|err| ApiError::from_media(MediaOperation::Lookup, &err))
}
