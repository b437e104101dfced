use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::error;

use crate::state::AppState;

/// Serve a stored media blob. Public: references are unguessable digests.
pub async fn download_media(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let (bytes, content_type) = state
        .messenger
        .media()
        .read(&reference)
        .await
        .map_err(|e| {
            error!("media read failed for {}: {}", reference, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        bytes,
    ))
}
