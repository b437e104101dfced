pub mod chats;
pub mod error;
pub mod media;
pub mod middleware;
pub mod state;

use axum::{Router, routing::get};

pub use error::ApiError;
pub use state::{AppState, AppStateInner};

/// HTTP routes: authenticated chat/message endpoints plus public media.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/messages", get(chats::list_messages))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/media/{reference}", get(media::download_media))
        .merge(protected)
        .with_state(state)
}
