pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use courier_api::{ApiError, AppStateInner};
use courier_db::Database;
use courier_gateway::ChatError;
use courier_gateway::auth::Authenticator;
use courier_gateway::connection;
use courier_gateway::dispatcher::Dispatcher;
use courier_gateway::media::MediaStore;
use courier_gateway::messenger::Messenger;

use crate::config::ServerConfig;

/// Headroom on top of the media cap for base64 expansion and the JSON envelope.
const FRAME_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
struct ServerState {
    messenger: Messenger,
    max_frame_bytes: usize,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Open the store and media directory and wire up the shared services.
pub async fn build_messenger(config: &ServerConfig) -> anyhow::Result<Messenger> {
    let db = Arc::new(Database::open(&config.db_path)?);
    let auth = Authenticator::new(&config.jwt_secret, db.clone());
    let media = MediaStore::new(config.media_dir.clone(), &config.public_url, config.max_media_bytes).await?;
    Ok(Messenger::new(db, auth, media, Dispatcher::new()))
}

/// The full router: HTTP API, live gateway and health check.
pub fn app(messenger: Messenger, max_media_bytes: usize) -> Router {
    let api = courier_api::router(Arc::new(AppStateInner {
        messenger: messenger.clone(),
    }));

    let state = ServerState {
        messenger,
        max_frame_bytes: max_media_bytes / 3 * 4 + FRAME_OVERHEAD,
    };
    let gateway = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state);

    Router::new()
        .merge(api)
        .merge(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Authenticate before upgrading; a refused credential never reaches the
/// connection registry.
async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Query(query): Query<GatewayQuery>,
) -> Response {
    let token = match (&bearer, &query.token) {
        (Some(TypedHeader(Authorization(bearer))), _) => bearer.token().to_string(),
        (None, Some(token)) => token.clone(),
        (None, None) => {
            warn!("gateway upgrade without credentials refused");
            return ApiError(ChatError::Authentication("missing bearer token".into())).into_response();
        }
    };

    let user = match state.messenger.authenticator().authenticate(&token).await {
        Ok(user) => user,
        Err(e) => {
            warn!("gateway upgrade refused: {}", e);
            return ApiError(e).into_response();
        }
    };

    let messenger = state.messenger;
    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| connection::handle_connection(socket, messenger, user))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
