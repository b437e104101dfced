use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use courier_gateway::ChatError;

use crate::error::ApiError;
use crate::state::AppState;

/// Verify the bearer token and attach the caller's `UserProfile` to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| ChatError::Authentication("missing bearer token".into()))?;

    let profile = state
        .messenger
        .authenticator()
        .authenticate(bearer.token())
        .await?;

    req.extensions_mut().insert(profile);
    Ok(next.run(req).await)
}
