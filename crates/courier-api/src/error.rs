use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use courier_gateway::ChatError;
use courier_types::api::ErrorResponse;

/// `ChatError` rendered as `{ "error": ... }` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) | ChatError::SelfChat => StatusCode::BAD_REQUEST,
            // Non-participants see the same answer as for a missing chat.
            ChatError::RecipientNotFound(_) | ChatError::ChatNotFound | ChatError::NotParticipant(..) => {
                StatusCode::NOT_FOUND
            }
            ChatError::MediaIngestion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            ChatError::NotParticipant(..) => ChatError::ChatNotFound.to_string(),
            ChatError::Persistence(e) => {
                error!("request failed: {:?}", e);
                self.0.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::events::ActionError;

    #[test]
    fn statuses_follow_the_error_kind() {
        let cases = [
            (ChatError::Authentication("expired".into()), StatusCode::UNAUTHORIZED),
            (ChatError::Validation(ActionError::EmptyMessage), StatusCode::BAD_REQUEST),
            (ChatError::SelfChat, StatusCode::BAD_REQUEST),
            (ChatError::RecipientNotFound(9), StatusCode::NOT_FOUND),
            (ChatError::NotParticipant(1, 2), StatusCode::NOT_FOUND),
            (ChatError::MediaIngestion("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ChatError::Persistence(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
