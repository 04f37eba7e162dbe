//! API endpoints and the error-to-response mapping.

pub mod agents;
pub mod conversations;
pub mod messages;
pub mod webhook;

pub use agents::online_agents;
pub use conversations::{
    accept_conversation, close_conversation, get_conversation, get_queue, list_conversations,
    resolve_conversation, stats_summary,
};
pub use messages::{conversation_messages, mark_message_read, send_message};
pub use webhook::receive_webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::Error;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Structured error response.
///
/// The taxonomy maps onto status codes so clients can react without parsing
/// prose: a lost claim refreshes the queue view silently, an invalid
/// transition resyncs from the reported current state.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: serde_json::Value,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": "bad_request", "message": message.into() }),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, "invalid_state_transition")
            }
            Error::AlreadyClaimed => (StatusCode::CONFLICT, "already_claimed"),
            Error::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let mut body = json!({ "error": code, "message": err.to_string() });
        if let Error::InvalidStateTransition { current } = &err {
            body["current_status"] = json!(current);
        }
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", err);
        }

        Self { status, body }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationStatus;

    #[test]
    fn test_taxonomy_status_codes() {
        let err = ApiError::from(Error::AlreadyClaimed);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.body["error"], "already_claimed");

        let err = ApiError::from(Error::PermissionDenied("nope".to_string()));
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = ApiError::from(Error::NotFound("conversation 1".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(Error::Store("disk on fire".to_string()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_transition_reports_current_state() {
        let err = ApiError::from(Error::InvalidStateTransition {
            current: ConversationStatus::Resolved,
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.body["current_status"], "resolved");
    }
}
