//! Conversation message endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use parley_core::{ChatMessage, Role, UserDirectory};
use parley_delivery::AppendMessage;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub from_user_id: Option<String>,
    #[serde(default)]
    pub to_user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageResponse {
    pub conversation_id: String,
    pub message_count: usize,
}

/// `POST /api/v1/conversations/:id/messages`
///
/// Assistant messages are narrated before they are appended so the ADDED
/// delivery can carry the narration.
pub async fn post_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }

    if req.role == Role::Assistant {
        let notify = match req.to_user_id.as_deref() {
            Some(user_id) => state
                .users
                .resolve_delivery_id(user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(user_id, error = %e, "Recipient lookup failed, narrating silently");
                    None
                }),
            None => None,
        };
        state
            .narrator
            .narrate_and_cache(
                &conversation_id,
                &req.content,
                req.persona.as_deref(),
                notify.as_deref(),
            )
            .await;
    }

    let mut append = AppendMessage::new(
        conversation_id.as_str(),
        ChatMessage::new(req.role, req.content),
    );
    append.from_user_id = req.from_user_id;
    append.to_user_id = req.to_user_id;
    append.title = req.title;

    let (message_count, _persist) = state.conversations.append(append);
    info!(
        conversation_id = %conversation_id,
        role = %req.role,
        message_count,
        "Message appended"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PostMessageResponse {
            conversation_id,
            message_count,
        }),
    ))
}
