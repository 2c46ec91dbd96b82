use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use confab_types::api::{Claims, EditMessageRequest, PageQuery, SendMessageRequest};

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn send(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (message, outbox) =
        blocking(move || engine.send_message(claims.sub, conversation_id, &req)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let messages = blocking(move || {
        engine.list_messages(claims.sub, conversation_id, page.page, page.page_size)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn edit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (message, outbox) = blocking(move || {
        engine.edit_message(claims.sub, conversation_id, message_id, &req.content)
    })
    .await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(Json(message))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox =
        blocking(move || engine.delete_message(claims.sub, conversation_id, message_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Recall is the narrated variant of delete with a much shorter window.
pub async fn recall(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox =
        blocking(move || engine.recall_message(claims.sub, conversation_id, message_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}
