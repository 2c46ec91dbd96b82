use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use confab_types::api::{
    AddMembersRequest, Claims, CreateGroupRequest, CreateSingleRequest, MarkReadRequest,
    MuteRequest, TransferOwnershipRequest, UpdateConversationRequest, UpdateRoleRequest,
};

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn create_single(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateSingleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (summary, outbox) = blocking(move || engine.create_single(claims.sub, req.peer_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (summary, outbox) = blocking(move || {
        engine.create_group(claims.sub, &req.name, &req.member_ids, req.avatar_url.as_deref())
    })
    .await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let summaries = blocking(move || engine.list_conversations(claims.sub)).await?;
    Ok(Json(summaries))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let summary =
        blocking(move || engine.get_conversation_summary(claims.sub, conversation_id)).await?;
    Ok(Json(summary))
}

/// DELETE on a conversation hides it for the caller only; history and the
/// other members are untouched.
pub async fn hide(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    blocking(move || engine.hide_conversation(claims.sub, conversation_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(patch): Json<UpdateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (view, outbox) =
        blocking(move || engine.update_conversation(claims.sub, conversation_id, &patch)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(Json(view))
}

pub async fn add_members(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddMembersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (added, outbox) =
        blocking(move || engine.add_members(claims.sub, conversation_id, &req.user_ids)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(Json(serde_json::json!({ "added": added })))
}

pub async fn remove_member(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox =
        blocking(move || engine.remove_member(claims.sub, conversation_id, user_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox =
        blocking(move || engine.update_role(claims.sub, conversation_id, user_id, req.role))
            .await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transfer_ownership(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<TransferOwnershipRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox = blocking(move || {
        engine.transfer_ownership(claims.sub, conversation_id, req.new_owner_id)
    })
    .await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn disband(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox = blocking(move || engine.disband(claims.sub, conversation_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let outbox = blocking(move || engine.leave(claims.sub, conversation_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let (last_read, outbox) =
        blocking(move || engine.mark_read(claims.sub, conversation_id, req.message_id)).await?;
    state.dispatcher.publish_all(outbox.into_items()).await;
    Ok(Json(serde_json::json!({ "last_read_message_id": last_read })))
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    let pinned = blocking(move || engine.toggle_pin(claims.sub, conversation_id)).await?;
    Ok(Json(serde_json::json!({ "pinned": pinned })))
}

pub async fn mute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<MuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    blocking(move || engine.mute(claims.sub, conversation_id, req.duration_secs)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine.clone();
    blocking(move || engine.unmute(claims.sub, conversation_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
