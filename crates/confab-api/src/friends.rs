use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use confab_types::api::{Claims, FriendRequestCreate, FriendView};
use confab_types::error::Error;
use confab_types::time::now_ts;

use crate::AppState;
use crate::error::{ApiError, blocking};

pub async fn create_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FriendRequestCreate>,
) -> Result<impl IntoResponse, ApiError> {
    if req.addressee_id == claims.sub {
        return Err(Error::validation("cannot befriend yourself").into());
    }

    let db = state.db.clone();
    let view = blocking(move || {
        let requester = claims.sub.to_string();
        let addressee = req.addressee_id.to_string();

        let target = db
            .get_user_by_id(&addressee)?
            .ok_or_else(|| Error::not_found("user not found"))?;

        if db.friendship_between(&requester, &addressee)?.is_some() {
            return Err(Error::conflict("a relationship already exists"));
        }

        let id = Uuid::new_v4();
        db.insert_friend_request(&id.to_string(), &requester, &addressee, &now_ts())?;

        Ok(FriendView {
            request_id: id,
            user_id: req.addressee_id,
            username: target.username,
            accepted: false,
        })
    })
    .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn accept_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        let friendship = db
            .get_friendship(&request_id.to_string())?
            .ok_or_else(|| Error::not_found("friend request not found"))?;

        // Only the addressee accepts; the requester cannot accept their own.
        if friendship.addressee_id != claims.sub.to_string() {
            return Err(Error::forbidden("not the addressee of this request"));
        }
        if friendship.status == "accepted" {
            return Err(Error::conflict("request already accepted"));
        }

        db.accept_friendship(&request_id.to_string())?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let views = blocking(move || {
        let rows = db.list_friendships(&claims.sub.to_string())?;
        let views = rows
            .into_iter()
            .map(|(f, username)| {
                let other = if f.requester_id == claims.sub.to_string() {
                    &f.addressee_id
                } else {
                    &f.requester_id
                };
                FriendView {
                    request_id: f.id.parse().unwrap_or_default(),
                    user_id: other.parse().unwrap_or_default(),
                    username,
                    accepted: f.status == "accepted",
                }
            })
            .collect::<Vec<_>>();
        Ok(views)
    })
    .await?;

    Ok(Json(views))
}
