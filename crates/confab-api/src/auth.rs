use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use confab_types::api::{
    Claims, LoginRequest, LoginResponse, PresenceSettingRequest, RegisterRequest, RegisterResponse,
};
use confab_types::error::Error;
use confab_types::time::now_ts;

use crate::error::{ApiError, blocking};
use crate::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(Error::validation("username must be 3-32 characters").into());
    }
    if req.password.len() < 8 {
        return Err(Error::validation("password must be at least 8 characters").into());
    }

    let db = state.db.clone();
    let username = req.username.clone();
    let taken = blocking(move || Ok(db.get_user_by_username(&username)?.is_some())).await?;
    if taken {
        return Err(Error::conflict("username is taken").into());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| Error::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.db.clone();
    let username = req.username.clone();
    blocking(move || {
        db.create_user(&user_id.to_string(), &username, &password_hash, &now_ts())?;
        Ok(())
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(Error::Internal)
        .map_err(ApiError)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user_id, token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.clone();
    let user = blocking(move || Ok(db.get_user_by_username(&username)?)).await?
        .ok_or_else(|| Error::forbidden("invalid credentials"))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| Error::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| Error::forbidden("invalid credentials"))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| Error::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)
        .map_err(Error::Internal)
        .map_err(ApiError)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// Presence privacy: `everyone` or `nobody`; consulted by the gateway
/// before publishing online/offline transitions.
pub async fn update_presence_setting(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PresenceSettingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || {
        db.set_presence_visibility(&claims.sub.to_string(), req.visibility.as_str())?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
