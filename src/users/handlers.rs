use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    response::ApiResponse,
    state::AppState,
    storage::upload_image,
    users::{
        cookies::{clear_cookie, cookie_value, session_cookie, ACCESS_COOKIE, REFRESH_COOKIE},
        dto::{
            AuthPayload, ChangePasswordRequest, ChannelProfile, LoginRequest, PublicUser,
            RefreshRequest, RegisterForm, TokenPair, UpdateAccountRequest, UploadedFile,
            WatchHistoryVideo,
        },
        extractors::AuthUser,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::User,
        services,
    },
};

const UPLOAD_BODY_LIMIT: usize = 8 * 1024 * 1024; // avatar + cover in one request

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh))
        .route("/change-password", post(change_password))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)))
        .route(
            "/cover-image",
            patch(update_cover_image).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
}

pub fn graph_routes() -> Router<AppState> {
    Router::new()
        .route("/channel/:username", get(channel_profile))
        .route("/history", get(watch_history))
}

// --- helpers ---

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::Internal(e.to_string())
}

async fn load_user(db: &PgPool, id: Uuid) -> ApiResult<User> {
    User::find_by_id(db, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))
}

fn set_session_cookies(
    state: &AppState,
    pair: &TokenPair,
) -> AppendHeaders<[(header::HeaderName, String); 2]> {
    let jwt = &state.config.jwt;
    AppendHeaders([
        (
            header::SET_COOKIE,
            session_cookie(
                ACCESS_COOKIE,
                &pair.access_token,
                (jwt.access_ttl_minutes as u64) * 60,
            ),
        ),
        (
            header::SET_COOKIE,
            session_cookie(
                REFRESH_COOKIE,
                &pair.refresh_token,
                (jwt.refresh_ttl_days as u64) * 24 * 3600,
            ),
        ),
    ])
}

fn clear_session_cookies() -> AppendHeaders<[(header::HeaderName, String); 2]> {
    AppendHeaders([
        (header::SET_COOKIE, clear_cookie(ACCESS_COOKIE)),
        (header::SET_COOKIE, clear_cookie(REFRESH_COOKIE)),
    ])
}

async fn collect_register_form(mp: &mut Multipart) -> ApiResult<RegisterForm> {
    let mut form = RegisterForm::default();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("username") => form.username = Some(field.text().await.map_err(bad_multipart)?),
            Some("email") => form.email = Some(field.text().await.map_err(bad_multipart)?),
            Some("fullName") => form.full_name = Some(field.text().await.map_err(bad_multipart)?),
            Some("password") => form.password = Some(field.text().await.map_err(bad_multipart)?),
            Some("avatar") => form.avatar = Some(read_file(field).await?),
            Some("coverImage") => form.cover_image = Some(read_file(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

async fn read_file(field: axum::extract::multipart::Field<'_>) -> ApiResult<UploadedFile> {
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(bad_multipart)?;
    Ok(UploadedFile { body, content_type })
}

/// Pull exactly one file field with the given name out of a multipart body.
async fn single_file(mp: &mut Multipart, field_name: &str) -> ApiResult<Option<UploadedFile>> {
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some(field_name) {
            return Ok(Some(read_file(field).await?));
        }
    }
    Ok(None)
}

// --- session controller ---

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let form = collect_register_form(&mut mp).await?;
    let input = form.validate()?;

    services::ensure_identity_available(&state.db, &input.username, &input.email).await?;

    let avatar_file = form
        .avatar
        .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;

    // upload failures surface as None
    let avatar_url = upload_image(
        state.media.as_ref(),
        "avatars",
        avatar_file.body,
        &avatar_file.content_type,
    )
    .await
    .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;

    let cover_url = match form.cover_image {
        Some(file) => upload_image(state.media.as_ref(), "covers", file.body, &file.content_type).await,
        None => None,
    };

    let password_hash = hash_password(&input.password).map_err(internal)?;
    let user = User::create(
        &state.db,
        &input,
        &password_hash,
        &avatar_url,
        cover_url.as_deref(),
    )
    .await
    .map_err(internal)?;

    let created = User::find_by_id(&state.db, user.id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::Internal("Something went wrong while registering the user".into())
        })?;

    info!(user_id = %created.id, username = %created.username, "user registered");
    Ok(ApiResponse::created(
        PublicUser::from(created),
        "User registered successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    payload.validate()?;

    let user = User::find_by_identity(
        &state.db,
        payload.username.as_deref(),
        payload.email.as_deref(),
    )
    .await
    .map_err(internal)?
    .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    let ok = verify_password(&payload.password, &user.password_hash).map_err(internal)?;
    if !ok {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("Invalid user credentials".into()));
    }

    let keys = JwtKeys::from_ref(&state);
    let pair = services::issue_pair(&state.db, &keys, user.id).await?;
    let cookies = set_session_cookies(&state, &pair);

    info!(user_id = %user.id, "user logged in");
    Ok((
        cookies,
        ApiResponse::ok(
            AuthPayload {
                user: PublicUser::from(user),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<impl IntoResponse> {
    services::revoke(&state.db, user_id).await?;
    info!(user_id = %user_id, "user logged out");
    Ok((
        clear_session_cookies(),
        ApiResponse::ok(json!({}), "User logged out"),
    ))
}

#[instrument(skip(state, headers, body))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<impl IntoResponse> {
    let incoming = cookie_value(&headers, REFRESH_COOKIE)
        .map(|t| t.to_string())
        .or_else(|| body.and_then(|Json(b)| b.refresh_token));

    let keys = JwtKeys::from_ref(&state);
    let (user, pair) = services::rotate_refresh(&state.db, &keys, incoming.as_deref()).await?;
    let cookies = set_session_cookies(&state, &pair);

    info!(user_id = %user.id, "access token refreshed");
    Ok((
        cookies,
        ApiResponse::ok(pair, "Access token refreshed"),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<serde_json::Value>> {
    payload.validate()?;
    let user = load_user(&state.db, user_id).await?;

    let ok = verify_password(&payload.old_password, &user.password_hash).map_err(internal)?;
    if !ok {
        return Err(ApiError::BadRequest("Invalid old password".into()));
    }

    let new_hash = hash_password(&payload.new_password).map_err(internal)?;
    User::update_password(&state.db, user.id, &new_hash)
        .await
        .map_err(internal)?;

    info!(user_id = %user.id, "password changed");
    Ok(ApiResponse::ok(json!({}), "Password changed successfully"))
}

// --- profile controller ---

#[instrument(skip(state))]
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<ApiResponse<PublicUser>> {
    let user = load_user(&state.db, user_id).await?;
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Current user fetched successfully",
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateAccountRequest>,
) -> ApiResult<ApiResponse<PublicUser>> {
    payload.validate()?;

    let user = User::update_account(
        &state.db,
        user_id,
        payload.full_name.as_deref(),
        payload.email.as_deref(),
    )
    .await
    .map_err(internal)?
    .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;

    info!(user_id = %user.id, "account details updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Account details updated successfully",
    ))
}

#[instrument(skip(state, mp))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let file = single_file(&mut mp, "avatar")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Avatar file is required".into()))?;

    let url = upload_image(state.media.as_ref(), "avatars", file.body, &file.content_type)
        .await
        .ok_or_else(|| ApiError::BadRequest("Error while uploading avatar".into()))?;

    let user = User::update_avatar(&state.db, user_id, &url)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;

    info!(user_id = %user.id, "avatar updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Avatar updated successfully",
    ))
}

#[instrument(skip(state, mp))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> ApiResult<ApiResponse<PublicUser>> {
    let file = single_file(&mut mp, "coverImage")
        .await?
        .ok_or_else(|| ApiError::BadRequest("Cover image file is required".into()))?;

    let url = upload_image(state.media.as_ref(), "covers", file.body, &file.content_type)
        .await
        .ok_or_else(|| ApiError::BadRequest("Error while uploading cover image".into()))?;

    let user = User::update_cover_image(&state.db, user_id, &url)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid access token".into()))?;

    info!(user_id = %user.id, "cover image updated");
    Ok(ApiResponse::ok(
        PublicUser::from(user),
        "Cover image updated successfully",
    ))
}

// --- graph query service ---

#[instrument(skip(state))]
pub async fn channel_profile(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    if username.trim().is_empty() {
        return Err(ApiError::BadRequest("Username is missing".into()));
    }

    let profile = User::channel_profile(&state.db, username.trim(), viewer)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::NotFound("Channel does not exist".into()))?;

    Ok(ApiResponse::ok(profile, "User channel fetched successfully"))
}

#[instrument(skip(state))]
pub async fn watch_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<ApiResponse<Vec<WatchHistoryVideo>>> {
    let videos = User::watch_history(&state.db, user_id)
        .await
        .map_err(internal)?;
    Ok(ApiResponse::ok(
        videos,
        "Watch history fetched successfully",
    ))
}
