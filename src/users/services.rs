use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::users::dto::TokenPair;
use crate::users::jwt::JwtKeys;
use crate::users::repo::User;

/// Registration pre-check: the username and email must both be free. Done
/// before creation so the client gets a 409 instead of a storage-level
/// unique violation.
pub async fn ensure_identity_available(
    db: &PgPool,
    username: &str,
    email: &str,
) -> ApiResult<()> {
    let taken = User::find_by_identity(db, Some(username), Some(email))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .is_some();
    if taken {
        warn!(%username, "duplicate registration attempt");
        return Err(ApiError::Conflict(
            "User with email or username already exists".into(),
        ));
    }
    Ok(())
}

/// Sign a fresh access/refresh pair and persist the refresh token as the
/// user's single live session. Only the refresh-token column is written.
pub async fn issue_pair(db: &PgPool, keys: &JwtKeys, user_id: Uuid) -> ApiResult<TokenPair> {
    let user = User::find_by_id(db, user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| {
            ApiError::Internal("Something went wrong while generating tokens".into())
        })?;

    let access_token = keys
        .sign_access(user.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let refresh_token = keys
        .sign_refresh(user.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    User::set_refresh_token(db, user.id, &refresh_token)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Reuse detection: the presented refresh token must exactly equal the one
/// stored on the user. Anything else (cleared by logout, or already rotated
/// away) is treated as expired or used.
pub(crate) fn ensure_current(stored: Option<&str>, presented: &str) -> ApiResult<()> {
    match stored {
        Some(current) if current == presented => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Refresh token is expired or used".into(),
        )),
    }
}

/// Exchange a refresh token for a new pair. The old token becomes invalid
/// the moment the new pair is persisted, even if its expiry is far away.
pub async fn rotate_refresh(
    db: &PgPool,
    keys: &JwtKeys,
    incoming: Option<&str>,
) -> ApiResult<(User, TokenPair)> {
    let incoming = incoming
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Refresh token is required".into()))?;

    let claims = keys.verify_refresh(incoming).map_err(|e| {
        warn!(error = %e, "refresh token failed verification");
        ApiError::Unauthorized("Invalid refresh token".into())
    })?;

    let user = User::find_by_id(db, claims.sub)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    ensure_current(user.refresh_token.as_deref(), incoming)?;

    let pair = issue_pair(db, keys, user.id).await?;
    info!(user_id = %user.id, "refresh token rotated");
    Ok((user, pair))
}

/// Drop the stored refresh token unconditionally; used by logout.
pub async fn revoke(db: &PgPool, user_id: Uuid) -> ApiResult<()> {
    User::clear_refresh_token(db, user_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(user_id = %user_id, "refresh token revoked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn matching_stored_token_is_accepted() {
        assert!(ensure_current(Some("r1"), "r1").is_ok());
    }

    #[test]
    fn rotated_away_token_is_rejected_as_used() {
        // after a successful rotation the store holds r2; replaying r1 must fail
        let err = ensure_current(Some("r2"), "r1").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn cleared_store_rejects_any_token() {
        // logout clears the column; the previously issued token is dead
        let err = ensure_current(None, "r1").unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
