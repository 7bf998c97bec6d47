use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use orbit_db::users::UserWithPassword;
use orbit_gateway::Identity;
use orbit_types::api::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse};
use orbit_types::models::User;

use crate::{ApiError, ApiResult, AppState};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("first and last name are required".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Hash(e.to_string()))?
        .to_string();

    let user = state
        .store(move |db| db.create_user(&req.username, &password_hash, &req.first_name, &req.last_name))
        .await?;
    info!("Registered user {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(tokens_for(&state, &user)?)))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Json<TokenResponse>> {
    let username = req.username.clone();
    let found = state
        .store(move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let user = verify_password(found, &req.password)?;
    if !user.is_active {
        return Err(orbit_gateway::AuthError::AccountLocked.into());
    }

    Ok(Json(tokens_for(&state, &user)?))
}

/// Exchanges a refresh token for a new access token.
pub async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> ApiResult<Json<TokenResponse>> {
    let (identity, token) = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(TokenResponse {
        user_id: identity.user_id,
        token,
        refresh_token: req.refresh_token,
    }))
}

/// Restores a soft-deleted account after checking its password. Friendships
/// come back with it, so every affected friend set is invalidated.
pub async fn recover_account(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let username = req.username.clone();
    let found = state
        .store(move |db| db.get_deleted_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let user = verify_password(found, &req.password)?;
    let report = state.store(move |db| db.recover_account(user.id)).await?;
    info!("Recovered account {} ({} rows restored)", report.user_id, report.rows);

    let (user, friends) = state
        .store(move |db| Ok((db.get_user(report.user_id)?, db.friends_of(report.user_id)?)))
        .await?;
    let user = user.ok_or(ApiError::Unauthorized)?;

    // Friend sets rebuilt while the account was gone leave it out.
    state.invalidate_friend_sets(user.id, &friends).await;
    Ok(Json(tokens_for(&state, &user)?))
}

fn verify_password(found: UserWithPassword, password: &str) -> ApiResult<User> {
    let parsed_hash = PasswordHash::new(&found.password_hash).map_err(|e| ApiError::Hash(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;
    Ok(found.user)
}

fn tokens_for(state: &AppState, user: &User) -> ApiResult<TokenResponse> {
    let identity = Identity::from(user);
    Ok(TokenResponse {
        user_id: user.id,
        token: state.auth.issue_access(&identity)?,
        refresh_token: state.auth.issue_refresh(&identity)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_db::Database;

    fn stored(password: &str) -> UserWithPassword {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string();
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("ana", &password_hash, "Ana", "Lee").unwrap();
        UserWithPassword { user, password_hash }
    }

    #[test]
    fn password_check() {
        assert!(verify_password(stored("correct horse"), "correct horse").is_ok());
        assert!(matches!(
            verify_password(stored("correct horse"), "wrong password"),
            Err(ApiError::Unauthorized)
        ));
    }
}
