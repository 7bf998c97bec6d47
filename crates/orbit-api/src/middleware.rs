use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, Cookie, HeaderMapExt, authorization::Bearer};
use tracing::{debug, warn};

use orbit_gateway::{Authenticator, Credentials, Identity};
use orbit_types::models::UserRole;

use crate::{ApiError, AppState};

pub const ACCESS_COOKIE: &str = "token";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Reads the access token from `Authorization: Bearer` (falling back to the
/// `token` cookie) and the refresh token from the `refreshToken` cookie.
pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let cookies = headers.typed_get::<Cookie>();
    let cookie = |name: &str| cookies.as_ref().and_then(|c| c.get(name)).map(str::to_string);

    let access = headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .or_else(|| cookie(ACCESS_COOKIE));

    Credentials {
        access,
        refresh: cookie(REFRESH_COOKIE),
    }
}

/// Verifies the caller and stores their `Identity` in the request extensions.
/// When the access token had to be renewed from the refresh token, the new
/// one is set as the `token` cookie on the response.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let credentials = credentials_from_headers(req.headers());
    if credentials.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    let verified = state.auth.verify(&credentials).await.map_err(|e| {
        debug!("Rejected request to {}: {}", req.uri().path(), e);
        ApiError::from(e)
    })?;

    req.extensions_mut().insert(verified.identity);
    let mut response = next.run(req).await;

    if let Some(access) = verified.renewed_access {
        match HeaderValue::from_str(&format!("{}={}; Path=/; HttpOnly", ACCESS_COOKIE, access)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!("Could not set renewed access cookie: {}", e),
        }
    }
    Ok(response)
}

pub fn require_admin(identity: &Identity) -> Result<(), ApiError> {
    if identity.role == UserRole::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin only".into()))
    }
}
