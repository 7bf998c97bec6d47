use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use orbit_db::{Database, StoreError};
use orbit_types::api::Claims;
use orbit_types::models::{User, UserRole};

const ACCESS_TOKEN_HOURS: i64 = 1;
const REFRESH_TOKEN_DAYS: i64 = 30;

/// What a client presented: an access token, a refresh token, or both.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl Credentials {
    pub fn access(token: impl Into<String>) -> Self {
        Self {
            access: Some(token.into()),
            refresh: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            first_name: claims.first_name,
            last_name: claims.last_name,
            role: claims.role,
        }
    }
}

/// A successful verification. `renewed_access` is set when the access token
/// was missing or expired and the refresh token was used instead.
#[derive(Debug, Clone)]
pub struct Verified {
    pub identity: Identity,
    pub renewed_access: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("account is locked")]
    AccountLocked,
    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("auth task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Turns a presented credential into an identity.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Verified, AuthError>;
}

/// HS256 access/refresh tokens with separate secrets. Locked or deleted
/// accounts are rejected even when their token is still valid.
pub struct JwtAuthenticator {
    db: Arc<Database>,
    access_secret: String,
    refresh_secret: String,
}

impl JwtAuthenticator {
    pub fn new(db: Arc<Database>, access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            db,
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
        }
    }

    pub fn issue_access(&self, identity: &Identity) -> Result<String, AuthError> {
        issue(&self.access_secret, identity, Duration::hours(ACCESS_TOKEN_HOURS))
    }

    pub fn issue_refresh(&self, identity: &Identity) -> Result<String, AuthError> {
        issue(&self.refresh_secret, identity, Duration::days(REFRESH_TOKEN_DAYS))
    }

    /// Exchanges a refresh token for a new access token. The new token
    /// carries the stored role and names, not the refresh token's.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(Identity, String), AuthError> {
        let claims = validate(&self.refresh_secret, refresh_token).ok_or(AuthError::InvalidCredential)?;
        let user = self.active_user(claims.sub).await?;
        let identity = Identity::from(&user);
        let access = self.issue_access(&identity)?;
        Ok((identity, access))
    }

    async fn active_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let db = self.db.clone();
        match tokio::task::spawn_blocking(move || db.get_user(user_id)).await?? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::AccountLocked),
        }
    }

    async fn ensure_active(&self, user_id: Uuid) -> Result<(), AuthError> {
        let db = self.db.clone();
        let active = tokio::task::spawn_blocking(move || db.is_user_active(user_id)).await??;
        if active {
            Ok(())
        } else {
            Err(AuthError::AccountLocked)
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify(&self, credentials: &Credentials) -> Result<Verified, AuthError> {
        if let Some(claims) = credentials.access.as_deref().and_then(|t| validate(&self.access_secret, t)) {
            let identity = Identity::from(claims);
            self.ensure_active(identity.user_id).await?;
            return Ok(Verified {
                identity,
                renewed_access: None,
            });
        }

        match credentials.refresh.as_deref() {
            Some(refresh) => {
                debug!("Access token missing or expired, trying refresh token");
                let (identity, access) = self.refresh(refresh).await?;
                Ok(Verified {
                    identity,
                    renewed_access: Some(access),
                })
            }
            None => Err(AuthError::InvalidCredential),
        }
    }
}

fn issue(secret: &str, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
    let claims = Claims {
        sub: identity.user_id,
        first_name: identity.first_name.clone(),
        last_name: identity.last_name.clone(),
        role: identity.role,
        exp: (Utc::now() + ttl).timestamp() as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn validate(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (JwtAuthenticator, Identity) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = db.create_user("ana", "hash", "Ana", "Lee").unwrap();
        let auth = JwtAuthenticator::new(db, "access-secret", "refresh-secret");
        (auth, Identity::from(&user))
    }

    #[tokio::test]
    async fn access_token_round_trip() {
        let (auth, identity) = setup();
        let token = auth.issue_access(&identity).unwrap();

        let verified = auth.verify(&Credentials::access(token)).await.unwrap();
        assert_eq!(verified.identity, identity);
        assert!(verified.renewed_access.is_none());
    }

    #[tokio::test]
    async fn refresh_token_renews_access() {
        let (auth, identity) = setup();
        let refresh = auth.issue_refresh(&identity).unwrap();

        let verified = auth
            .verify(&Credentials {
                access: Some("garbage".into()),
                refresh: Some(refresh),
            })
            .await
            .unwrap();
        assert_eq!(verified.identity.user_id, identity.user_id);
        let renewed = verified.renewed_access.unwrap();
        assert!(auth.verify(&Credentials::access(renewed)).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_picks_up_role_changes() {
        let (auth, identity) = setup();
        let refresh = auth.issue_refresh(&identity).unwrap();
        auth.db.set_user_role(identity.user_id, UserRole::Admin).unwrap();

        let (renewed, access) = auth.refresh(&refresh).await.unwrap();
        assert_eq!(renewed.role, UserRole::Admin);
        let verified = auth.verify(&Credentials::access(access)).await.unwrap();
        assert_eq!(verified.identity.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn locked_account_cannot_refresh() {
        let (auth, identity) = setup();
        let refresh = auth.issue_refresh(&identity).unwrap();
        auth.db.set_user_active(identity.user_id, false).unwrap();

        let err = auth.refresh(&refresh).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
    }

    #[tokio::test]
    async fn tokens_are_not_interchangeable() {
        let (auth, identity) = setup();
        let refresh = auth.issue_refresh(&identity).unwrap();
        let err = auth.verify(&Credentials::access(refresh)).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn locked_account_is_rejected() {
        let (auth, identity) = setup();
        let token = auth.issue_access(&identity).unwrap();
        auth.db.set_user_active(identity.user_id, false).unwrap();

        let err = auth.verify(&Credentials::access(token)).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountLocked));
    }

    #[tokio::test]
    async fn no_credentials_is_invalid() {
        let (auth, _) = setup();
        let err = auth.verify(&Credentials::default()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
    }
}
