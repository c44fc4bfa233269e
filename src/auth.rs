use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::{Database, User};
use crate::error::{Error, Result};

pub const MIN_USERNAME_LENGTH: usize = 4;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 50;

/// A bearer token issued on register or login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: String,
}

pub async fn register(
    db: &Database,
    config: &AuthConfig,
    username: &str,
    password: &str,
) -> Result<Session> {
    check_length("username", username, MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH)?;
    check_length("password", password, MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH)?;

    let password = password.to_string();
    let cost = config.bcrypt_cost;
    let password_hash =
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;

    let user = db.create_user(username, &password_hash).await?;
    info!("Registered user {} ({})", user.username, user.id);

    start_session(db, config, user).await
}

pub async fn login(
    db: &Database,
    config: &AuthConfig,
    username: &str,
    password: &str,
) -> Result<Session> {
    let user = db
        .get_user_by_username(username)
        .await?
        .ok_or(Error::InvalidCredentials)?;

    let password = password.to_string();
    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    if !matches {
        debug!("Wrong password for {}", username);
        return Err(Error::InvalidCredentials);
    }

    start_session(db, config, user).await
}

pub async fn logout(db: &Database, token: &str) -> Result<()> {
    db.delete_token(token).await
}

/// Resolve a bearer token to its user.
pub async fn authenticate(db: &Database, token: &str) -> Result<User> {
    db.get_user_for_token(token)
        .await?
        .ok_or_else(|| Error::Unauthorized("Invalid or expired token".to_string()))
}

async fn start_session(db: &Database, config: &AuthConfig, mut user: User) -> Result<Session> {
    db.update_last_login(user.id).await?;
    let purged = db.delete_expired_tokens().await?;
    if purged > 0 {
        debug!("Purged {} expired tokens", purged);
    }

    let token = Uuid::new_v4().to_string();
    let expires_at = (Utc::now() + Duration::hours(config.token_ttl_hours))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    db.insert_token(&token, user.id, &expires_at).await?;

    if let Some(refreshed) = db.get_user_by_username(&user.username).await? {
        user = refreshed;
    }

    Ok(Session {
        token,
        user,
        expires_at,
    })
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(Error::InvalidPayload(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}
