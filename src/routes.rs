use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth;
use crate::config::Config;
use crate::db::{Database, FeedFilter, User};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::handler::FeedDataHandler;
use crate::persist::append_topic;

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/feeds", get(list_public_feeds).post(create_feed))
        .route("/feeds/mine", get(list_my_feeds))
        .route(
            "/feeds/:id",
            get(feed_details).patch(update_feed).delete(delete_feed),
        )
        .route("/feeds/:id/topics", post(add_topic))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

// Error responses
pub struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidPayload(_) | Error::InvalidTopic(_) => StatusCode::BAD_REQUEST,
        Error::NoDataFound(_) | Error::TopicLimitExceeded { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::DuplicateTopic(_) | Error::Conflict(_) => StatusCode::CONFLICT,
        Error::FetchFailed(_) => StatusCode::BAD_GATEWAY,
        Error::Unauthorized(_) | Error::InvalidCredentials => StatusCode::UNAUTHORIZED,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Persistence(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The caller identified by an `Authorization: Bearer` token.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| Error::Unauthorized("Missing bearer token".to_string()))?;
        let user = auth::authenticate(&state.db, &token).await?;
        Ok(AuthUser { user, token })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// Route handlers
pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let session = auth::register(
        &state.db,
        &state.config.auth,
        &credentials.username,
        &credentials.password,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, AppError> {
    let session = auth::login(
        &state.db,
        &state.config.auth,
        &credentials.username,
        &credentials.password,
    )
    .await?;
    Ok(Json(session))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    auth::logout(&state.db, &caller.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The body is parsed here rather than by the `Json` extractor so malformed
/// input gets the same error shape as every other validation failure.
pub async fn create_feed(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::InvalidPayload(format!("body is not valid JSON: {}", e)))?;

    let created = FeedDataHandler::new(&state.db, &state.fetcher)
        .process_request(caller.user.id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub per_page: Option<i64>,
    pub topic: Option<String>,
}

fn default_page() -> i64 {
    1
}

impl ListQuery {
    fn per_page(&self, config: &Config) -> i64 {
        self.per_page
            .unwrap_or(config.listing.per_page)
            .clamp(1, config.listing.max_per_page.max(1))
    }
}

pub async fn list_public_feeds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = FeedFilter {
        is_public: Some(true),
        topic: query.topic.clone(),
        ..Default::default()
    };
    let page = state
        .db
        .list_feeds(&filter, query.page, query.per_page(&state.config))
        .await?;
    Ok(Json(page))
}

pub async fn list_my_feeds(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = FeedFilter {
        user_id: Some(caller.user.id),
        topic: query.topic.clone(),
        ..Default::default()
    };
    let page = state
        .db
        .list_feeds(&filter, query.page, query.per_page(&state.config))
        .await?;
    Ok(Json(page))
}

pub async fn feed_details(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    caller: Option<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = caller.map(|c| c.user.id);
    let details = state.db.get_feed_details(feed_id, viewer).await?;
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFeed {
    pub feed_name: Option<String>,
    pub is_public: Option<bool>,
}

pub async fn update_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    caller: AuthUser,
    Json(update): Json<UpdateFeed>,
) -> Result<impl IntoResponse, AppError> {
    let feed = state
        .db
        .update_feed(
            feed_id,
            caller.user.id,
            update.feed_name.as_deref(),
            update.is_public,
        )
        .await?;
    Ok(Json(feed))
}

pub async fn delete_feed(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    caller: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.db.delete_feed(feed_id, caller.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct NewTopic {
    #[serde(default)]
    pub name: String,
}

pub async fn add_topic(
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
    caller: AuthUser,
    Json(topic): Json<NewTopic>,
) -> Result<impl IntoResponse, AppError> {
    let topic = append_topic(&state.db, feed_id, caller.user.id, &topic.name).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}
