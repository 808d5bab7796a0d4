use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, SignupRequest, UserResponse},
        repo::{NewUser, User},
        session::{self, AuthSession},
    },
    error::ApiError,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/check_session", get(check_session))
        .route("/login", post(login))
        .route("/logout", delete(logout))
}

fn session_headers(state: &AppState, token: &str) -> Result<HeaderMap, ApiError> {
    let cfg = &state.config.session;
    let cookie = session::session_cookie(token, cfg.ttl_minutes, cfg.cookie_secure)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<(HeaderMap, Json<UserResponse>), ApiError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        warn!("signup missing username or password");
        return Err(ApiError::Validation(
            "Username and password are required".into(),
        ));
    }

    let mut new_user = NewUser::new(&payload.username, &payload.bio, &payload.image_url)?;
    new_user.set_password(&payload.password)?;

    let user = User::insert(&state.db, &new_user).await?;
    let token =
        session::create_session(&state.db, user.id, state.config.session.ttl_minutes).await?;
    let headers = session_headers(&state, &token)?;

    info!(user_id = user.id, username = %user.username, "user signed up");
    Ok((headers, Json(UserResponse::from(user))))
}

#[instrument(skip(state, session))]
pub async fn check_session(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::find_by_id(&state.db, session.user_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(UserResponse::from(user)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<LoginResponse>), ApiError> {
    // An unknown username and a wrong password produce the same response so
    // the API does not leak which usernames exist.
    let Some(user) = User::find_by_username(&state.db, &payload.username).await? else {
        warn!("login with unknown username");
        return Err(ApiError::InvalidCredentials);
    };

    if !user.verify_password(&payload.password)? {
        warn!(user_id = user.id, "login with invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let token =
        session::create_session(&state.db, user.id, state.config.session.ttl_minutes).await?;
    let headers = session_headers(&state, &token)?;

    info!(user_id = user.id, username = %user.username, "user logged in");
    Ok((
        headers,
        Json(LoginResponse {
            username: user.username,
        }),
    ))
}

#[instrument(skip(state, session))]
pub async fn logout(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    session::delete_session(&state.db, &session.token_hash).await?;

    let cookie = session::clear_session_cookie(state.config.session.cookie_secure)
        .map_err(|e| ApiError::Internal(e.into()))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    info!(user_id = session.user_id, "user logged out");
    Ok((StatusCode::NO_CONTENT, headers))
}
