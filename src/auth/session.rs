use anyhow::{anyhow, Context};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

use crate::auth::repo::is_unique_violation;
use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE_NAME: &str = "recipebox_session";

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the database stores a hash.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a session token so raw values never touch the database.
/// The hash is used for lookups when the cookie is presented.
pub fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Insert a session row for the user and return the raw token.
pub async fn create_session(db: &PgPool, user_id: i64, ttl_minutes: i64) -> anyhow::Result<String> {
    let query = r#"
        INSERT INTO sessions (token_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 minute'))
    "#;

    // Token-hash collisions are astronomically unlikely; retry a few times
    // rather than failing the request on one.
    for _ in 0..3 {
        let token = generate_session_token();
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(user_id)
            .bind(ttl_minutes)
            .execute(db)
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a token hash to the owning user id. Expired rows are ignored.
pub async fn lookup_session(db: &PgPool, token_hash: &[u8]) -> anyhow::Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        SELECT user_id
        FROM sessions
        WHERE token_hash = $1 AND expires_at > NOW()
        "#,
    )
    .bind(token_hash)
    .fetch_optional(db)
    .await
    .context("failed to lookup session")?;

    Ok(row.map(|row| row.get("user_id")))
}

/// Logout is idempotent; it's fine if no rows are deleted.
pub async fn delete_session(db: &PgPool, token_hash: &[u8]) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(db)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Build a `HttpOnly` session cookie holding the raw token.
pub fn session_cookie(
    token: &str,
    ttl_minutes: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = ttl_minutes * 60;
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build a cookie that clears the session on the client.
pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

/// The authenticated session behind a request: extracted from the session
/// cookie and resolved against the sessions table. Rejects with 401 when the
/// cookie is missing, unknown, or expired.
#[derive(Debug)]
pub struct AuthSession {
    pub user_id: i64,
    pub token_hash: Vec<u8>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_session_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        let token_hash = hash_session_token(&token);
        let user_id = lookup_session(&state.db, &token_hash)
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthSession {
            user_id,
            token_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_decode_to_32_bytes() {
        let decoded = URL_SAFE_NO_PAD
            .decode(generate_session_token())
            .expect("token is valid base64");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn generated_tokens_are_unique() {
        assert_ne!(generate_session_token(), generate_session_token());
    }

    #[test]
    fn hash_session_token_is_stable() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn session_cookie_carries_expected_attributes() {
        let cookie = session_cookie("tok", 10, false).expect("valid header value");
        let cookie = cookie.to_str().expect("utf-8");
        assert!(cookie.starts_with("recipebox_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=600"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn session_cookie_marks_secure_when_configured() {
        let cookie = session_cookie("tok", 10, true).expect("valid header value");
        assert!(cookie.to_str().expect("utf-8").ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(false).expect("valid header value");
        let cookie = cookie.to_str().expect("utf-8");
        assert!(cookie.starts_with("recipebox_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn extract_session_token_finds_the_right_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; recipebox_session=abc123; lang=en"),
        );
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_session_token_ignores_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; lang=en"));
        assert_eq!(extract_session_token(&headers), None);

        let headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);
    }
}
