use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::auth::password;
use crate::error::ApiError;

/// Value of `password_hash` before the first `set_password` call. It parses
/// as no valid Argon2 hash, so no password ever verifies against it.
pub const PLACEHOLDER_HASH: &str = "default-hash";

const USERNAME_MAX: usize = 80;
const BIO_MAX: usize = 500;
const IMAGE_URL_MAX: usize = 200;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: String,
    pub image_url: String,
}

/// A user that passed field validation but has not been persisted yet.
/// The hash field is private: the password is write-only, settable through
/// `set_password` and readable by nobody.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    password_hash: String,
    pub bio: String,
    pub image_url: String,
}

impl NewUser {
    pub fn new(username: &str, bio: &str, image_url: &str) -> Result<Self, ApiError> {
        if username.is_empty() {
            return Err(ApiError::Validation("Username cannot be empty".into()));
        }
        if username.chars().count() > USERNAME_MAX {
            return Err(ApiError::Validation(format!(
                "Username must be at most {USERNAME_MAX} characters long"
            )));
        }
        if bio.chars().count() > BIO_MAX {
            return Err(ApiError::Validation(format!(
                "Bio must be at most {BIO_MAX} characters long"
            )));
        }
        if image_url.chars().count() > IMAGE_URL_MAX {
            return Err(ApiError::Validation(format!(
                "Image URL must be at most {IMAGE_URL_MAX} characters long"
            )));
        }
        Ok(Self {
            username: username.to_string(),
            password_hash: PLACEHOLDER_HASH.to_string(),
            bio: bio.to_string(),
            image_url: image_url.to_string(),
        })
    }

    pub fn set_password(&mut self, plain: &str) -> anyhow::Result<()> {
        self.password_hash = password::hash_password(plain)?;
        Ok(())
    }
}

impl User {
    pub fn verify_password(&self, plain: &str) -> anyhow::Result<bool> {
        password::verify_password(plain, &self.password_hash)
    }

    /// Insert a validated user. A duplicate username fails atomically on the
    /// unique constraint and surfaces as `UsernameTaken`, never a partial row.
    pub async fn insert(db: &PgPool, new: &NewUser) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, bio, image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, bio, image_url
            "#,
        )
        .bind(&new.username)
        .bind(&new.password_hash)
        .bind(&new.bio)
        .bind(&new.image_url)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::UsernameTaken
            } else {
                ApiError::Internal(e.into())
            }
        })
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, bio, image_url
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, bio, image_url
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Delete a user and all of their recipes in one transaction. Not exposed
    /// over HTTP; the recipes foreign key has no implicit cascade, so owner
    /// removal has to go through this.
    pub async fn delete_with_recipes(db: &PgPool, user_id: i64) -> anyhow::Result<()> {
        let mut tx = db.begin().await?;
        sqlx::query("DELETE FROM recipes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn new_user_rejects_empty_username() {
        let err = NewUser::new("", "", "").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn new_user_rejects_overlong_fields() {
        assert!(NewUser::new(&"x".repeat(81), "", "").is_err());
        assert!(NewUser::new("chef1", &"x".repeat(501), "").is_err());
        assert!(NewUser::new("chef1", "", &"x".repeat(201)).is_err());
        assert!(NewUser::new(&"x".repeat(80), &"x".repeat(500), &"x".repeat(200)).is_ok());
    }

    #[test]
    fn new_user_defaults_to_placeholder_hash() {
        let user = NewUser::new("chef1", "", "").expect("valid user");
        assert_eq!(user.password_hash, PLACEHOLDER_HASH);
    }

    #[test]
    fn set_password_replaces_placeholder_with_verifiable_hash() {
        let mut new = NewUser::new("chef1", "", "").expect("valid user");
        new.set_password("pw123").expect("hashing should succeed");
        assert_ne!(new.password_hash, PLACEHOLDER_HASH);
        assert_ne!(new.password_hash, "pw123");
        assert!(password::verify_password("pw123", &new.password_hash).expect("valid hash"));
    }

    #[test]
    fn no_password_verifies_against_the_placeholder() {
        let user = User {
            id: 1,
            username: "chef1".into(),
            password_hash: PLACEHOLDER_HASH.into(),
            bio: String::new(),
            image_url: String::new(),
        };
        // The placeholder is not a parseable hash, so this errors rather
        // than ever returning true.
        assert!(user.verify_password("pw123").is_err());
    }

    #[test]
    fn user_serialization_omits_the_hash() {
        let user = User {
            id: 7,
            username: "chef1".into(),
            password_hash: "$argon2id$secret".into(),
            bio: "I cook".into(),
            image_url: String::new(),
        };
        let value = serde_json::to_value(&user).expect("serializes");
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["username"], "chef1");
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
