use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::ApiError;

const TITLE_MAX: usize = 200;
pub const INSTRUCTIONS_MIN: usize = 50;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub title: String,
    pub instructions: String,
    pub minutes_to_complete: Option<i32>,
    pub user_id: i64,
}

/// A recipe that passed field validation but has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub instructions: String,
    pub minutes_to_complete: Option<i32>,
}

impl NewRecipe {
    pub fn new(
        title: &str,
        instructions: &str,
        minutes_to_complete: Option<i32>,
    ) -> Result<Self, ApiError> {
        if title.is_empty() {
            return Err(ApiError::Validation("Title cannot be empty".into()));
        }
        if title.chars().count() > TITLE_MAX {
            return Err(ApiError::Validation(format!(
                "Title must be at most {TITLE_MAX} characters long"
            )));
        }
        if instructions.chars().count() < INSTRUCTIONS_MIN {
            return Err(ApiError::Validation(format!(
                "Instructions must be at least {INSTRUCTIONS_MIN} characters long"
            )));
        }
        Ok(Self {
            title: title.to_string(),
            instructions: instructions.to_string(),
            minutes_to_complete,
        })
    }
}

impl Recipe {
    /// Insert a validated recipe owned by `user_id`. The owning user comes
    /// from the session, never from the request body.
    pub async fn insert(db: &PgPool, user_id: i64, new: &NewRecipe) -> anyhow::Result<Recipe> {
        let recipe = sqlx::query_as::<_, Recipe>(
            r#"
            INSERT INTO recipes (title, instructions, minutes_to_complete, user_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, instructions, minutes_to_complete, user_id
            "#,
        )
        .bind(&new.title)
        .bind(&new.instructions)
        .bind(new.minutes_to_complete)
        .bind(user_id)
        .fetch_one(db)
        .await?;
        Ok(recipe)
    }

    pub async fn list_by_owner(db: &PgPool, user_id: i64) -> anyhow::Result<Vec<Recipe>> {
        let rows = sqlx::query_as::<_, Recipe>(
            r#"
            SELECT id, title, instructions, minutes_to_complete, user_id
            FROM recipes
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_title() {
        let err = NewRecipe::new("", &"x".repeat(50), None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn rejects_overlong_title() {
        assert!(NewRecipe::new(&"x".repeat(201), &"x".repeat(50), None).is_err());
        assert!(NewRecipe::new(&"x".repeat(200), &"x".repeat(50), None).is_ok());
    }

    #[test]
    fn instructions_length_boundary_is_50() {
        assert!(NewRecipe::new("Soup", &"x".repeat(49), None).is_err());
        assert!(NewRecipe::new("Soup", &"x".repeat(50), None).is_ok());
    }

    #[test]
    fn instructions_length_counts_characters_not_bytes() {
        // 50 two-byte characters must pass even though the byte length is 100.
        let instructions = "é".repeat(50);
        assert!(NewRecipe::new("Soup", &instructions, None).is_ok());
    }

    #[test]
    fn minutes_to_complete_is_optional() {
        let recipe = NewRecipe::new("Soup", &"x".repeat(50), None).expect("valid recipe");
        assert_eq!(recipe.minutes_to_complete, None);

        let recipe = NewRecipe::new("Soup", &"x".repeat(50), Some(30)).expect("valid recipe");
        assert_eq!(recipe.minutes_to_complete, Some(30));
    }
}
