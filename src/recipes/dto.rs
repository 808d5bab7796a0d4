use serde::{Deserialize, Serialize};

use crate::recipes::repo::Recipe;

/// Request body for creating a recipe. Missing strings deserialize to `""`,
/// which fails validation the same way an absent field would.
#[derive(Debug, Deserialize)]
pub struct CreateRecipeRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    pub minutes_to_complete: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub id: i64,
    pub title: String,
    pub instructions: String,
    pub minutes_to_complete: Option<i32>,
    pub user_id: i64,
}

impl From<Recipe> for RecipeResponse {
    fn from(recipe: Recipe) -> Self {
        Self {
            id: recipe.id,
            title: recipe.title,
            instructions: recipe.instructions,
            minutes_to_complete: recipe.minutes_to_complete,
            user_id: recipe.user_id,
        }
    }
}
