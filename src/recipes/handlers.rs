use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::session::AuthSession,
    error::ApiError,
    recipes::{
        dto::{CreateRecipeRequest, RecipeResponse},
        repo::{NewRecipe, Recipe, INSTRUCTIONS_MIN},
    },
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/recipes", get(list_recipes).post(create_recipe))
}

#[instrument(skip(state, session))]
pub async fn list_recipes(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<Json<Vec<RecipeResponse>>, ApiError> {
    let recipes = Recipe::list_by_owner(&state.db, session.user_id).await?;
    Ok(Json(recipes.into_iter().map(RecipeResponse::from).collect()))
}

#[instrument(skip(state, session, payload))]
pub async fn create_recipe(
    State(state): State<AppState>,
    session: AuthSession,
    Json(payload): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeResponse>), ApiError> {
    // Checked here and again in NewRecipe::new; both must hold before the
    // insert is attempted.
    if payload.title.is_empty()
        || payload.instructions.is_empty()
        || payload.instructions.chars().count() < INSTRUCTIONS_MIN
    {
        warn!(user_id = session.user_id, "rejected invalid recipe payload");
        return Err(ApiError::Validation("Invalid recipe data".into()));
    }

    let new_recipe = NewRecipe::new(
        &payload.title,
        &payload.instructions,
        payload.minutes_to_complete,
    )?;
    let recipe = Recipe::insert(&state.db, session.user_id, &new_recipe).await?;

    info!(user_id = session.user_id, recipe_id = recipe.id, "recipe created");
    Ok((StatusCode::CREATED, Json(RecipeResponse::from(recipe))))
}
