//! Catalog browsing
//!
//! GET /games/rows, GET /games/:bgg_id, GET /export.csv

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Datelike;

use crate::db::games::{self, GameWithRecommendations};
use crate::error::{ApiError, ApiResult};
use crate::filter::{browse, BrowseQuery, BrowseResult};
use crate::AppState;

/// Parse the raw pairs against the current year
pub(crate) fn browse_query(pairs: &[(String, String)]) -> BrowseQuery {
    BrowseQuery::from_pairs(pairs, i64::from(chrono::Local::now().year()))
}

/// Filter committed catalog data
pub(crate) async fn run_browse(state: &AppState, query: &BrowseQuery) -> ApiResult<BrowseResult> {
    let catalog = games::load_catalog(&state.db).await?;
    Ok(browse(&catalog, query))
}

/// GET /games/rows
///
/// Repeated `categories` keys are allowed, so the query is read as raw pairs.
pub async fn game_rows(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<BrowseResult>> {
    let query = browse_query(&pairs);
    let result = run_browse(&state, &query).await?;
    tracing::debug!(count = result.count, page = result.page, "Browse query");
    Ok(Json(result))
}

/// GET /games/:bgg_id
pub async fn game_detail(
    State(state): State<AppState>,
    Path(bgg_id): Path<String>,
) -> ApiResult<Json<GameWithRecommendations>> {
    games::get_game(&state.db, &bgg_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Game not found: {}", bgg_id)))
}

/// Build browsing routes
pub fn game_routes() -> Router<AppState> {
    Router::new()
        .route("/games/rows", get(game_rows))
        .route("/games/:bgg_id", get(game_detail))
        .route("/export.csv", get(super::export::export_csv))
}
