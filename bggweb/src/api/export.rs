//! CSV export of the current browse page

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use super::games::{browse_query, run_browse};
use crate::error::{ApiError, ApiResult};
use crate::filter::GameRow;
use crate::AppState;

pub const EXPORT_FILENAME: &str = "player_count_data.csv";

pub const CSV_HEADER: [&str; 23] = [
    "Score Factor",
    "Game Title",
    "Game ID",
    "Year",
    "BGG Rank",
    "Average Rating",
    "Number of Voters",
    "Weight",
    "Weight Votes",
    "Owned",
    "Type",
    "Categories",
    "Player Count",
    "Best %",
    "Best Votes",
    "Rec. %",
    "Rec. Votes",
    "Not %",
    "Not Votes",
    "Total Votes",
    "Player Count Score (unadjusted)",
    "Player Count Score",
    "Playable",
];

const MISSING: &str = "N/A";

fn float(value: f64) -> String {
    format!("{:?}", value)
}

fn opt_float(value: Option<f64>) -> String {
    value.map(float).unwrap_or_else(|| MISSING.to_string())
}

fn opt_int(value: Option<i64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

fn csv_record(row: &GameRow) -> Vec<String> {
    vec![
        float(row.score_factor),
        row.title.clone(),
        row.game_id.clone(),
        opt_int(row.year),
        opt_int(row.bgg_rank),
        opt_float(row.avg_rating),
        opt_int(row.num_voters),
        opt_float(row.weight),
        opt_int(row.weight_votes),
        if row.owned { "Owned" } else { "Not Owned" }.to_string(),
        row.game_type.clone(),
        row.categories_str(),
        row.player_count.to_string(),
        float(row.best_pct),
        row.best_votes.to_string(),
        float(row.rec_pct),
        row.rec_votes.to_string(),
        float(row.not_pct),
        row.not_votes.to_string(),
        row.total_votes.to_string(),
        float(row.pc_score_unadj),
        float(row.pc_score),
        row.playable_label().to_string(),
    ]
}

/// Render rows as CSV with the fixed header
pub fn render_csv(rows: &[GameRow]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for row in rows {
        writer.write_record(csv_record(row))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// GET /export.csv
///
/// Takes the same filters as /games/rows and exports that page.
pub async fn export_csv(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let query = browse_query(&pairs);
    let result = run_browse(&state, &query).await?;
    let body = render_csv(&result.rows)
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {}", e)))?;

    tracing::info!(rows = result.rows.len(), "Exported CSV");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
            ),
        ],
        body,
    )
        .into_response())
}
