//! Game catalog storage
//!
//! Write helpers take a connection so the apply stage can run them all
//! inside one transaction. Read helpers take the pool and only ever see
//! committed rows.

use crate::models::records::{GameDetail, GameType, PlayerCountVotes};
use bggweb_common::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;

/// Columns written from a Top-N or collection entry
#[derive(Debug, Clone, PartialEq)]
pub struct GameUpsert {
    pub bgg_id: String,
    pub title: String,
    pub game_type: GameType,
    pub avg_rating: Option<f64>,
    pub num_voters: Option<i64>,
}

/// Create or update by `bgg_id`; an empty title keeps the stored one
pub async fn upsert_game(conn: &mut SqliteConnection, game: &GameUpsert) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO games (bgg_id, title, game_type, avg_rating, num_voters)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(bgg_id) DO UPDATE SET
            title = CASE WHEN excluded.title = '' THEN games.title ELSE excluded.title END,
            game_type = excluded.game_type,
            avg_rating = excluded.avg_rating,
            num_voters = excluded.num_voters,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#,
    )
    .bind(&game.bgg_id)
    .bind(&game.title)
    .bind(game.game_type.as_str())
    .bind(game.avg_rating)
    .bind(game.num_voters)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Overwrite detail columns and replace categories, families and recommendations
pub async fn write_details(conn: &mut SqliteConnection, detail: &GameDetail) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE games
        SET year = ?, weight = ?, weight_votes = ?, bgg_rank = ?,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        WHERE bgg_id = ?
        "#,
    )
    .bind(detail.year)
    .bind(detail.weight)
    .bind(detail.weight_votes)
    .bind(detail.bgg_rank)
    .bind(&detail.bgg_id)
    .execute(&mut *conn)
    .await?;

    replace_vocabulary(conn, Vocabulary::Categories, &detail.bgg_id, &detail.categories).await?;
    replace_vocabulary(conn, Vocabulary::Families, &detail.bgg_id, &detail.families).await?;
    replace_recommendations(conn, &detail.bgg_id, &detail.player_counts).await?;
    Ok(())
}

#[derive(Clone, Copy)]
enum Vocabulary {
    Categories,
    Families,
}

impl Vocabulary {
    /// (vocabulary table, link table, link column)
    fn tables(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Vocabulary::Categories => ("categories", "game_categories", "category_id"),
            Vocabulary::Families => ("families", "game_families", "family_id"),
        }
    }
}

async fn replace_vocabulary(
    conn: &mut SqliteConnection,
    vocabulary: Vocabulary,
    bgg_id: &str,
    names: &[String],
) -> Result<()> {
    let (table, link, column) = vocabulary.tables();

    sqlx::query(&format!("DELETE FROM {} WHERE bgg_id = ?", link))
        .bind(bgg_id)
        .execute(&mut *conn)
        .await?;

    for name in names.iter().filter(|n| !n.is_empty()) {
        sqlx::query(&format!("INSERT OR IGNORE INTO {} (name) VALUES (?)", table))
            .bind(name)
            .execute(&mut *conn)
            .await?;
        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {link} (bgg_id, {column}) SELECT ?, id FROM {table} WHERE name = ?"
        ))
        .bind(bgg_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Replace the whole recommendation set for one game
pub async fn replace_recommendations(
    conn: &mut SqliteConnection,
    bgg_id: &str,
    votes: &[PlayerCountVotes],
) -> Result<()> {
    sqlx::query("DELETE FROM player_count_recommendations WHERE bgg_id = ?")
        .bind(bgg_id)
        .execute(&mut *conn)
        .await?;

    for v in votes {
        sqlx::query(
            r#"
            INSERT INTO player_count_recommendations (
                bgg_id, player_count, best_pct, best_votes, rec_pct, rec_votes,
                not_pct, not_votes, vote_count, score
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bgg_id, player_count) DO UPDATE SET
                best_pct = excluded.best_pct, best_votes = excluded.best_votes,
                rec_pct = excluded.rec_pct, rec_votes = excluded.rec_votes,
                not_pct = excluded.not_pct, not_votes = excluded.not_votes,
                vote_count = excluded.vote_count, score = excluded.score
            "#,
        )
        .bind(bgg_id)
        .bind(v.player_count)
        .bind(v.best_pct())
        .bind(v.best_votes)
        .bind(v.rec_pct())
        .bind(v.rec_votes)
        .bind(v.not_pct())
        .bind(v.not_votes)
        .bind(v.vote_count())
        .bind(v.score())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Get-or-create the user's collection and replace its membership
pub async fn replace_collection(
    conn: &mut SqliteConnection,
    username: &str,
    owned_ids: &[String],
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO collections (username) VALUES (?)")
        .bind(username)
        .execute(&mut *conn)
        .await?;
    let collection_id: i64 = sqlx::query_scalar("SELECT id FROM collections WHERE username = ?")
        .bind(username)
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM owned_games WHERE collection_id = ?")
        .bind(collection_id)
        .execute(&mut *conn)
        .await?;
    for bgg_id in owned_ids {
        sqlx::query("INSERT OR IGNORE INTO owned_games (collection_id, bgg_id) VALUES (?, ?)")
            .bind(collection_id)
            .bind(bgg_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Recompute every game's owned flag from collection membership
pub async fn recompute_owned(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE games SET owned = CASE
            WHEN EXISTS (SELECT 1 FROM owned_games og WHERE og.bgg_id = games.bgg_id) THEN 1
            ELSE 0
        END
        "#,
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A stored game
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    pub bgg_id: String,
    pub title: String,
    pub game_type: String,
    pub year: Option<i64>,
    pub avg_rating: Option<f64>,
    pub num_voters: Option<i64>,
    pub weight: Option<f64>,
    pub weight_votes: Option<i64>,
    pub bgg_rank: Option<i64>,
    pub owned: bool,
    pub categories: Vec<String>,
    pub families: Vec<String>,
    pub updated_at: String,
}

/// A stored player-count recommendation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRecord {
    pub player_count: i64,
    pub best_pct: f64,
    pub best_votes: i64,
    pub rec_pct: f64,
    pub rec_votes: i64,
    pub not_pct: f64,
    pub not_votes: i64,
    pub vote_count: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GameWithRecommendations {
    #[serde(flatten)]
    pub game: GameRecord,
    pub recommendations: Vec<RecommendationRecord>,
}

const GAME_COLUMNS: &str = "bgg_id, title, game_type, year, avg_rating, num_voters, weight, \
                            weight_votes, bgg_rank, owned, updated_at";

fn game_from_row(row: &sqlx::sqlite::SqliteRow) -> GameRecord {
    GameRecord {
        bgg_id: row.get("bgg_id"),
        title: row.get("title"),
        game_type: row.get("game_type"),
        year: row.get("year"),
        avg_rating: row.get("avg_rating"),
        num_voters: row.get("num_voters"),
        weight: row.get("weight"),
        weight_votes: row.get("weight_votes"),
        bgg_rank: row.get("bgg_rank"),
        owned: row.get::<i64, _>("owned") != 0,
        categories: Vec::new(),
        families: Vec::new(),
        updated_at: row.get("updated_at"),
    }
}

fn recommendation_from_row(row: &sqlx::sqlite::SqliteRow) -> RecommendationRecord {
    RecommendationRecord {
        player_count: row.get("player_count"),
        best_pct: row.get("best_pct"),
        best_votes: row.get("best_votes"),
        rec_pct: row.get("rec_pct"),
        rec_votes: row.get("rec_votes"),
        not_pct: row.get("not_pct"),
        not_votes: row.get("not_votes"),
        vote_count: row.get("vote_count"),
        score: row.get("score"),
    }
}

const RECOMMENDATION_COLUMNS: &str = "bgg_id, player_count, best_pct, best_votes, rec_pct, \
                                      rec_votes, not_pct, not_votes, vote_count, score";

/// (bgg_id → sorted names) for one vocabulary
async fn names_by_game(
    pool: &SqlitePool,
    vocabulary: Vocabulary,
    bgg_id: Option<&str>,
) -> Result<HashMap<String, Vec<String>>> {
    let (table, link, column) = vocabulary.tables();
    let mut sql = format!(
        "SELECT l.bgg_id, v.name FROM {link} l JOIN {table} v ON v.id = l.{column}"
    );
    if bgg_id.is_some() {
        sql.push_str(" WHERE l.bgg_id = ?");
    }
    sql.push_str(" ORDER BY v.name COLLATE NOCASE");

    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    if let Some(id) = bgg_id {
        query = query.bind(id);
    }

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (game, name) in query.fetch_all(pool).await? {
        map.entry(game).or_default().push(name);
    }
    Ok(map)
}

/// Every game with its recommendations, ordered by title
pub async fn load_catalog(pool: &SqlitePool) -> Result<Vec<GameWithRecommendations>> {
    let game_rows = sqlx::query(&format!("SELECT {} FROM games ORDER BY title", GAME_COLUMNS))
        .fetch_all(pool)
        .await?;
    let rec_rows = sqlx::query(&format!(
        "SELECT {} FROM player_count_recommendations ORDER BY bgg_id, player_count",
        RECOMMENDATION_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let mut categories = names_by_game(pool, Vocabulary::Categories, None).await?;
    let mut families = names_by_game(pool, Vocabulary::Families, None).await?;

    let mut recommendations: HashMap<String, Vec<RecommendationRecord>> = HashMap::new();
    for row in &rec_rows {
        recommendations
            .entry(row.get("bgg_id"))
            .or_default()
            .push(recommendation_from_row(row));
    }

    Ok(game_rows
        .iter()
        .map(|row| {
            let mut game = game_from_row(row);
            game.categories = categories.remove(&game.bgg_id).unwrap_or_default();
            game.families = families.remove(&game.bgg_id).unwrap_or_default();
            let recommendations = recommendations.remove(&game.bgg_id).unwrap_or_default();
            GameWithRecommendations {
                game,
                recommendations,
            }
        })
        .collect())
}

/// One game with recommendations ordered by player count
pub async fn get_game(pool: &SqlitePool, bgg_id: &str) -> Result<Option<GameWithRecommendations>> {
    let row = sqlx::query(&format!("SELECT {} FROM games WHERE bgg_id = ?", GAME_COLUMNS))
        .bind(bgg_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut game = game_from_row(&row);
    game.categories = names_by_game(pool, Vocabulary::Categories, Some(bgg_id))
        .await?
        .remove(bgg_id)
        .unwrap_or_default();
    game.families = names_by_game(pool, Vocabulary::Families, Some(bgg_id))
        .await?
        .remove(bgg_id)
        .unwrap_or_default();

    let recommendations = sqlx::query(&format!(
        "SELECT {} FROM player_count_recommendations WHERE bgg_id = ? ORDER BY player_count",
        RECOMMENDATION_COLUMNS
    ))
    .bind(bgg_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(recommendation_from_row)
    .collect();

    Ok(Some(GameWithRecommendations {
        game,
        recommendations,
    }))
}

pub async fn count_games(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM games")
        .fetch_one(pool)
        .await?)
}
