//! Apply stage
//!
//! Writes everything a job fetched in one transaction. Either every game,
//! recommendation set and ownership change commits, or nothing does.

use crate::db::games::{self, GameUpsert};
use crate::error::JobError;
use crate::models::records::{CollectionEntry, GameDetail, TopEntry};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Collection fetched for `username`
#[derive(Debug, Clone, Default)]
pub struct CollectionFetch {
    pub username: String,
    pub entries: Vec<CollectionEntry>,
}

/// Everything a job collected before Apply
#[derive(Debug, Clone, Default)]
pub struct ApplyInput {
    pub top: Vec<TopEntry>,
    pub collection: Option<CollectionFetch>,
    /// Complete details keyed by id; ids missing here keep their stored details
    pub details: HashMap<String, GameDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub games_written: u64,
    pub details_written: u64,
}

impl ApplyInput {
    /// Games to write: Top-N order first, then collection-only games.
    /// Collection values win for games present in both.
    pub fn merged_games(&self) -> Vec<GameUpsert> {
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, GameUpsert> = HashMap::new();

        for entry in &self.top {
            if merged.contains_key(&entry.bgg_id) {
                continue;
            }
            order.push(entry.bgg_id.clone());
            merged.insert(
                entry.bgg_id.clone(),
                GameUpsert {
                    bgg_id: entry.bgg_id.clone(),
                    title: entry.title.clone(),
                    game_type: entry.game_type,
                    avg_rating: entry.avg_rating,
                    num_voters: entry.num_voters,
                },
            );
        }

        for entry in self.collection.iter().flat_map(|c| &c.entries) {
            match merged.get_mut(&entry.bgg_id) {
                Some(game) => {
                    if !entry.title.is_empty() {
                        game.title = entry.title.clone();
                    }
                    game.game_type = entry.game_type;
                    if entry.avg_rating.is_some() {
                        game.avg_rating = entry.avg_rating;
                    }
                    if entry.num_voters.is_some() {
                        game.num_voters = entry.num_voters;
                    }
                }
                None => {
                    order.push(entry.bgg_id.clone());
                    merged.insert(
                        entry.bgg_id.clone(),
                        GameUpsert {
                            bgg_id: entry.bgg_id.clone(),
                            title: entry.title.clone(),
                            game_type: entry.game_type,
                            avg_rating: entry.avg_rating,
                            num_voters: entry.num_voters,
                        },
                    );
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| merged.remove(&id))
            .collect()
    }

    /// Ids whose details the Details phase must fetch, in apply order
    pub fn target_ids(&self) -> Vec<String> {
        self.merged_games().into_iter().map(|g| g.bgg_id).collect()
    }

    /// Distinct ids owned in the fetched collection
    fn owned_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.collection
            .iter()
            .flat_map(|c| &c.entries)
            .filter(|e| seen.insert(e.bgg_id.clone()))
            .map(|e| e.bgg_id.clone())
            .collect()
    }
}

/// Commit `input` atomically, reporting games written after each one
///
/// Any storage error rolls the whole transaction back.
pub async fn apply<F>(pool: &SqlitePool, input: &ApplyInput, mut on_progress: F) -> Result<ApplySummary, JobError>
where
    F: FnMut(u64),
{
    let games_to_write = input.merged_games();
    let mut summary = ApplySummary {
        games_written: 0,
        details_written: 0,
    };

    let mut tx = pool.begin().await?;

    for game in &games_to_write {
        games::upsert_game(&mut tx, game).await?;
        if let Some(detail) = input.details.get(&game.bgg_id) {
            games::write_details(&mut tx, detail).await?;
            summary.details_written += 1;
        } else {
            debug!(bgg_id = %game.bgg_id, "No details; keeping stored details");
        }
        summary.games_written += 1;
        on_progress(summary.games_written);
    }

    if let Some(collection) = &input.collection {
        let owned = input.owned_ids();
        games::replace_collection(&mut tx, &collection.username, &owned).await?;
        games::recompute_owned(&mut tx).await?;
    }

    tx.commit().await?;

    info!(
        games = summary.games_written,
        with_details = summary.details_written,
        "Apply committed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::records::GameType;

    fn top(id: &str, title: &str) -> TopEntry {
        TopEntry {
            bgg_id: id.into(),
            title: title.into(),
            game_type: GameType::BaseGame,
            avg_rating: Some(7.0),
            num_voters: Some(100),
        }
    }

    fn owned(id: &str, title: &str) -> CollectionEntry {
        CollectionEntry {
            bgg_id: id.into(),
            title: title.into(),
            game_type: GameType::Expansion,
            avg_rating: Some(8.0),
            num_voters: None,
        }
    }

    #[test]
    fn merge_keeps_top_order_then_collection_extras() {
        let input = ApplyInput {
            top: vec![top("1", "One"), top("2", "Two"), top("1", "Dup")],
            collection: Some(CollectionFetch {
                username: "alice".into(),
                entries: vec![owned("3", "Three"), owned("2", "Two (owned)")],
            }),
            details: HashMap::new(),
        };

        let games = input.merged_games();
        let ids: Vec<&str> = games.iter().map(|g| g.bgg_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let two = &games[1];
        assert_eq!(two.title, "Two (owned)");
        assert_eq!(two.game_type, GameType::Expansion);
        assert_eq!(two.avg_rating, Some(8.0));
        // collection had no voter count, Top-N value kept
        assert_eq!(two.num_voters, Some(100));
        assert_eq!(games[0].title, "One");
    }

    #[test]
    fn owned_ids_are_distinct() {
        let input = ApplyInput {
            collection: Some(CollectionFetch {
                username: "bob".into(),
                entries: vec![owned("5", "x"), owned("5", "x"), owned("6", "y")],
            }),
            ..ApplyInput::default()
        };
        assert_eq!(input.owned_ids(), vec!["5".to_string(), "6".to_string()]);
        assert_eq!(input.target_ids(), vec!["5".to_string(), "6".to_string()]);
    }
}
