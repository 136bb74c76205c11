//! Parsed records produced by the fetcher

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recommendation score at or above which a player count counts as "Playable"
pub const PLAYABLE_SCORE: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    #[serde(rename = "Base Game")]
    BaseGame,
    #[serde(rename = "Expansion")]
    Expansion,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::BaseGame => "Base Game",
            GameType::Expansion => "Expansion",
        }
    }

    /// Lenient parse: anything starting with "exp" is an expansion
    pub fn from_label(label: &str) -> Self {
        if label.trim().to_ascii_lowercase().starts_with("exp") {
            GameType::Expansion
        } else {
            GameType::BaseGame
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ranked list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEntry {
    pub bgg_id: String,
    pub title: String,
    pub game_type: GameType,
    pub avg_rating: Option<f64>,
    pub num_voters: Option<i64>,
}

/// Subtypes queried separately from the collection API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionSubtype {
    BoardGame,
    Expansion,
}

impl CollectionSubtype {
    pub const ALL: [CollectionSubtype; 2] = [CollectionSubtype::BoardGame, CollectionSubtype::Expansion];

    pub fn as_param(&self) -> &'static str {
        match self {
            CollectionSubtype::BoardGame => "boardgame",
            CollectionSubtype::Expansion => "boardgameexpansion",
        }
    }

    pub fn game_type(&self) -> GameType {
        match self {
            CollectionSubtype::BoardGame => GameType::BaseGame,
            CollectionSubtype::Expansion => GameType::Expansion,
        }
    }
}

/// One owned item of a user's collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub bgg_id: String,
    pub title: String,
    pub game_type: GameType,
    pub avg_rating: Option<f64>,
    pub num_voters: Option<i64>,
}

/// Vote tallies for one player count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCountVotes {
    pub player_count: i64,
    pub best_votes: i64,
    pub rec_votes: i64,
    pub not_votes: i64,
}

impl PlayerCountVotes {
    pub fn vote_count(&self) -> i64 {
        self.best_votes + self.rec_votes + self.not_votes
    }

    fn pct(&self, votes: i64) -> f64 {
        let total = self.vote_count();
        if total == 0 {
            return 0.0;
        }
        round_to(votes as f64 / total as f64 * 100.0, 1)
    }

    pub fn best_pct(&self) -> f64 {
        self.pct(self.best_votes)
    }

    pub fn rec_pct(&self) -> f64 {
        self.pct(self.rec_votes)
    }

    pub fn not_pct(&self) -> f64 {
        self.pct(self.not_votes)
    }

    pub fn score(&self) -> f64 {
        recommendation_score(self.best_pct(), self.rec_pct(), self.not_pct())
    }
}

/// `best% × 3 + rec% × 2 − not% × 2`
pub fn recommendation_score(best_pct: f64, rec_pct: f64, not_pct: f64) -> f64 {
    best_pct * 3.0 + rec_pct * 2.0 - not_pct * 2.0
}

/// Details and player-count poll for one game
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GameDetail {
    pub bgg_id: String,
    pub year: Option<i64>,
    pub weight: Option<f64>,
    pub weight_votes: Option<i64>,
    pub bgg_rank: Option<i64>,
    pub categories: Vec<String>,
    pub families: Vec<String>,
    pub player_counts: Vec<PlayerCountVotes>,
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round_to_one_decimal() {
        let votes = PlayerCountVotes {
            player_count: 3,
            best_votes: 1,
            rec_votes: 1,
            not_votes: 1,
        };
        assert_eq!(votes.vote_count(), 3);
        assert_eq!(votes.best_pct(), 33.3);
        assert_eq!(votes.not_pct(), 33.3);
    }

    #[test]
    fn zero_votes_give_zero_percentages() {
        let votes = PlayerCountVotes {
            player_count: 7,
            best_votes: 0,
            rec_votes: 0,
            not_votes: 0,
        };
        assert_eq!(votes.best_pct(), 0.0);
        assert_eq!(votes.score(), 0.0);
    }

    #[test]
    fn score_weights_best_and_penalizes_not_recommended() {
        // 60 best, 30 rec, 10 not → 180 + 60 - 20
        assert_eq!(recommendation_score(60.0, 30.0, 10.0), 220.0);
        assert!(recommendation_score(60.0, 30.0, 10.0) >= PLAYABLE_SCORE);
        assert!(recommendation_score(10.0, 30.0, 60.0) < PLAYABLE_SCORE);
    }

    #[test]
    fn game_type_label_is_lenient() {
        assert_eq!(GameType::from_label("Expansion"), GameType::Expansion);
        assert_eq!(GameType::from_label("exp"), GameType::Expansion);
        assert_eq!(GameType::from_label(""), GameType::BaseGame);
        assert_eq!(GameType::BaseGame.to_string(), "Base Game");
    }
}
