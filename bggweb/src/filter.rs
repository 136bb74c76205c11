//! Browse filtering over committed catalog data
//!
//! Rows are one per (game, player count). Query strings are parsed leniently:
//! a value that does not parse falls back to its default instead of failing
//! the request.

use crate::db::games::{GameRecord, GameWithRecommendations, RecommendationRecord};
use crate::models::records::{round_to, GameType, PLAYABLE_SCORE};
use crate::pagination::{normalize_page_size, PageWindow};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// Lower bound of the year range
pub const YEAR_MIN: i64 = 1900;

/// Families always listed first, in this order
pub const PINNED_FAMILIES: [&str; 8] = [
    "Abstract",
    "Children's Game",
    "Customizable",
    "Family",
    "Party Game",
    "Strategy",
    "Thematic",
    "Wargame",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnedState {
    #[default]
    All,
    Owned,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFilter {
    #[default]
    Base,
    Expansion,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayableState {
    #[default]
    Playable,
    Not,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerCountFilter {
    #[default]
    All,
    Exact(i64),
    EightPlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

/// Sortable columns; unknown names sort by score factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    Title,
    GameId,
    Year,
    BggRank,
    AvgRating,
    NumVoters,
    Weight,
    WeightVotes,
    Owned,
    Type,
    PlayerCount,
    BestPct,
    BestVotes,
    RecPct,
    RecVotes,
    NotPct,
    NotVotes,
    TotalVotes,
    PcScoreUnadj,
    PcScore,
    #[default]
    ScoreFactor,
}

impl SortColumn {
    const NAMES: [(&'static str, SortColumn); 21] = [
        ("title", SortColumn::Title),
        ("game_id", SortColumn::GameId),
        ("year", SortColumn::Year),
        ("bgg_rank", SortColumn::BggRank),
        ("avg_rating", SortColumn::AvgRating),
        ("num_voters", SortColumn::NumVoters),
        ("weight", SortColumn::Weight),
        ("weight_votes", SortColumn::WeightVotes),
        ("owned", SortColumn::Owned),
        ("type", SortColumn::Type),
        ("player_count", SortColumn::PlayerCount),
        ("best_pct", SortColumn::BestPct),
        ("best_votes", SortColumn::BestVotes),
        ("rec_pct", SortColumn::RecPct),
        ("rec_votes", SortColumn::RecVotes),
        ("not_pct", SortColumn::NotPct),
        ("not_votes", SortColumn::NotVotes),
        ("total_votes", SortColumn::TotalVotes),
        ("pc_score_unadj", SortColumn::PcScoreUnadj),
        ("pc_score", SortColumn::PcScore),
        ("score_factor", SortColumn::ScoreFactor),
    ];

    pub fn from_name(name: &str) -> Self {
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, c)| c == self)
            .map(|(n, _)| *n)
            .unwrap_or("score_factor")
    }
}

/// Parsed browse parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseQuery {
    pub q: String,
    pub owned_state: OwnedState,
    pub type_filter: TypeFilter,
    pub playable: PlayableState,
    pub player_count: PlayerCountFilter,
    pub min_year: i64,
    pub max_year: i64,
    /// Upper bound of the year range (the current year)
    pub year_max: i64,
    pub min_avg_rating: f64,
    pub max_avg_rating: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    pub min_voters: Option<i64>,
    pub categories: Vec<String>,
    pub sort: SortColumn,
    pub dir: SortDir,
    pub page: i64,
    pub page_size: i64,
}

impl BrowseQuery {
    /// Defaults for a year range ending at `current_year`
    pub fn new(current_year: i64) -> Self {
        Self {
            q: String::new(),
            owned_state: OwnedState::default(),
            type_filter: TypeFilter::default(),
            playable: PlayableState::default(),
            player_count: PlayerCountFilter::default(),
            min_year: YEAR_MIN,
            max_year: current_year,
            year_max: current_year,
            min_avg_rating: 0.0,
            max_avg_rating: 10.0,
            min_weight: 0.0,
            max_weight: 5.0,
            min_voters: None,
            categories: Vec::new(),
            sort: SortColumn::default(),
            dir: SortDir::default(),
            page: 1,
            page_size: normalize_page_size(None),
        }
    }

    /// Parse query-string pairs; repeated `categories` keys accumulate
    pub fn from_pairs(pairs: &[(String, String)], current_year: i64) -> Self {
        let mut query = Self::new(current_year);
        let mut page_size: Option<i64> = None;

        for (key, value) in pairs {
            let value = value.trim();
            match key.as_str() {
                "q" => query.q = value.to_string(),
                "owned_state" => {
                    query.owned_state = match value {
                        "owned" => OwnedState::Owned,
                        "not" => OwnedState::Not,
                        _ => OwnedState::All,
                    }
                }
                "type" => {
                    query.type_filter = match value {
                        "base" => TypeFilter::Base,
                        "expansion" => TypeFilter::Expansion,
                        _ => TypeFilter::All,
                    }
                }
                "playable" => {
                    query.playable = match value {
                        "playable" => PlayableState::Playable,
                        "not" => PlayableState::Not,
                        _ => PlayableState::All,
                    }
                }
                "player_count" => {
                    query.player_count = if value == "8plus" {
                        PlayerCountFilter::EightPlus
                    } else if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                        value
                            .parse()
                            .map(PlayerCountFilter::Exact)
                            .unwrap_or_default()
                    } else {
                        PlayerCountFilter::All
                    }
                }
                "min_year" => {
                    query.min_year = parse_nonzero(value).unwrap_or(YEAR_MIN);
                }
                "max_year" => {
                    query.max_year = parse_nonzero(value).unwrap_or(current_year);
                }
                "min_avg_rating" => query.min_avg_rating = value.parse().unwrap_or(0.0),
                "max_avg_rating" => query.max_avg_rating = value.parse().unwrap_or(10.0),
                "min_weight" => query.min_weight = value.parse().unwrap_or(0.0),
                "max_weight" => query.max_weight = value.parse().unwrap_or(5.0),
                "min_voters" => query.min_voters = value.parse().ok(),
                "categories" if !value.is_empty() => query.categories.push(value.to_string()),
                "sort" => query.sort = SortColumn::from_name(value),
                "dir" => {
                    query.dir = if value == "asc" {
                        SortDir::Asc
                    } else {
                        SortDir::Desc
                    }
                }
                "page" => {
                    query.page = value.parse::<i64>().ok().filter(|p| *p > 0).unwrap_or(1)
                }
                "page_size" => page_size = value.parse().ok(),
                _ => {}
            }
        }

        query.page_size = normalize_page_size(page_size);
        query
    }

    /// A year range narrower than the full span excludes unknown years
    fn strict_year(&self) -> bool {
        self.min_year > YEAR_MIN || self.max_year < self.year_max
    }
}

fn parse_nonzero(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|v| *v != 0)
}

/// One browse row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRow {
    pub title: String,
    pub game_id: String,
    pub year: Option<i64>,
    pub bgg_rank: Option<i64>,
    pub avg_rating: Option<f64>,
    pub num_voters: Option<i64>,
    pub weight: Option<f64>,
    pub weight_votes: Option<i64>,
    pub owned: bool,
    #[serde(rename = "type")]
    pub game_type: String,
    pub categories: Vec<String>,
    pub families: Vec<String>,
    pub player_count: i64,
    pub best_pct: f64,
    pub best_votes: i64,
    pub rec_pct: f64,
    pub rec_votes: i64,
    pub not_pct: f64,
    pub not_votes: i64,
    pub total_votes: i64,
    pub pc_score_unadj: f64,
    pub pc_score: f64,
    pub score_factor: f64,
    pub playable: bool,
}

impl GameRow {
    fn new(game: &GameRecord, rec: &RecommendationRecord, scale: &ScoreScale) -> Self {
        let pc_score = scale.normalize(rec.score);
        let score_factor = (game.avg_rating.unwrap_or(0.0) * 3.0 + pc_score) / 4.0;
        Self {
            title: game.title.clone(),
            game_id: game.bgg_id.clone(),
            year: game.year,
            bgg_rank: game.bgg_rank,
            avg_rating: game.avg_rating,
            num_voters: game.num_voters,
            weight: game.weight,
            weight_votes: game.weight_votes,
            owned: game.owned,
            game_type: game.game_type.clone(),
            categories: game.categories.clone(),
            families: game.families.clone(),
            player_count: rec.player_count,
            best_pct: rec.best_pct,
            best_votes: rec.best_votes,
            rec_pct: rec.rec_pct,
            rec_votes: rec.rec_votes,
            not_pct: rec.not_pct,
            not_votes: rec.not_votes,
            total_votes: rec.vote_count,
            pc_score_unadj: rec.score,
            pc_score,
            score_factor,
            playable: rec.score >= PLAYABLE_SCORE,
        }
    }

    /// Round derived scores for display
    fn rounded(mut self) -> Self {
        self.pc_score_unadj = round_to(self.pc_score_unadj, 1);
        self.pc_score = round_to(self.pc_score, 2);
        self.score_factor = round_to(self.score_factor, 3);
        self
    }

    /// Sorted, comma-separated categories
    pub fn categories_str(&self) -> String {
        let mut names = self.categories.clone();
        names.sort();
        names.join(", ")
    }

    pub fn playable_label(&self) -> &'static str {
        if self.playable {
            "Playable"
        } else {
            "Not Playable"
        }
    }
}

/// Min/max of the unadjusted score over the whole catalog
#[derive(Debug, Clone, Copy)]
struct ScoreScale {
    min: f64,
    range: Option<f64>,
}

impl ScoreScale {
    fn over(catalog: &[GameWithRecommendations]) -> Self {
        let mut scores = catalog
            .iter()
            .flat_map(|g| g.recommendations.iter().map(|r| r.score));
        let Some(first) = scores.next() else {
            return Self { min: 0.0, range: None };
        };
        let (min, max) = scores.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s)));
        let range = (max > min).then_some(max - min);
        Self { min, range }
    }

    /// Map onto 0..10; 0 when every score is equal
    fn normalize(&self, score: f64) -> f64 {
        match self.range {
            Some(range) => (score - self.min) / range * 10.0,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowseResult {
    pub rows: Vec<GameRow>,
    /// Rows matching every filter, across all pages
    pub count: usize,
    pub page: i64,
    pub page_size: i64,
    pub num_pages: i64,
    /// 1-based index of the first row shown; 0 when empty
    pub start: i64,
    pub end: i64,
    pub sort: &'static str,
    pub dir: SortDir,
    /// Pinned families with row counts before the category filter
    pub pinned_families: Vec<CategoryCount>,
    /// Categories with row counts before the category filter, by name
    pub other_categories: Vec<CategoryCount>,
    pub selected_categories: Vec<String>,
}

fn type_matches(game_type: GameType, filter: TypeFilter) -> bool {
    match filter {
        TypeFilter::All => true,
        TypeFilter::Base => game_type == GameType::BaseGame,
        TypeFilter::Expansion => game_type == GameType::Expansion,
    }
}

/// Every filter except categories
fn passes_filters(
    query: &BrowseQuery,
    needle: &str,
    game: &GameRecord,
    rec: &RecommendationRecord,
) -> bool {
    if !needle.is_empty() && !game.title.to_lowercase().contains(needle) {
        return false;
    }

    match query.owned_state {
        OwnedState::All => {}
        OwnedState::Owned if !game.owned => return false,
        OwnedState::Not if game.owned => return false,
        _ => {}
    }

    if !type_matches(GameType::from_label(&game.game_type), query.type_filter) {
        return false;
    }

    match query.playable {
        PlayableState::All => {}
        PlayableState::Playable if rec.score < PLAYABLE_SCORE => return false,
        PlayableState::Not if rec.score >= PLAYABLE_SCORE => return false,
        _ => {}
    }

    match query.player_count {
        PlayerCountFilter::All => {}
        PlayerCountFilter::Exact(count) if rec.player_count != count => return false,
        PlayerCountFilter::EightPlus if rec.player_count < 8 => return false,
        _ => {}
    }

    match game.year {
        Some(year) if year < query.min_year || year > query.max_year => return false,
        None if query.strict_year() => return false,
        _ => {}
    }

    let avg = game.avg_rating.unwrap_or(0.0);
    if avg < query.min_avg_rating || avg > query.max_avg_rating {
        return false;
    }

    let weight = game.weight.unwrap_or(0.0);
    if weight < query.min_weight || weight > query.max_weight {
        return false;
    }

    if let Some(min_voters) = query.min_voters {
        if game.num_voters.unwrap_or(0) < min_voters {
            return false;
        }
    }

    true
}

enum SortValue<'a> {
    Number(Option<f64>),
    Text(&'a str),
}

fn sort_value(row: &GameRow, column: SortColumn) -> SortValue<'_> {
    use SortValue::{Number, Text};
    let int = |v: i64| Number(Some(v as f64));
    match column {
        SortColumn::Title => Text(&row.title),
        SortColumn::GameId => Text(&row.game_id),
        SortColumn::Type => Text(&row.game_type),
        SortColumn::Year => Number(row.year.map(|v| v as f64)),
        SortColumn::BggRank => Number(row.bgg_rank.map(|v| v as f64)),
        SortColumn::WeightVotes => Number(row.weight_votes.map(|v| v as f64)),
        SortColumn::AvgRating => Number(Some(row.avg_rating.unwrap_or(0.0))),
        SortColumn::NumVoters => int(row.num_voters.unwrap_or(0)),
        SortColumn::Weight => Number(Some(row.weight.unwrap_or(0.0))),
        SortColumn::Owned => int(i64::from(row.owned)),
        SortColumn::PlayerCount => int(row.player_count),
        SortColumn::BestPct => Number(Some(row.best_pct)),
        SortColumn::BestVotes => int(row.best_votes),
        SortColumn::RecPct => Number(Some(row.rec_pct)),
        SortColumn::RecVotes => int(row.rec_votes),
        SortColumn::NotPct => Number(Some(row.not_pct)),
        SortColumn::NotVotes => int(row.not_votes),
        SortColumn::TotalVotes => int(row.total_votes),
        SortColumn::PcScoreUnadj => Number(Some(row.pc_score_unadj)),
        SortColumn::PcScore => Number(Some(row.pc_score)),
        SortColumn::ScoreFactor => Number(Some(row.score_factor)),
    }
}

/// Primary column in `dir` with nulls last, then title ascending
fn compare_rows(a: &GameRow, b: &GameRow, column: SortColumn, dir: SortDir) -> Ordering {
    let directed = |ord: Ordering| match dir {
        SortDir::Asc => ord,
        SortDir::Desc => ord.reverse(),
    };
    let primary = match (sort_value(a, column), sort_value(b, column)) {
        (SortValue::Number(x), SortValue::Number(y)) => match (x, y) {
            (Some(x), Some(y)) => directed(x.total_cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        (SortValue::Text(x), SortValue::Text(y)) => directed(x.cmp(y)),
        _ => Ordering::Equal,
    };
    primary.then_with(|| a.title.cmp(&b.title))
}

fn count_names<'a>(counts: &mut BTreeMap<String, usize>, names: impl Iterator<Item = &'a String>) {
    for name in names {
        *counts.entry(name.clone()).or_default() += 1;
    }
}

/// Filter, sort and paginate the catalog
pub fn browse(catalog: &[GameWithRecommendations], query: &BrowseQuery) -> BrowseResult {
    let scale = ScoreScale::over(catalog);
    let needle = query.q.to_lowercase();
    let selected: HashSet<&str> = query.categories.iter().map(String::as_str).collect();

    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut family_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut rows = Vec::new();

    for entry in catalog {
        let game = &entry.game;
        let in_selected = selected.is_empty()
            || game
                .categories
                .iter()
                .chain(&game.families)
                .any(|name| selected.contains(name.as_str()));

        for rec in &entry.recommendations {
            if !passes_filters(query, &needle, game, rec) {
                continue;
            }
            count_names(&mut category_counts, game.categories.iter());
            count_names(&mut family_counts, game.families.iter());
            if in_selected {
                rows.push(GameRow::new(game, rec, &scale));
            }
        }
    }

    rows.sort_by(|a, b| compare_rows(a, b, query.sort, query.dir));

    let count = rows.len();
    let window = PageWindow::new(count, query.page, query.page_size);

    let page_rows: Vec<GameRow> = rows
        .into_iter()
        .skip(window.offset as usize)
        .take(window.page_size as usize)
        .map(GameRow::rounded)
        .collect();
    let (start, end) = window.bounds(page_rows.len());

    let pinned_families = PINNED_FAMILIES
        .iter()
        .map(|name| CategoryCount {
            name: name.to_string(),
            count: family_counts.get(*name).copied().unwrap_or(0),
        })
        .collect();

    let mut other_categories: Vec<CategoryCount> = category_counts
        .into_iter()
        .map(|(name, count)| CategoryCount { name, count })
        .collect();
    other_categories.sort_by_key(|c| c.name.to_lowercase());

    BrowseResult {
        rows: page_rows,
        count,
        page: window.page,
        page_size: window.page_size,
        num_pages: window.num_pages,
        start,
        end,
        sort: query.sort.as_str(),
        dir: query.dir,
        pinned_families,
        other_categories,
        selected_categories: query.categories.clone(),
    }
}
