//! Apply stage atomicity tests

mod helpers;

use bggweb::db::games;
use bggweb::models::records::GameType;
use bggweb::services::{apply, ApplyInput, CollectionFetch};
use helpers::*;
use sqlx::SqlitePool;

fn input_for(range: std::ops::RangeInclusive<usize>) -> ApplyInput {
    ApplyInput {
        top: range.clone().map(top_entry).collect(),
        collection: None,
        details: range.map(|n| (game_id(n), detail(&game_id(n)))).collect(),
    }
}

async fn install_failing_trigger(pool: &SqlitePool, id: &str) {
    for event in ["INSERT", "UPDATE"] {
        sqlx::query(&format!(
            "CREATE TRIGGER reject_{event}_{id} BEFORE {event} ON games WHEN NEW.bgg_id = '{id}'
             BEGIN SELECT RAISE(ABORT, 'injected'); END",
        ))
        .execute(pool)
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_apply_writes_games_details_and_progress() {
    let (_tmp, pool) = create_test_db().await;
    let mut reported = Vec::new();

    let summary = apply(&pool, &input_for(1..=4), |n| reported.push(n))
        .await
        .unwrap();

    assert_eq!(summary.games_written, 4);
    assert_eq!(summary.details_written, 4);
    assert_eq!(reported, vec![1, 2, 3, 4]);

    let game = games::get_game(&pool, "g3").await.unwrap().unwrap();
    assert_eq!(game.game.weight, Some(2.5));
    assert_eq!(game.game.families, vec!["Strategy".to_string()]);
    let two = &game.recommendations[0];
    assert_eq!(two.player_count, 2);
    assert_eq!(two.best_pct, 60.0);
    assert_eq!(two.vote_count, 100);
    assert_eq!(two.score, 220.0);
}

#[tokio::test]
async fn test_failure_mid_apply_leaves_store_empty() {
    let (_tmp, pool) = create_test_db().await;
    install_failing_trigger(&pool, "g4").await;

    let result = apply(&pool, &input_for(1..=10), |_| {}).await;

    let err = result.expect_err("apply should fail on g4");
    assert!(err.to_string().contains("injected"));
    assert_eq!(games::count_games(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failure_mid_apply_keeps_previous_rows() {
    let (_tmp, pool) = create_test_db().await;
    apply(&pool, &input_for(1..=10), |_| {}).await.unwrap();
    let before = stored_titles(&pool).await;

    install_failing_trigger(&pool, "g7").await;
    let mut renamed = input_for(1..=10);
    for entry in &mut renamed.top {
        entry.title = format!("New {}", entry.bgg_id);
    }
    assert!(apply(&pool, &renamed, |_| {}).await.is_err());

    assert_eq!(stored_titles(&pool).await, before);
    assert_eq!(before["g1"], "Game 01");
}

#[tokio::test]
async fn test_collection_replaces_previous_ownership() {
    let (_tmp, pool) = create_test_db().await;

    let first = ApplyInput {
        collection: Some(CollectionFetch {
            username: "carol".to_string(),
            entries: vec![
                collection_entry(1, GameType::BaseGame),
                collection_entry(2, GameType::Expansion),
            ],
        }),
        ..ApplyInput::default()
    };
    apply(&pool, &first, |_| {}).await.unwrap();

    let second = ApplyInput {
        collection: Some(CollectionFetch {
            username: "carol".to_string(),
            entries: vec![collection_entry(2, GameType::Expansion)],
        }),
        ..ApplyInput::default()
    };
    let summary = apply(&pool, &second, |_| {}).await.unwrap();
    assert_eq!(summary.details_written, 0);

    let g1 = games::get_game(&pool, "g1").await.unwrap().unwrap();
    let g2 = games::get_game(&pool, "g2").await.unwrap().unwrap();
    assert!(!g1.game.owned);
    assert!(g2.game.owned);
    assert_eq!(games::count_games(&pool).await.unwrap(), 2);
}
