//! Settings table accessors (key/value)

use bggweb_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;

/// Typed read of one setting; `None` when unset
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Invalid setting {}: {}", key, e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// All non-null settings as raw strings
pub async fn load_all(db: &Pool<Sqlite>) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as("SELECT key, value FROM settings")
        .fetch_all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        bggweb_common::db::create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn unset_setting_is_none() {
        let db = setup_test_db().await;
        let value: Option<usize> = get_setting(&db, "batch_size").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn set_then_get_overwrites() {
        let db = setup_test_db().await;
        set_setting(&db, "batch_size", 5).await.unwrap();
        set_setting(&db, "batch_size", 7).await.unwrap();
        assert_eq!(get_setting::<usize>(&db, "batch_size").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn unparseable_value_is_config_error() {
        let db = setup_test_db().await;
        set_setting(&db, "batch_size", "lots").await.unwrap();
        let err = get_setting::<usize>(&db, "batch_size").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn load_all_skips_null_values() {
        let db = setup_test_db().await;
        set_setting(&db, "a", "1").await.unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES ('b', NULL)")
            .execute(&db)
            .await
            .unwrap();
        let all = load_all(&db).await.unwrap();
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert!(!all.contains_key("b"));
    }
}
