//! Listening history queries
//!
//! One row per track key. Every upsert overwrites the display fields and
//! the resume point, touches `last_played_at`, and adds the increment to the
//! stored `listen_count` in the same statement.

use crate::error::Result;
use crate::history::database::HistoryDatabase;
use neon_common::time::unix_seconds;
use neon_common::TrackKey;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// One row of the history table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackHistoryEntry {
    pub track_key: TrackKey,
    pub title: String,
    pub author: String,
    pub source: String,
    pub position_ms: i64,
    pub duration_ms: i64,
    pub listen_count: i64,
    /// Unix seconds
    pub last_played_at: i64,
}

impl TrackHistoryEntry {
    fn from_row(row: &SqliteRow) -> Self {
        Self {
            track_key: TrackKey::from_raw(row.get::<String, _>("track_key")),
            title: row.get("title"),
            author: row.get("author"),
            source: row.get("source"),
            position_ms: row.get("position_ms"),
            duration_ms: row.get("duration_ms"),
            listen_count: row.get("listen_count"),
            last_played_at: row.get("last_played_at"),
        }
    }

    /// Resume point reached the end of the track
    pub fn is_finished(&self) -> bool {
        self.duration_ms > 0 && self.position_ms >= self.duration_ms
    }
}

/// Values written by one upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub track_key: TrackKey,
    pub title: String,
    pub author: String,
    pub source: String,
    pub position_ms: i64,
    pub duration_ms: i64,
    /// Added to the stored listen count (0 for progress, 1 for a finish)
    pub listen_increment: i64,
}

/// Row-level access to the history table
#[derive(Clone)]
pub struct HistoryRepository {
    db: Arc<HistoryDatabase>,
}

impl HistoryRepository {
    pub fn new(db: Arc<HistoryDatabase>) -> Self {
        Self { db }
    }

    /// Insert or update a row, stamped with the current time
    pub async fn upsert_progress(&self, record: &ProgressRecord) -> Result<()> {
        self.upsert_progress_at(record, unix_seconds()).await
    }

    /// Insert or update a row with an explicit `last_played_at`
    pub async fn upsert_progress_at(&self, record: &ProgressRecord, played_at: i64) -> Result<()> {
        let pool = self.db.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO track_history
                (track_key, title, author, source, position_ms, duration_ms,
                 listen_count, last_played_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(track_key) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                source = excluded.source,
                position_ms = excluded.position_ms,
                duration_ms = excluded.duration_ms,
                listen_count = track_history.listen_count + excluded.listen_count,
                last_played_at = excluded.last_played_at
            "#,
        )
        .bind(record.track_key.as_str())
        .bind(&record.title)
        .bind(&record.author)
        .bind(&record.source)
        .bind(record.position_ms.max(0))
        .bind(record.duration_ms.max(0))
        .bind(record.listen_increment.max(0))
        .bind(played_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Stored resume point, 0 when the key is unknown
    pub async fn get_saved_position(&self, track_key: &TrackKey) -> Result<i64> {
        let pool = self.db.pool().await?;

        let position: Option<i64> =
            sqlx::query_scalar("SELECT position_ms FROM track_history WHERE track_key = ?")
                .bind(track_key.as_str())
                .fetch_optional(pool)
                .await?;

        Ok(position.unwrap_or(0))
    }

    pub async fn get_entry(&self, track_key: &TrackKey) -> Result<Option<TrackHistoryEntry>> {
        let pool = self.db.pool().await?;

        let row = sqlx::query(
            r#"
            SELECT track_key, title, author, source, position_ms, duration_ms,
                   listen_count, last_played_at
            FROM track_history
            WHERE track_key = ?
            "#,
        )
        .bind(track_key.as_str())
        .fetch_optional(pool)
        .await?;

        Ok(row.as_ref().map(TrackHistoryEntry::from_row))
    }

    /// Most recently played rows first; ties broken by key
    ///
    /// A limit below 1 is treated as 1.
    pub async fn get_recent_entries(&self, limit: i64) -> Result<Vec<TrackHistoryEntry>> {
        let pool = self.db.pool().await?;

        let rows = sqlx::query(
            r#"
            SELECT track_key, title, author, source, position_ms, duration_ms,
                   listen_count, last_played_at
            FROM track_history
            ORDER BY last_played_at DESC, track_key ASC
            LIMIT ?
            "#,
        )
        .bind(limit.max(1))
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(TrackHistoryEntry::from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, position_ms: i64, increment: i64) -> ProgressRecord {
        ProgressRecord {
            track_key: TrackKey::from_raw(key),
            title: "Title".to_string(),
            author: "Author".to_string(),
            source: "yandex".to_string(),
            position_ms,
            duration_ms: 200_000,
            listen_increment: increment,
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_accumulates() {
        let repo = HistoryRepository::new(Arc::new(HistoryDatabase::in_memory()));

        repo.upsert_progress_at(&record("yandex:1", 1_000, 0), 100)
            .await
            .unwrap();
        let mut second = record("yandex:1", 5_000, 1);
        second.title = "Renamed".to_string();
        repo.upsert_progress_at(&second, 200).await.unwrap();

        let entry = repo
            .get_entry(&TrackKey::from_raw("yandex:1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.title, "Renamed");
        assert_eq!(entry.position_ms, 5_000);
        assert_eq!(entry.listen_count, 1);
        assert_eq!(entry.last_played_at, 200);
    }

    #[tokio::test]
    async fn test_negative_values_clamped() {
        let repo = HistoryRepository::new(Arc::new(HistoryDatabase::in_memory()));
        repo.upsert_progress(&record("youtube:x", -5, -3)).await.unwrap();

        let entry = repo
            .get_entry(&TrackKey::from_raw("youtube:x"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.position_ms, 0);
        assert_eq!(entry.listen_count, 0);
    }

    #[test]
    fn test_is_finished() {
        let mut entry = TrackHistoryEntry {
            track_key: TrackKey::from_raw("yandex:1"),
            title: String::new(),
            author: String::new(),
            source: "yandex".to_string(),
            position_ms: 10,
            duration_ms: 10,
            listen_count: 0,
            last_played_at: 0,
        };
        assert!(entry.is_finished());

        entry.duration_ms = 0;
        assert!(!entry.is_finished());
    }
}
