//! Durable enable/disable flags for built-in bundles and items.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct OverlayKv {
    pool: SqlitePool,
}

impl OverlayKv {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bundle_flags (
                bundle_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_flags (
                bundle_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                enabled INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (bundle_id, item_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn bundle_flags(&self) -> Result<HashMap<String, bool>> {
        let rows = sqlx::query("SELECT bundle_id, enabled FROM bundle_flags")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("bundle_id"), r.get::<i64, _>("enabled") != 0))
            .collect())
    }

    pub async fn item_flags(&self) -> Result<HashMap<(String, String), bool>> {
        let rows = sqlx::query("SELECT bundle_id, item_id, enabled FROM item_flags")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    (r.get::<String, _>("bundle_id"), r.get::<String, _>("item_id")),
                    r.get::<i64, _>("enabled") != 0,
                )
            })
            .collect())
    }

    pub async fn set_bundle_flag(&self, bundle_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bundle_flags (bundle_id, enabled, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(bundle_id) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(bundle_id)
        .bind(enabled as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_item_flag(&self, bundle_id: &str, item_id: &str, enabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO item_flags (bundle_id, item_id, enabled, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(bundle_id, item_id) DO UPDATE SET
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(bundle_id)
        .bind(item_id)
        .bind(enabled as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_bundle_flag(&self, bundle_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM bundle_flags WHERE bundle_id = ?")
            .bind(bundle_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_item_flag(&self, bundle_id: &str, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM item_flags WHERE bundle_id = ? AND item_id = ?")
            .bind(bundle_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn flags_persist_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("overlay.sqlite");

        let kv = OverlayKv::open(&path).await.unwrap();
        kv.set_bundle_flag("b", false).await.unwrap();
        kv.set_item_flag("b", "i", true).await.unwrap();
        kv.set_item_flag("b", "i", false).await.unwrap();
        drop(kv);

        let kv = OverlayKv::open(&path).await.unwrap();
        assert_eq!(kv.bundle_flags().await.unwrap().get("b"), Some(&false));
        let items = kv.item_flags().await.unwrap();
        assert_eq!(items.get(&("b".to_string(), "i".to_string())), Some(&false));

        kv.delete_bundle_flag("b").await.unwrap();
        kv.delete_item_flag("b", "i").await.unwrap();
        assert!(kv.bundle_flags().await.unwrap().is_empty());
        assert!(kv.item_flags().await.unwrap().is_empty());
    }
}
