//! SQLite FTS5 table over bundle items.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::error::{Error, Result};

const TABLE: &str = "items_fts";

/// One document in the index. `values` lines up with the index columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsRow {
    pub id: String,
    pub bundle_id: String,
    pub enabled: bool,
    /// Source modification time in epoch milliseconds.
    pub mtime: i64,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtsHit {
    pub id: String,
    pub bundle_id: String,
}

#[derive(Debug, Clone)]
pub struct FtsIndex {
    pool: SqlitePool,
    columns: Vec<String>,
    rank_expr: String,
}

impl FtsIndex {
    pub async fn open(path: &Path, columns: &[&str], weights: &[f64]) -> Result<Self> {
        if columns.len() != weights.len() {
            return Err(Error::Internal(format!(
                "{} FTS columns but {} weights",
                columns.len(),
                weights.len()
            )));
        }
        let pool = db::connect(path).await?;

        // FTS5 CREATE is not idempotent, check first
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?",
        )
        .bind(TABLE)
        .fetch_one(&pool)
        .await?;

        if !exists {
            let sql = format!(
                "CREATE VIRTUAL TABLE {TABLE} USING fts5(id UNINDEXED, {}, enabled UNINDEXED, bundle_id UNINDEXED, mtime UNINDEXED)",
                columns.join(", ")
            );
            sqlx::query(&sql).execute(&pool).await?;
        }

        // bm25 takes one weight per column, unindexed ones included
        let mut all_weights = vec!["0.0".to_string()];
        all_weights.extend(weights.iter().map(|w| format!("{w:.1}")));
        all_weights.extend(["0.0", "0.0", "0.0"].map(String::from));
        let rank_expr = format!("bm25({TABLE}, {})", all_weights.join(", "));

        Ok(Self {
            pool,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rank_expr,
        })
    }

    fn insert_sql(&self) -> String {
        let placeholders = vec!["?"; self.columns.len() + 4].join(", ");
        format!(
            "INSERT INTO {TABLE} (id, {}, enabled, bundle_id, mtime) VALUES ({placeholders})",
            self.columns.join(", ")
        )
    }

    /// Replace each row by id, in one transaction.
    pub async fn upsert_batch(&self, rows: &[FtsRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let insert = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        for row in rows {
            if row.values.len() != self.columns.len() {
                return Err(Error::Internal(format!(
                    "FTS row {} has {} values, expected {}",
                    row.id,
                    row.values.len(),
                    self.columns.len()
                )));
            }
            sqlx::query(&format!("DELETE FROM {TABLE} WHERE id = ?"))
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
            let mut q = sqlx::query(&insert).bind(&row.id);
            for v in &row.values {
                q = q.bind(v);
            }
            q.bind(row.enabled as i64)
                .bind(&row.bundle_id)
                .bind(row.mtime)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {TABLE} WHERE id = ?"))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query(&format!("DELETE FROM {TABLE} WHERE id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Indexed mtime per row id.
    pub async fn mtimes(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(&format!("SELECT id, mtime FROM {TABLE}"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<i64, _>("mtime")))
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {TABLE}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Ranked matches, best first. An empty query matches nothing.
    pub async fn search(&self, query: &str, limit: usize, offset: usize) -> Result<Vec<FtsHit>> {
        let Some(expr) = match_expression(query) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT id, bundle_id FROM {TABLE} WHERE {TABLE} MATCH ? ORDER BY {}, id LIMIT ? OFFSET ?",
            self.rank_expr
        );
        let rows = sqlx::query(&sql)
            .bind(expr)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| FtsHit {
                id: r.get("id"),
                bundle_id: r.get("bundle_id"),
            })
            .collect())
    }
}

/// Turn free text into an FTS5 prefix query: every word must match.
pub fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(id: &str, slug: &str, desc: &str) -> FtsRow {
        FtsRow {
            id: id.into(),
            bundle_id: "b".into(),
            enabled: true,
            mtime: 1,
            values: vec![slug.into(), desc.into()],
        }
    }

    async fn open(tmp: &TempDir) -> FtsIndex {
        FtsIndex::open(&tmp.path().join("fts.sqlite"), &["slug", "description"], &[10.0, 1.0])
            .await
            .unwrap()
    }

    #[test]
    fn query_terms_are_quoted_prefixes() {
        assert_eq!(match_expression("Code review!").unwrap(), "\"code\"* \"review\"*");
        assert!(match_expression("  -- ").is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_and_slug_outranks_description() {
        let tmp = TempDir::new().unwrap();
        let idx = open(&tmp).await;
        idx.upsert_batch(&[
            row("a", "misc", "helps with reviews"),
            row("b", "review", "generic"),
        ])
        .await
        .unwrap();
        idx.upsert_batch(&[row("a", "misc", "reviews again")]).await.unwrap();
        assert_eq!(idx.count().await.unwrap(), 2);

        let hits = idx.search("review", 10, 0).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let second = idx.search("review", 1, 1).await.unwrap();
        assert_eq!(second[0].id, "a");
    }

    #[tokio::test]
    async fn reopen_keeps_rows_and_delete_removes() {
        let tmp = TempDir::new().unwrap();
        {
            let idx = open(&tmp).await;
            idx.upsert_batch(&[row("a", "alpha", "x")]).await.unwrap();
        }
        let idx = open(&tmp).await;
        assert_eq!(idx.mtimes().await.unwrap().get("a"), Some(&1));
        idx.delete("a").await.unwrap();
        assert!(idx.search("alpha", 10, 0).await.unwrap().is_empty());
    }
}
