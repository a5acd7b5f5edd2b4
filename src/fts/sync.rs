//! Keeps the FTS index in step with item files and built-in snapshots.

use async_trait::async_trait;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::bundle::dirstore::{FileEvent, FileListener, FileOp};
use crate::bundle::layout::parse_bundle_dir;
use crate::bundle::model::BundleItem;
use crate::error::Result;
use crate::fts::index::{FtsIndex, FtsRow};
use crate::overlay::builtin::BuiltinSnapshot;

pub const USER_BATCH: usize = 1000;
pub const BUILTIN_BATCH: usize = 256;
const BUILTIN_PREFIX: &str = "bi/";

pub fn builtin_row_id(bundle_id: &str, item_id: &str) -> String {
    format!("{BUILTIN_PREFIX}{bundle_id}/{item_id}")
}

pub fn is_builtin_row(id: &str) -> bool {
    id.starts_with(BUILTIN_PREFIX)
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
}

pub struct FtsSync<K> {
    index: Arc<FtsIndex>,
    base: PathBuf,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for FtsSync<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtsSync").field("base", &self.base).finish()
    }
}

fn row_for<K: BundleItem>(id: String, bundle_id: String, item: &K, mtime: i64) -> FtsRow {
    FtsRow {
        id,
        bundle_id,
        enabled: item.meta().is_enabled,
        mtime,
        values: item.fts_values(),
    }
}

async fn file_mtime(path: &std::path::Path) -> Option<i64> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    let millis = modified.duration_since(UNIX_EPOCH).ok()?.as_millis();
    i64::try_from(millis).ok()
}

impl<K: BundleItem> FtsSync<K> {
    pub fn new(index: Arc<FtsIndex>, base: impl Into<PathBuf>) -> Self {
        Self {
            index,
            base: base.into(),
            _kind: PhantomData,
        }
    }

    pub fn index(&self) -> &Arc<FtsIndex> {
        &self.index
    }

    /// `(bundle id, file name)` for an item path, or `None` for anything
    /// that is not `<bundle dir>/<file>.json`.
    fn split_item_path(&self, rel: &str) -> Option<(String, String)> {
        let (dir, name) = rel.split_once('/')?;
        if name.contains('/') || !name.ends_with(".json") || K::KIND.is_reserved_file(name) {
            return None;
        }
        let (bundle_id, _) = parse_bundle_dir(dir).ok()?;
        Some((bundle_id, name.to_string()))
    }

    /// Index every user item file whose mtime differs from the indexed one.
    /// With `prune`, rows for files that no longer exist are removed.
    pub async fn sync_user_files(&self, prune: bool) -> Result<SyncStats> {
        let known = self.index.mtimes().await?;
        let mut stats = SyncStats::default();
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(USER_BATCH);

        let mut dirs = match tokio::fs::read_dir(&self.base).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = dir.file_name().to_string_lossy().into_owned();
            let Ok((bundle_id, _)) = parse_bundle_dir(&dir_name) else {
                continue;
            };
            let mut files = tokio::fs::read_dir(dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".json") || !file.file_type().await?.is_file() {
                    continue;
                }
                let rel = format!("{dir_name}/{name}");
                seen.insert(rel.clone());

                let mtime = file_mtime(&file.path()).await.unwrap_or(0);
                if known.get(&rel) == Some(&mtime) {
                    stats.unchanged += 1;
                    continue;
                }
                let item: K = match tokio::fs::read(file.path()).await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(item) => item,
                        Err(e) => {
                            tracing::warn!(file = %rel, error = %e, "skipping unparsable item file");
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(file = %rel, error = %e, "skipping unreadable item file");
                        continue;
                    }
                };
                batch.push(row_for(rel, bundle_id.clone(), &item, mtime));
                if batch.len() >= USER_BATCH {
                    self.index.upsert_batch(&batch).await?;
                    stats.indexed += batch.len();
                    batch.clear();
                }
            }
        }
        self.index.upsert_batch(&batch).await?;
        stats.indexed += batch.len();

        if prune {
            let stale: Vec<String> = known
                .into_keys()
                .filter(|id| !is_builtin_row(id) && !seen.contains(id))
                .collect();
            stats.removed = stale.len();
            self.index.delete_many(&stale).await?;
        }

        tracing::debug!(
            kind = K::KIND.noun(),
            indexed = stats.indexed,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "user items synced to FTS"
        );
        Ok(stats)
    }

    /// Make the built-in rows match `snapshot` exactly.
    pub async fn sync_builtins(&self, snapshot: &BuiltinSnapshot<K>) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        let mut live = HashSet::new();
        let mut batch = Vec::with_capacity(BUILTIN_BATCH);

        for (bundle, item) in snapshot.iter_items() {
            let id = builtin_row_id(&bundle.id, &item.meta().id);
            live.insert(id.clone());
            let mut row = row_for(
                id,
                bundle.id.clone(),
                item,
                item.meta().modified_at.timestamp_millis(),
            );
            row.enabled = row.enabled && bundle.is_enabled;
            batch.push(row);
            if batch.len() >= BUILTIN_BATCH {
                self.index.upsert_batch(&batch).await?;
                stats.indexed += batch.len();
                batch.clear();
            }
        }
        self.index.upsert_batch(&batch).await?;
        stats.indexed += batch.len();

        let stale: Vec<String> = self
            .index
            .mtimes()
            .await?
            .into_keys()
            .filter(|id| is_builtin_row(id) && !live.contains(id))
            .collect();
        stats.removed = stale.len();
        self.index.delete_many(&stale).await?;
        Ok(stats)
    }
}

#[async_trait]
impl<K: BundleItem> FileListener for FtsSync<K> {
    async fn on_event(&self, event: FileEvent) -> Result<()> {
        let Some((bundle_id, _)) = self.split_item_path(&event.file) else {
            return Ok(());
        };
        match event.op {
            FileOp::SetFile | FileOp::ResetFile => {
                let Some(data) = event.data else {
                    return Ok(());
                };
                let item: K = serde_json::from_value(data)?;
                let mtime = file_mtime(&self.base.join(&event.file)).await.unwrap_or(0);
                self.index
                    .upsert_batch(&[row_for(event.file, bundle_id, &item, mtime)])
                    .await
            }
            FileOp::DeleteFile => self.index.delete(&event.file).await,
            FileOp::SetKey | FileOp::DeleteKey => Ok(()),
        }
    }
}
