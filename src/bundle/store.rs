//! Generic bundle store shared by prompt templates and tools.
//!
//! User data lives as JSON under the base directory; built-in data comes
//! from [`BuiltinData`] and is read-only apart from its enabled flags.
//! Every file write goes through [`DirStore`], whose listener keeps the
//! FTS index current.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::bundle::dirstore::DirStore;
use crate::bundle::layout::{bundle_dir_name, item_file_info, parse_bundle_dir};
use crate::bundle::locks::SlugLocks;
use crate::bundle::model::{
    advance_timestamp, AllBundles, Bundle, BundleItem, BundlePage, ItemPage, ListBundlesRequest,
    ListItem, ListItemsRequest, PutBundleBody, SearchItemsRequest, SCHEMA_VERSION,
};
use crate::bundle::page::{
    clamp_page_size, decode_opt, encode_token, BundleCursor, ItemCursor, SearchCursor,
};
use crate::bundle::validate::{validate_bundle_id, validate_slug, validate_tags, validate_version};
use crate::error::{Error, Result};
use crate::fts::index::FtsIndex;
use crate::fts::sync::{is_builtin_row, FtsSync, SyncStats};
use crate::overlay::builtin::{BuiltinData, BuiltinFs};
use crate::overlay::kv::OverlayKv;

pub struct BundleStore<K> {
    dir: DirStore,
    /// Bundle writes hold it exclusively; item writes hold it shared so a
    /// bundle cannot be renamed or deleted under them.
    manifest_lock: RwLock<()>,
    locks: SlugLocks,
    builtin: Option<Arc<BuiltinData<K>>>,
    fts: Arc<FtsSync<K>>,
}

impl<K> std::fmt::Debug for BundleStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleStore")
            .field("base", &self.dir.base())
            .field("builtin", &self.builtin.is_some())
            .finish()
    }
}

fn tags_match(wanted: &[String], have: &[String]) -> bool {
    wanted.is_empty() || wanted.iter().any(|t| have.contains(t))
}

fn ids_match(wanted: &[String], id: &str) -> bool {
    wanted.is_empty() || wanted.iter().any(|w| w == id)
}

/// True when `(m, key)` sorts after the cursor in `(modifiedAt desc, key asc)`.
fn after_cursor(m: DateTime<Utc>, key: &str, cursor_mod: DateTime<Utc>, cursor_key: &str) -> bool {
    m < cursor_mod || (m == cursor_mod && key > cursor_key)
}

impl<K: BundleItem> BundleStore<K> {
    /// Open the store rooted at `base_dir`, creating it if needed. With
    /// `builtin` set, the embedded data is validated and merged with the
    /// overlay database. Startup indexes changed files and all built-ins.
    pub async fn open(
        base_dir: &Path,
        builtin: Option<BuiltinFs>,
        snapshot_max_age: Duration,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(base_dir).await?;

        let index = FtsIndex::open(
            &base_dir.join(K::KIND.fts_file()),
            K::FTS_COLUMNS,
            K::FTS_WEIGHTS,
        )
        .await?;
        let fts = Arc::new(FtsSync::<K>::new(Arc::new(index), base_dir));
        let dir = DirStore::new(base_dir).with_listener(fts.clone());

        let builtin = match builtin {
            Some(fs) => {
                let kv = OverlayKv::open(&base_dir.join(K::KIND.overlay_file())).await?;
                Some(BuiltinData::<K>::open(fs, kv, snapshot_max_age).await?)
            }
            None => None,
        };

        let store = Self {
            dir,
            manifest_lock: RwLock::new(()),
            locks: SlugLocks::new(),
            builtin,
            fts,
        };

        let user = store.fts.sync_user_files(false).await?;
        let built_in = store.sync_builtin_index().await?;
        tracing::info!(
            kind = K::KIND.noun(),
            base = %base_dir.display(),
            indexed = user.indexed + built_in.indexed,
            unchanged = user.unchanged,
            "bundle store opened"
        );
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        self.dir.base()
    }

    pub fn builtin(&self) -> Option<&Arc<BuiltinData<K>>> {
        self.builtin.as_ref()
    }

    fn builtin_bundle(&self, id: &str) -> Option<Bundle> {
        self.builtin.as_ref().and_then(|b| b.bundle(id))
    }

    fn is_builtin(&self, id: &str) -> bool {
        self.builtin.as_ref().is_some_and(|b| b.has_bundle(id))
    }

    async fn sync_builtin_index(&self) -> Result<SyncStats> {
        match &self.builtin {
            Some(b) => self.fts.sync_builtins(&b.snapshot()).await,
            None => Ok(SyncStats::default()),
        }
    }

    async fn load_manifest(&self) -> Result<AllBundles> {
        Ok(self
            .dir
            .read_json::<AllBundles>(K::KIND.meta_file())
            .await?
            .unwrap_or_default())
    }

    async fn save_manifest(&self, manifest: &AllBundles, changed_id: &str) -> Result<()> {
        let meta = K::KIND.meta_file();
        self.dir.write_json(meta, manifest).await?;
        self.dir.notify_key(meta, changed_id, false).await;
        Ok(())
    }

    async fn user_bundle(&self, id: &str) -> Result<Bundle> {
        self.load_manifest()
            .await?
            .bundles
            .remove(id)
            .filter(Bundle::is_live)
            .ok_or_else(|| Error::BundleNotFound(id.to_string()))
    }

    fn item_path(bundle: &Bundle, slug: &str, version: &str) -> String {
        format!(
            "{}/{}",
            bundle_dir_name(&bundle.id, &bundle.slug),
            item_file_info(slug, version).file_name
        )
    }

    fn item_name(slug: &str, version: &str) -> String {
        format!("{slug}@{version}")
    }

    // ─── bundles ───────────────────────────────────────────────────────

    /// Create or replace a user bundle. A soft-deleted bundle with the
    /// same id is revived.
    pub async fn put_bundle(&self, id: &str, body: PutBundleBody) -> Result<Bundle> {
        validate_bundle_id(id)?;
        validate_slug(&body.slug)?;
        if body.display_name.trim().is_empty() {
            return Err(Error::invalid("displayName is required"));
        }
        if self.is_builtin(id) {
            return Err(Error::BuiltInReadOnly(id.to_string()));
        }
        if let Some(b) = &self.builtin {
            if b.snapshot().bundles.values().any(|x| x.slug == body.slug) {
                return Err(Error::Conflict(format!(
                    "slug {:?} is used by a built-in bundle",
                    body.slug
                )));
            }
        }

        let _guard = self.manifest_lock.write().await;
        let mut manifest = self.load_manifest().await?;
        if let Some(other) = manifest
            .bundles
            .values()
            .find(|b| b.id != id && b.is_live() && b.slug == body.slug)
        {
            return Err(Error::Conflict(format!(
                "slug {:?} is used by bundle {}",
                body.slug, other.id
            )));
        }

        let now = Utc::now();
        let previous = manifest.bundles.get(id).cloned();
        let (created_at, modified_at) = match &previous {
            Some(prev) if prev.is_live() => (prev.created_at, advance_timestamp(prev.modified_at)),
            Some(prev) => (now, advance_timestamp(prev.modified_at)),
            None => (now, now),
        };

        let new_dir = bundle_dir_name(id, &body.slug);
        if let Some(prev) = &previous {
            if prev.slug != body.slug {
                self.dir
                    .rename_dir(&bundle_dir_name(id, &prev.slug), &new_dir)
                    .await?;
            }
        }
        self.dir.create_dir(&new_dir).await?;

        let bundle = Bundle {
            schema_version: SCHEMA_VERSION.to_string(),
            id: id.to_string(),
            slug: body.slug,
            display_name: body.display_name,
            description: body.description,
            is_enabled: body.is_enabled,
            is_built_in: false,
            created_at,
            modified_at,
            soft_deleted_at: None,
        };
        manifest.bundles.insert(id.to_string(), bundle.clone());
        self.save_manifest(&manifest, id).await?;
        tracing::debug!(bundle = id, slug = %bundle.slug, "bundle written");
        Ok(bundle)
    }

    pub async fn patch_bundle(&self, id: &str, is_enabled: bool) -> Result<Bundle> {
        if let Some(b) = &self.builtin {
            if b.has_bundle(id) {
                let bundle = b.set_bundle_enabled(id, is_enabled).await?;
                self.sync_builtin_index().await?;
                return Ok(bundle);
            }
        }

        let _guard = self.manifest_lock.write().await;
        let mut manifest = self.load_manifest().await?;
        let bundle = manifest
            .bundles
            .get_mut(id)
            .filter(|b| b.is_live())
            .ok_or_else(|| Error::BundleNotFound(id.to_string()))?;
        bundle.is_enabled = is_enabled;
        bundle.modified_at = advance_timestamp(bundle.modified_at);
        let out = bundle.clone();
        self.save_manifest(&manifest, id).await?;
        Ok(out)
    }

    /// Soft delete. The bundle must not contain any item files.
    pub async fn delete_bundle(&self, id: &str) -> Result<()> {
        if self.is_builtin(id) {
            return Err(Error::BuiltInReadOnly(id.to_string()));
        }
        let _guard = self.manifest_lock.write().await;
        let mut manifest = self.load_manifest().await?;
        let bundle = manifest
            .bundles
            .get_mut(id)
            .filter(|b| b.is_live())
            .ok_or_else(|| Error::BundleNotFound(id.to_string()))?;

        let dir = bundle_dir_name(&bundle.id, &bundle.slug);
        if !self.dir.list_json_files(&dir).await?.is_empty() {
            return Err(Error::BundleNotEmpty(id.to_string()));
        }
        let now = Utc::now();
        bundle.soft_deleted_at = Some(now);
        bundle.modified_at = advance_timestamp(bundle.modified_at);
        self.save_manifest(&manifest, id).await?;
        self.dir.notify_key(K::KIND.meta_file(), id, true).await;
        Ok(())
    }

    pub async fn get_bundle(&self, id: &str, include_disabled: bool) -> Result<Bundle> {
        let bundle = match self.builtin_bundle(id) {
            Some(b) => b,
            None => self.user_bundle(id).await?,
        };
        if !include_disabled && !bundle.is_enabled {
            return Err(Error::BundleDisabled(id.to_string()));
        }
        Ok(bundle)
    }

    /// Built-in and live user bundles, `(modifiedAt desc, id asc)`.
    pub async fn list_bundles(&self, req: ListBundlesRequest) -> Result<BundlePage> {
        let page_size = clamp_page_size(req.page_size);
        let cursor: Option<BundleCursor> = match req.page_token.as_deref() {
            Some(t) if !t.trim().is_empty() => Some(crate::bundle::page::decode_token(t)?),
            _ => None,
        };

        let mut all: Vec<Bundle> = self
            .builtin
            .as_ref()
            .map(|b| b.snapshot().bundles.into_values().collect())
            .unwrap_or_default();
        all.extend(
            self.load_manifest()
                .await?
                .bundles
                .into_values()
                .filter(Bundle::is_live),
        );
        all.retain(|b| ids_match(&req.bundle_ids, &b.id) && (req.include_disabled || b.is_enabled));
        all.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.id.cmp(&b.id)));

        if let Some(c) = &cursor {
            all.retain(|b| after_cursor(b.modified_at, &b.id, c.cursor_mod, &c.cursor_id));
        }
        let more = all.len() > page_size;
        all.truncate(page_size);
        let next_page_token = match (more, all.last()) {
            (true, Some(last)) => Some(encode_token(&BundleCursor {
                cursor_mod: last.modified_at,
                cursor_id: last.id.clone(),
            })?),
            _ => None,
        };
        Ok(BundlePage {
            bundles: all,
            next_page_token,
        })
    }

    // ─── items ─────────────────────────────────────────────────────────

    /// Write a new item version. Existing versions are never overwritten.
    pub async fn put_item(
        &self,
        bundle_id: &str,
        slug: &str,
        version: &str,
        mut item: K,
    ) -> Result<K> {
        validate_slug(slug)?;
        validate_version(version)?;
        validate_tags(&item.meta().tags)?;
        item.validate_payload()?;
        if self.is_builtin(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }
        let _manifest = self.manifest_lock.read().await;
        let bundle = self.user_bundle(bundle_id).await?;

        let lock = self.locks.get(bundle_id, slug);
        let _guard = lock.write().await;

        let path = Self::item_path(&bundle, slug, version);
        if self.dir.exists(&path).await {
            return Err(Error::Conflict(format!(
                "{} {} already exists",
                K::KIND.noun(),
                Self::item_name(slug, version)
            )));
        }

        let now = Utc::now();
        let meta = item.meta_mut();
        meta.schema_version = SCHEMA_VERSION.to_string();
        meta.id = uuid::Uuid::now_v7().to_string();
        meta.slug = slug.to_string();
        meta.version = version.to_string();
        meta.is_built_in = false;
        meta.created_at = now;
        meta.modified_at = now;

        self.dir.write_json(&path, &item).await?;
        tracing::debug!(bundle = bundle_id, item = %Self::item_name(slug, version), "item written");
        Ok(item)
    }

    pub async fn patch_item(
        &self,
        bundle_id: &str,
        slug: &str,
        version: &str,
        is_enabled: bool,
    ) -> Result<K> {
        if let Some(b) = &self.builtin {
            if b.has_bundle(bundle_id) {
                let item = b.set_item_enabled(bundle_id, slug, version, is_enabled).await?;
                self.sync_builtin_index().await?;
                return Ok(item);
            }
        }
        let _manifest = self.manifest_lock.read().await;
        let bundle = self.user_bundle(bundle_id).await?;
        let lock = self.locks.get(bundle_id, slug);
        let _guard = lock.write().await;

        let path = Self::item_path(&bundle, slug, version);
        let mut item: K = self
            .dir
            .read_json(&path)
            .await?
            .ok_or_else(|| K::KIND.not_found(Self::item_name(slug, version)))?;
        let meta = item.meta_mut();
        meta.is_enabled = is_enabled;
        meta.modified_at = advance_timestamp(meta.modified_at);
        self.dir.write_json(&path, &item).await?;
        Ok(item)
    }

    pub async fn delete_item(&self, bundle_id: &str, slug: &str, version: &str) -> Result<()> {
        if self.is_builtin(bundle_id) {
            return Err(Error::BuiltInReadOnly(bundle_id.to_string()));
        }
        let _manifest = self.manifest_lock.read().await;
        let bundle = self.user_bundle(bundle_id).await?;
        let lock = self.locks.get(bundle_id, slug);
        let _guard = lock.write().await;

        let path = Self::item_path(&bundle, slug, version);
        if !self.dir.exists(&path).await {
            return Err(K::KIND.not_found(Self::item_name(slug, version)));
        }
        self.dir.delete_file(&path).await
    }

    /// Read one item version. Unless `include_disabled`, a disabled bundle
    /// or item is an error.
    pub async fn get_item(
        &self,
        bundle_id: &str,
        slug: &str,
        version: &str,
        include_disabled: bool,
    ) -> Result<K> {
        let (bundle, item) = match &self.builtin {
            Some(b) if b.has_bundle(bundle_id) => {
                let bundle = b
                    .bundle(bundle_id)
                    .ok_or_else(|| Error::BundleNotFound(bundle_id.to_string()))?;
                let item = b
                    .item(bundle_id, slug, version)
                    .ok_or_else(|| K::KIND.not_found(Self::item_name(slug, version)))?;
                (bundle, item)
            }
            _ => {
                let _manifest = self.manifest_lock.read().await;
                let bundle = self.user_bundle(bundle_id).await?;
                let lock = self.locks.get(bundle_id, slug);
                let _guard = lock.read().await;
                let item: K = self
                    .dir
                    .read_json(&Self::item_path(&bundle, slug, version))
                    .await?
                    .ok_or_else(|| K::KIND.not_found(Self::item_name(slug, version)))?;
                (bundle, item)
            }
        };
        if !include_disabled {
            if !bundle.is_enabled {
                return Err(Error::BundleDisabled(bundle_id.to_string()));
            }
            if !item.meta().is_enabled {
                return Err(K::KIND.disabled(Self::item_name(slug, version)));
            }
        }
        Ok(item)
    }

    fn visible(include_disabled: bool, bundle: &Bundle, item: &K) -> bool {
        include_disabled || (bundle.is_enabled && item.meta().is_enabled)
    }

    /// Every live user item: `(modifiedAt, path, entry)`.
    async fn user_items(&self, req: &ListItemsRequest) -> Result<Vec<(DateTime<Utc>, String, ListItem<K>)>> {
        let manifest = self.load_manifest().await?;
        let mut out = Vec::new();
        for bundle in manifest.bundles.values().filter(|b| b.is_live()) {
            if !ids_match(&req.bundle_ids, &bundle.id) {
                continue;
            }
            if !req.include_disabled && !bundle.is_enabled {
                continue;
            }
            let dir = bundle_dir_name(&bundle.id, &bundle.slug);
            for name in self.dir.list_json_files(&dir).await? {
                let path = format!("{dir}/{name}");
                let item: K = match self.dir.read_json(&path).await {
                    Ok(Some(item)) => item,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(file = %path, error = %e, "skipping unreadable item");
                        continue;
                    }
                };
                if !Self::visible(req.include_disabled, bundle, &item)
                    || !tags_match(&req.tags, &item.meta().tags)
                {
                    continue;
                }
                out.push((
                    item.meta().modified_at,
                    path,
                    ListItem {
                        bundle_id: bundle.id.clone(),
                        bundle_slug: bundle.slug.clone(),
                        item,
                    },
                ));
            }
        }
        out.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(out)
    }

    /// Built-ins first, then user items by `(modifiedAt desc, path asc)`.
    pub async fn list_items(&self, req: ListItemsRequest) -> Result<ItemPage<K>> {
        let page_size = clamp_page_size(req.page_size);
        let cursor: ItemCursor = decode_opt(req.page_token.as_deref())?;
        let mut items = Vec::with_capacity(page_size);

        if !cursor.built_in_done {
            let snapshot = self.builtin.as_ref().map(|b| b.snapshot());
            let builtins: Vec<ListItem<K>> = snapshot
                .iter()
                .flat_map(|s| s.iter_items())
                .filter(|(bundle, item)| {
                    ids_match(&req.bundle_ids, &bundle.id)
                        && Self::visible(req.include_disabled, bundle, item)
                        && tags_match(&req.tags, &item.meta().tags)
                })
                .map(|(bundle, item)| ListItem {
                    bundle_id: bundle.id.clone(),
                    bundle_slug: bundle.slug.clone(),
                    item: item.clone(),
                })
                .collect();

            let start = cursor.built_in_offset.min(builtins.len());
            let end = (start + page_size).min(builtins.len());
            items.extend(builtins[start..end].iter().cloned());
            if end < builtins.len() {
                let next = ItemCursor {
                    built_in_offset: end,
                    ..Default::default()
                };
                return Ok(ItemPage {
                    items,
                    next_page_token: Some(encode_token(&next)?),
                });
            }
        }

        let room = page_size - items.len();
        let mut users = self.user_items(&req).await?;
        if let (Some(cm), Some(cp)) = (cursor.cursor_mod, cursor.cursor_path.as_deref()) {
            users.retain(|(m, path, _)| after_cursor(*m, path, cm, cp));
        }
        let more = users.len() > room;
        users.truncate(room);

        let mut next_page_token = None;
        if more {
            let last = users.last();
            next_page_token = Some(encode_token(&ItemCursor {
                built_in_done: true,
                built_in_offset: 0,
                cursor_mod: last.map(|(m, _, _)| *m).or(cursor.cursor_mod),
                cursor_path: last.map(|(_, p, _)| p.clone()).or(cursor.cursor_path.clone()),
            })?);
        }
        items.extend(users.into_iter().map(|(_, _, item)| item));
        Ok(ItemPage {
            items,
            next_page_token,
        })
    }

    /// Resolve an FTS row id against live data.
    async fn resolve_hit(&self, id: &str) -> Result<Option<(Bundle, K)>> {
        if is_builtin_row(id) {
            let Some(b) = &self.builtin else {
                return Ok(None);
            };
            let mut parts = id.splitn(3, '/').skip(1);
            let (Some(bundle_id), Some(item_id)) = (parts.next(), parts.next()) else {
                return Ok(None);
            };
            let snapshot = b.snapshot();
            let Some(bundle) = snapshot.bundles.get(bundle_id).cloned() else {
                return Ok(None);
            };
            let item = snapshot
                .items
                .get(bundle_id)
                .and_then(|m| m.values().find(|i| i.meta().id == item_id))
                .cloned();
            return Ok(item.map(|i| (bundle, i)));
        }

        let Some((dir, _)) = id.split_once('/') else {
            return Ok(None);
        };
        let Ok((bundle_id, _)) = parse_bundle_dir(dir) else {
            return Ok(None);
        };
        let bundle = match self.user_bundle(&bundle_id).await {
            Ok(b) => b,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self.dir.read_json::<K>(id).await?.map(|item| (bundle, item)))
    }

    /// Ranked full-text search. Hits that no longer resolve, or are
    /// disabled when `include_disabled` is off, are skipped.
    pub async fn search_items(&self, req: SearchItemsRequest) -> Result<ItemPage<K>> {
        if req.query.trim().is_empty() {
            return Err(Error::invalid("query is required"));
        }
        let page_size = clamp_page_size(req.page_size);
        let cursor: SearchCursor = decode_opt(req.page_token.as_deref())?;
        let index = self.fts.index();

        let mut items = Vec::with_capacity(page_size);
        let mut pos = cursor.offset;
        'fill: loop {
            let hits = index.search(&req.query, page_size * 2, pos).await?;
            if hits.is_empty() {
                break;
            }
            for hit in hits {
                pos += 1;
                if let Some((bundle, item)) = self.resolve_hit(&hit.id).await? {
                    if Self::visible(req.include_disabled, &bundle, &item) {
                        items.push(ListItem {
                            bundle_id: bundle.id,
                            bundle_slug: bundle.slug,
                            item,
                        });
                        if items.len() == page_size {
                            break 'fill;
                        }
                    }
                }
            }
        }

        let next_page_token = if items.len() == page_size
            && !index.search(&req.query, 1, pos).await?.is_empty()
        {
            Some(encode_token(&SearchCursor { offset: pos })?)
        } else {
            None
        };
        Ok(ItemPage {
            items,
            next_page_token,
        })
    }

    /// Re-index every user file and built-in item, and drop rows whose
    /// file is gone.
    pub async fn reindex(&self) -> Result<SyncStats> {
        let user = self.fts.sync_user_files(true).await?;
        let built_in = self.sync_builtin_index().await?;
        Ok(SyncStats {
            indexed: user.indexed + built_in.indexed,
            unchanged: user.unchanged,
            removed: user.removed + built_in.removed,
        })
    }

    pub fn bundle_dir(&self, bundle: &Bundle) -> PathBuf {
        self.dir.path(&bundle_dir_name(&bundle.id, &bundle.slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::model::ItemMeta;
    use crate::prompts::{MessageBlock, PromptTemplate, Role};
    use tempfile::TempDir;

    fn bid() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    fn body(slug: &str) -> PutBundleBody {
        PutBundleBody {
            slug: slug.into(),
            display_name: slug.to_uppercase(),
            description: String::new(),
            is_enabled: true,
        }
    }

    fn template(text: &str, tags: &[&str]) -> PromptTemplate {
        PromptTemplate {
            meta: ItemMeta {
                display_name: text.into(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
            blocks: vec![MessageBlock {
                id: "b1".into(),
                role: Role::User,
                content: text.into(),
            }],
            variables: vec![],
        }
    }

    async fn store(tmp: &TempDir) -> BundleStore<PromptTemplate> {
        BundleStore::open(tmp.path(), None, Duration::from_secs(60))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn slug_collision_and_rename() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let (a, b) = (bid(), bid());
        s.put_bundle(&a, body("alpha")).await.unwrap();
        let err = s.put_bundle(&b, body("alpha")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        s.put_item(&a, "t", "1", template("hello", &[])).await.unwrap();
        let renamed = s.put_bundle(&a, body("beta")).await.unwrap();
        assert!(renamed.modified_at > renamed.created_at);
        assert!(tmp.path().join(format!("{a}_beta")).is_dir());
        assert!(s.get_item(&a, "t", "1", false).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_ids_rejected_before_writes() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        assert!(s.put_bundle("not-a-uuid", body("x")).await.is_err());
        assert!(s.put_bundle(&uuid::Uuid::new_v4().to_string(), body("x")).await.is_err());
        assert!(!tmp.path().join("prompts.bundles.json").exists());
    }

    #[tokio::test]
    async fn item_versions_are_immutable_and_ids_fresh() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let a = bid();
        s.put_bundle(&a, body("alpha")).await.unwrap();
        let v1 = s.put_item(&a, "t", "1", template("one", &[])).await.unwrap();
        let v2 = s.put_item(&a, "t", "2", template("two", &[])).await.unwrap();
        assert_ne!(v1.meta.id, v2.meta.id);
        let err = s.put_item(&a, "t", "1", template("again", &[])).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let patched = s.patch_item(&a, "t", "1", false).await.unwrap();
        assert_eq!(patched.meta.id, v1.meta.id);
        assert!(patched.meta.modified_at > v1.meta.modified_at);
        assert!(matches!(
            s.get_item(&a, "t", "1", false).await.unwrap_err(),
            Error::TemplateDisabled(_)
        ));
    }

    #[tokio::test]
    async fn delete_bundle_requires_empty_and_hides_it() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let a = bid();
        s.put_bundle(&a, body("alpha")).await.unwrap();
        s.put_item(&a, "t", "1", template("one", &[])).await.unwrap();
        assert!(matches!(
            s.delete_bundle(&a).await.unwrap_err(),
            Error::BundleNotEmpty(_)
        ));
        s.delete_item(&a, "t", "1").await.unwrap();
        s.delete_bundle(&a).await.unwrap();
        assert!(s.get_bundle(&a, true).await.unwrap_err().is_not_found());
        let page = s.list_bundles(ListBundlesRequest::default()).await.unwrap();
        assert!(page.bundles.is_empty());

        let revived = s.put_bundle(&a, body("alpha")).await.unwrap();
        assert!(revived.soft_deleted_at.is_none());
    }

    #[tokio::test]
    async fn list_pages_and_tag_filter() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let a = bid();
        s.put_bundle(&a, body("alpha")).await.unwrap();
        for i in 0..5 {
            let tags: &[&str] = if i % 2 == 0 { &["even"] } else { &["odd"] };
            s.put_item(&a, &format!("t{i}"), "1", template("x", tags)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = s
                .list_items(ListItemsRequest {
                    page_size: Some(2),
                    page_token: token.clone(),
                    ..Default::default()
                })
                .await
                .unwrap();
            seen.extend(page.items.into_iter().map(|i| i.item.meta.slug));
            token = page.next_page_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, vec!["t4", "t3", "t2", "t1", "t0"]);

        let even = s
            .list_items(ListItemsRequest {
                tags: vec!["even".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(even.items.len(), 3);
    }

    #[tokio::test]
    async fn search_follows_writes_and_deletes() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let a = bid();
        s.put_bundle(&a, body("alpha")).await.unwrap();
        s.put_item(&a, "greeting", "1", template("say hello", &[])).await.unwrap();
        s.put_item(&a, "farewell", "1", template("say goodbye", &[])).await.unwrap();

        let req = |q: &str| SearchItemsRequest {
            query: q.into(),
            ..Default::default()
        };
        let hits = s.search_items(req("hello")).await.unwrap();
        assert_eq!(hits.items.len(), 1);
        assert_eq!(hits.items[0].item.meta.slug, "greeting");
        assert_eq!(hits.items[0].bundle_slug, "alpha");

        s.delete_item(&a, "greeting", "1").await.unwrap();
        assert!(s.search_items(req("hello")).await.unwrap().items.is_empty());
        assert!(s.search_items(req("  ")).await.is_err());
    }

    #[tokio::test]
    async fn reopen_reindexes_files_changed_offline() {
        let tmp = TempDir::new().unwrap();
        let a = bid();
        {
            let s = store(&tmp).await;
            s.put_bundle(&a, body("alpha")).await.unwrap();
            s.put_item(&a, "t", "1", template("original", &[])).await.unwrap();
        }
        std::fs::remove_file(tmp.path().join("prompts.fts.sqlite")).unwrap();
        let _ = std::fs::remove_file(tmp.path().join("prompts.fts.sqlite-wal"));
        let _ = std::fs::remove_file(tmp.path().join("prompts.fts.sqlite-shm"));

        let s = store(&tmp).await;
        let hits = s
            .search_items(SearchItemsRequest {
                query: "original".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.items.len(), 1);
    }
}
