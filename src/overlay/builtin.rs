//! Built-in bundles merged with overlay flags.
//!
//! The embedded dataset is read-only. [`BuiltinData`] parses it into a
//! [`BuiltinSnapshot`], applies the enable/disable flags from the overlay
//! store, and publishes the result by swapping an `Arc`. Readers always get
//! their own copy.

use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::bundle::layout::{parse_bundle_dir, parse_item_file_name, sanitize_id};
use crate::bundle::model::{AllBundles, Bundle, BundleItem};
use crate::bundle::validate::{validate_slug, validate_tags, validate_version};
use crate::error::{Error, Result};
use crate::overlay::kv::OverlayKv;
use crate::overlay::rebuild::{AsyncRebuilder, RebuildFn};

/// An in-memory read-only file tree: `<meta>.json` plus one level of
/// bundle directories.
#[derive(Debug, Clone, Default)]
pub struct BuiltinFs {
    files: BTreeMap<String, String>,
}

impl BuiltinFs {
    pub fn from_entries<I, P, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: entries
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }

    /// Load a tree from disk. Only `.json` files at depth one and two are read.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root).min_depth(1).max_depth(2) {
            let entry = entry.map_err(|e| Error::Internal(format!("reading {}: {e}", root.display())))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::Internal(e.to_string()))?;
            let key = crate::bundle::dirstore::relative_key(rel);
            if key.ends_with(".json") {
                files.insert(key, std::fs::read_to_string(entry.path())?);
            }
        }
        Ok(Self { files })
    }

    pub fn read(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn dirs(&self) -> BTreeSet<&str> {
        self.files
            .keys()
            .filter_map(|k| k.split_once('/').map(|(d, _)| d))
            .collect()
    }

    pub fn files_in<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.files.iter().filter_map(move |(k, v)| {
            let (d, name) = k.split_once('/')?;
            (d == dir && !name.contains('/')).then_some((name, v.as_str()))
        })
    }
}

/// A consistent view of the built-in data with overlay flags applied.
#[derive(Debug, Clone)]
pub struct BuiltinSnapshot<K> {
    pub bundles: BTreeMap<String, Bundle>,
    /// bundle id → (slug, version) → item
    pub items: BTreeMap<String, BTreeMap<(String, String), K>>,
}

impl<K: BundleItem> BuiltinSnapshot<K> {
    pub fn item(&self, bundle_id: &str, slug: &str, version: &str) -> Option<&K> {
        self.items
            .get(bundle_id)?
            .get(&(slug.to_string(), version.to_string()))
    }

    /// Every item in (bundle id, slug, version) order.
    pub fn iter_items(&self) -> impl Iterator<Item = (&Bundle, &K)> {
        self.items.iter().flat_map(move |(bid, items)| {
            let bundle = self.bundles.get(bid);
            items
                .values()
                .filter_map(move |item| bundle.map(|b| (b, item)))
        })
    }

    pub fn item_count(&self) -> usize {
        self.items.values().map(BTreeMap::len).sum()
    }
}

fn broken(msg: impl std::fmt::Display) -> Error {
    Error::Internal(format!("built-in data: {msg}"))
}

/// Parse and validate the embedded tree, then apply overlay flags.
pub fn load_snapshot<K: BundleItem>(
    fs: &BuiltinFs,
    bundle_flags: &HashMap<String, bool>,
    item_flags: &HashMap<(String, String), bool>,
) -> Result<BuiltinSnapshot<K>> {
    let meta_file = K::KIND.meta_file();
    let raw = fs
        .read(meta_file)
        .ok_or_else(|| broken(format!("{meta_file} is missing")))?;
    let manifest: AllBundles =
        serde_json::from_str(raw).map_err(|e| broken(format!("{meta_file} is invalid: {e}")))?;
    if manifest.bundles.is_empty() {
        return Err(broken(format!("{meta_file} has no bundles")));
    }

    let by_dir_id: HashMap<String, &Bundle> = manifest
        .bundles
        .values()
        .map(|b| (sanitize_id(&b.id), b))
        .collect();

    let mut items: BTreeMap<String, BTreeMap<(String, String), K>> = BTreeMap::new();
    for dir in fs.dirs() {
        let (dir_id, dir_slug) = parse_bundle_dir(dir).map_err(broken)?;
        let bundle = by_dir_id
            .get(&dir_id)
            .ok_or_else(|| broken(format!("directory {dir} is not in the manifest")))?;
        if bundle.slug != dir_slug {
            return Err(broken(format!(
                "directory {dir} has slug {dir_slug:?}, manifest says {:?}",
                bundle.slug
            )));
        }

        let mut bundle_items = BTreeMap::new();
        for (name, content) in fs.files_in(dir) {
            let (slug, version) = parse_item_file_name(name).map_err(broken)?;
            let mut item: K = serde_json::from_str(content)
                .map_err(|e| broken(format!("{dir}/{name}: {e}")))?;
            let meta = item.meta();
            if meta.slug != slug || meta.version != version {
                return Err(broken(format!(
                    "{dir}/{name} holds {}@{}",
                    meta.slug, meta.version
                )));
            }
            validate_slug(&slug).map_err(broken)?;
            validate_version(&version).map_err(broken)?;
            validate_tags(&meta.tags).map_err(broken)?;
            item.validate_payload()
                .map_err(|e| broken(format!("{dir}/{name}: {e}")))?;

            let key = (bundle.id.clone(), item.meta().id.clone());
            let meta = item.meta_mut();
            meta.is_built_in = true;
            if let Some(flag) = item_flags.get(&key) {
                meta.is_enabled = *flag;
            }
            bundle_items.insert((slug, version), item);
        }
        if bundle_items.is_empty() {
            return Err(broken(format!("bundle directory {dir} has no items")));
        }
        items.insert(bundle.id.clone(), bundle_items);
    }

    let mut bundles = BTreeMap::new();
    for (id, bundle) in manifest.bundles {
        if !items.contains_key(&id) {
            return Err(broken(format!("bundle {id} has no directory")));
        }
        let mut bundle = bundle;
        bundle.is_built_in = true;
        if let Some(flag) = bundle_flags.get(&id) {
            bundle.is_enabled = *flag;
        }
        bundles.insert(id, bundle);
    }

    Ok(BuiltinSnapshot { bundles, items })
}

pub struct BuiltinData<K> {
    fs: BuiltinFs,
    kv: OverlayKv,
    current: RwLock<Arc<BuiltinSnapshot<K>>>,
    rebuilder: AsyncRebuilder,
}

impl<K> std::fmt::Debug for BuiltinData<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinData")
            .field("rebuilder", &self.rebuilder)
            .finish_non_exhaustive()
    }
}

impl<K: BundleItem> BuiltinData<K> {
    /// Build the first snapshot. Any inconsistency in the embedded data is
    /// a hard error here.
    pub async fn open(fs: BuiltinFs, kv: OverlayKv, max_age: Duration) -> Result<Arc<Self>> {
        let first = load_snapshot::<K>(&fs, &kv.bundle_flags().await?, &kv.item_flags().await?)?;
        tracing::info!(
            kind = K::KIND.noun(),
            bundles = first.bundles.len(),
            items = first.item_count(),
            "loaded built-in data"
        );

        let data = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let rebuild: RebuildFn = Arc::new(move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(data) => data.rebuild_now().await,
                        None => Ok(()),
                    }
                }
                .boxed()
            });
            Self {
                fs,
                kv,
                current: RwLock::new(Arc::new(first)),
                rebuilder: AsyncRebuilder::new(max_age, rebuild),
            }
        });
        data.rebuilder.mark_fresh();
        Ok(data)
    }

    async fn rebuild_now(&self) -> Result<()> {
        let bundle_flags = self.kv.bundle_flags().await?;
        let item_flags = self.kv.item_flags().await?;
        let next = load_snapshot::<K>(&self.fs, &bundle_flags, &item_flags)?;
        *self.current.write() = Arc::new(next);
        tracing::debug!(kind = K::KIND.noun(), "built-in snapshot rebuilt");
        Ok(())
    }

    fn current(&self) -> Arc<BuiltinSnapshot<K>> {
        self.rebuilder.trigger();
        self.current.read().clone()
    }

    /// An independent copy of the current snapshot.
    pub fn snapshot(&self) -> BuiltinSnapshot<K> {
        (*self.current()).clone()
    }

    pub fn has_bundle(&self, id: &str) -> bool {
        self.current.read().bundles.contains_key(id)
    }

    pub fn bundle(&self, id: &str) -> Option<Bundle> {
        self.current().bundles.get(id).cloned()
    }

    pub fn item(&self, bundle_id: &str, slug: &str, version: &str) -> Option<K> {
        self.current().item(bundle_id, slug, version).cloned()
    }

    pub fn rebuilder(&self) -> &AsyncRebuilder {
        &self.rebuilder
    }

    /// Rebuild synchronously.
    pub async fn force_rebuild(&self) -> Result<()> {
        self.rebuilder.force().await
    }

    pub async fn set_bundle_enabled(&self, id: &str, enabled: bool) -> Result<Bundle> {
        if !self.has_bundle(id) {
            return Err(Error::BundleNotFound(id.to_string()));
        }
        self.kv.set_bundle_flag(id, enabled).await?;
        self.force_rebuild().await?;
        self.bundle(id)
            .ok_or_else(|| Error::BundleNotFound(id.to_string()))
    }

    /// Drop the overlay flag so the embedded value applies again.
    pub async fn reset_bundle_enabled(&self, id: &str) -> Result<Bundle> {
        if !self.has_bundle(id) {
            return Err(Error::BundleNotFound(id.to_string()));
        }
        self.kv.delete_bundle_flag(id).await?;
        self.force_rebuild().await?;
        self.bundle(id)
            .ok_or_else(|| Error::BundleNotFound(id.to_string()))
    }

    pub async fn set_item_enabled(
        &self,
        bundle_id: &str,
        slug: &str,
        version: &str,
        enabled: bool,
    ) -> Result<K> {
        let item = self
            .item(bundle_id, slug, version)
            .ok_or_else(|| K::KIND.not_found(format!("{bundle_id}/{slug}@{version}")))?;
        self.kv
            .set_item_flag(bundle_id, &item.meta().id, enabled)
            .await?;
        self.force_rebuild().await?;
        self.item(bundle_id, slug, version)
            .ok_or_else(|| K::KIND.not_found(format!("{bundle_id}/{slug}@{version}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::PromptTemplate;
    use tempfile::TempDir;

    const BID: &str = "0190f3a4-5b6c-7d8e-9f01-23456789abcd";

    fn manifest() -> String {
        serde_json::json!({
            "bundles": {
                BID: {"id": BID, "slug": "core", "displayName": "Core", "isEnabled": true}
            }
        })
        .to_string()
    }

    fn template(slug: &str, version: &str) -> String {
        serde_json::json!({
            "id": "0190f3a4-5b6c-7d8e-9f01-000000000001",
            "slug": slug,
            "version": version,
            "displayName": "Summarize",
            "blocks": [{"id": "b1", "role": "user", "content": "Summarize {{text}}"}],
            "variables": [{"name": "text", "type": "string", "source": "user", "required": true}]
        })
        .to_string()
    }

    fn fs_with(files: Vec<(String, String)>) -> BuiltinFs {
        BuiltinFs::from_entries(files)
    }

    fn good_fs() -> BuiltinFs {
        fs_with(vec![
            ("prompts.bundles.json".into(), manifest()),
            (format!("{BID}_core/summarize_1.json"), template("summarize", "1")),
        ])
    }

    fn no_flags() -> (HashMap<String, bool>, HashMap<(String, String), bool>) {
        (HashMap::new(), HashMap::new())
    }

    #[test]
    fn loads_and_stamps_built_in() {
        let (bf, itf) = no_flags();
        let snap = load_snapshot::<PromptTemplate>(&good_fs(), &bf, &itf).unwrap();
        assert!(snap.bundles[BID].is_built_in);
        let item = snap.item(BID, "summarize", "1").unwrap();
        assert!(item.meta.is_built_in);
        assert_eq!(snap.item_count(), 1);
    }

    #[test]
    fn flags_override_embedded_values() {
        let mut bf = HashMap::new();
        bf.insert(BID.to_string(), false);
        let mut itf = HashMap::new();
        itf.insert(
            (BID.to_string(), "0190f3a4-5b6c-7d8e-9f01-000000000001".to_string()),
            false,
        );
        let snap = load_snapshot::<PromptTemplate>(&good_fs(), &bf, &itf).unwrap();
        assert!(!snap.bundles[BID].is_enabled);
        assert!(!snap.item(BID, "summarize", "1").unwrap().meta.is_enabled);
    }

    #[test]
    fn inconsistent_trees_fail() {
        let (bf, itf) = no_flags();
        let cases = vec![
            fs_with(vec![]),
            fs_with(vec![("prompts.bundles.json".into(), "{not json".into())]),
            fs_with(vec![("prompts.bundles.json".into(), r#"{"bundles":{}}"#.into())]),
            fs_with(vec![("prompts.bundles.json".into(), manifest())]),
            fs_with(vec![
                ("prompts.bundles.json".into(), manifest()),
                (format!("{BID}_other/summarize_1.json"), template("summarize", "1")),
            ]),
            fs_with(vec![
                ("prompts.bundles.json".into(), manifest()),
                (format!("{BID}_core/summarize_2.json"), template("summarize", "1")),
            ]),
            fs_with(vec![
                ("prompts.bundles.json".into(), manifest()),
                (format!("{BID}_core/summarize_1.json"), template("summarize", "1")),
                (
                    "0190f3a4-5b6c-7d8e-9f01-ffffffffffff_stray/x_1.json".into(),
                    template("x", "1"),
                ),
            ]),
        ];
        for fs in cases {
            assert!(load_snapshot::<PromptTemplate>(&fs, &bf, &itf).is_err());
        }
    }

    #[tokio::test]
    async fn overlay_toggle_and_reset() {
        let tmp = TempDir::new().unwrap();
        let kv = OverlayKv::open(&tmp.path().join("o.sqlite")).await.unwrap();
        let data = BuiltinData::<PromptTemplate>::open(good_fs(), kv, Duration::from_secs(3600))
            .await
            .unwrap();

        let b = data.set_bundle_enabled(BID, false).await.unwrap();
        assert!(!b.is_enabled);
        assert!(!data.bundle(BID).unwrap().is_enabled);

        let b = data.reset_bundle_enabled(BID).await.unwrap();
        assert!(b.is_enabled);

        let item = data.set_item_enabled(BID, "summarize", "1", false).await.unwrap();
        assert!(!item.meta.is_enabled);
        assert!(data.set_bundle_enabled("nope", false).await.is_err());
    }

    #[tokio::test]
    async fn snapshots_are_independent_copies() {
        let tmp = TempDir::new().unwrap();
        let kv = OverlayKv::open(&tmp.path().join("o.sqlite")).await.unwrap();
        let data = BuiltinData::<PromptTemplate>::open(good_fs(), kv, Duration::from_secs(3600))
            .await
            .unwrap();

        let mut copy = data.snapshot();
        copy.bundles.clear();
        assert!(data.has_bundle(BID));
    }

    #[test]
    fn from_dir_reads_two_levels() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("prompts.bundles.json"), manifest()).unwrap();
        let dir = tmp.path().join(format!("{BID}_core"));
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("summarize_1.json"), template("summarize", "1")).unwrap();
        std::fs::write(dir.join("README.txt"), "ignored").unwrap();

        let fs = BuiltinFs::from_dir(tmp.path()).unwrap();
        assert_eq!(fs.dirs().len(), 1);
        assert_eq!(fs.files_in(&format!("{BID}_core")).count(), 1);
    }
}
