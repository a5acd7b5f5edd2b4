//! End-to-end tests for the prompt and tool bundle stores: CRUD, the
//! built-in overlay, listing and full-text search.

use parley::bundle::model::{ListBundlesRequest, ListItemsRequest, PutBundleBody, SearchItemsRequest};
use parley::config::Config;
use parley::error::Error;
use parley::prompts::{self, PromptTemplate};
use parley::tools;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const WRITING: &str = "0190f3a4-5b6c-7d8e-9f01-23456789abcd";
const ESSENTIALS: &str = "0190f3a4-5b6c-7d8e-9f03-23456789abcd";

fn bundle_body(slug: &str) -> PutBundleBody {
    serde_json::from_value(json!({"slug": slug, "displayName": slug.to_uppercase()})).unwrap()
}

fn template(description: &str, text: &str) -> PromptTemplate {
    serde_json::from_value(json!({
        "displayName": "Template",
        "description": description,
        "tags": ["test"],
        "blocks": [{"id": "b1", "role": "user", "content": text}]
    }))
    .unwrap()
}

fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[tokio::test]
async fn test_bundle_crud_respects_disabled_bundles() {
    let tmp = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();

    let b1 = new_id();
    store.put_bundle(&b1, bundle_body("slug1")).await.unwrap();
    let t1 = store
        .put_item(&b1, "t1", "v1", template("first", "hello"))
        .await
        .unwrap();
    assert!(!t1.meta.id.is_empty());

    store.patch_bundle(&b1, false).await.unwrap();

    let err = store.get_item(&b1, "t1", "v1", false).await.unwrap_err();
    assert!(matches!(err, Error::BundleDisabled(_)), "{err:?}");

    let got = store.get_item(&b1, "t1", "v1", true).await.unwrap();
    assert_eq!(got.meta.slug, "t1");
    assert_eq!(got.meta.version, "v1");
    assert_eq!(got.blocks[0].content, "hello");
}

#[tokio::test]
async fn test_existing_version_is_a_conflict() {
    let tmp = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();
    let b = new_id();
    store.put_bundle(&b, bundle_body("conflicts")).await.unwrap();
    store.put_item(&b, "t", "1", template("", "x")).await.unwrap();

    let err = store.put_item(&b, "t", "1", template("", "y")).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    store.put_item(&b, "t", "2", template("", "y")).await.unwrap();
}

#[tokio::test]
async fn test_non_empty_bundle_cannot_be_deleted() {
    let tmp = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();
    let b = new_id();
    store.put_bundle(&b, bundle_body("full")).await.unwrap();
    store.put_item(&b, "t", "1", template("", "x")).await.unwrap();

    let err = store.delete_bundle(&b).await.unwrap_err();
    assert!(matches!(err, Error::BundleNotEmpty(_)));

    store.delete_item(&b, "t", "1").await.unwrap();
    store.delete_bundle(&b).await.unwrap();
    let err = store.get_bundle(&b, true).await.unwrap_err();
    assert!(err.is_not_found());

    let page = store
        .list_bundles(ListBundlesRequest {
            include_disabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(page.bundles.iter().all(|x| x.id != b));
}

#[tokio::test]
async fn test_builtin_toggle_lives_in_overlay() {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::with_base_dir(tmp.path());
    let store = prompts::open_store(&cfg).await.unwrap();

    let before = store.get_bundle(WRITING, false).await.unwrap();
    assert!(before.is_enabled && before.is_built_in);

    let patched = store.patch_bundle(WRITING, false).await.unwrap();
    assert!(!patched.is_enabled);
    assert!(!store.get_bundle(WRITING, true).await.unwrap().is_enabled);
    assert!(matches!(
        store.get_bundle(WRITING, false).await.unwrap_err(),
        Error::BundleDisabled(_)
    ));

    // nothing user-visible was written for the built-in bundle
    let manifest = cfg.storage.prompts_dir().join("prompts.bundles.json");
    if manifest.exists() {
        let text = std::fs::read_to_string(&manifest).unwrap();
        assert!(!text.contains(WRITING));
    }
    assert!(matches!(
        store.put_item(WRITING, "x", "1", template("", "x")).await.unwrap_err(),
        Error::BuiltInReadOnly(_)
    ));

    // the flag survives a restart
    drop(store);
    let store = prompts::open_store(&cfg).await.unwrap();
    assert!(!store.get_bundle(WRITING, true).await.unwrap().is_enabled);

    // removing the overlay entry restores the embedded default
    let restored = store
        .builtin()
        .unwrap()
        .reset_bundle_enabled(WRITING)
        .await
        .unwrap();
    assert!(restored.is_enabled);

    // and so does a fresh overlay directory
    let fresh = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(fresh.path())).await.unwrap();
    assert!(store.get_bundle(WRITING, false).await.unwrap().is_enabled);
}

#[tokio::test]
async fn test_list_puts_builtins_first_and_pages() {
    let tmp = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();
    let b = new_id();
    store.put_bundle(&b, bundle_body("mine")).await.unwrap();
    for v in ["1", "2", "3"] {
        store.put_item(&b, "t", v, template("", "x")).await.unwrap();
    }

    let first = store
        .list_items(ListItemsRequest {
            page_size: Some(4),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.items.len(), 4);
    assert!(first.items[..3].iter().all(|i| i.item.meta.is_built_in));
    assert!(!first.items[3].item.meta.is_built_in);

    let rest = store
        .list_items(ListItemsRequest {
            page_size: Some(4),
            page_token: first.next_page_token,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 2);
    assert!(rest.next_page_token.is_none());

    let tagged = store
        .list_items(ListItemsRequest {
            tags: vec!["test".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tagged.items.len(), 3);
}

#[tokio::test]
async fn test_search_sees_writes_and_toggles() {
    let tmp = TempDir::new().unwrap();
    let store = prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();
    let b = new_id();
    store.put_bundle(&b, bundle_body("notes")).await.unwrap();
    store
        .put_item(&b, "release", "1", template("Draft release notes", "List the changes"))
        .await
        .unwrap();

    let search = |q: &str, include_disabled: bool| SearchItemsRequest {
        query: q.to_string(),
        include_disabled,
        ..Default::default()
    };

    let hits = store.search_items(search("release", false)).await.unwrap();
    assert_eq!(hits.items.len(), 1);
    assert_eq!(hits.items[0].bundle_id, b);

    store.patch_item(&b, "release", "1", false).await.unwrap();
    assert!(store.search_items(search("release", false)).await.unwrap().items.is_empty());
    assert_eq!(store.search_items(search("release", true)).await.unwrap().items.len(), 1);

    store.delete_item(&b, "release", "1").await.unwrap();
    assert!(store.search_items(search("release", true)).await.unwrap().items.is_empty());

    assert!(matches!(
        store.search_items(search("  ", false)).await.unwrap_err(),
        Error::InvalidRequest(_)
    ));
}

#[tokio::test]
async fn test_reindex_drops_rows_for_removed_files() {
    let tmp = TempDir::new().unwrap();
    let cfg = Config::with_base_dir(tmp.path());
    let b = new_id();
    let path = {
        let store = prompts::open_store(&cfg).await.unwrap();
        store.put_bundle(&b, bundle_body("gone")).await.unwrap();
        store
            .put_item(&b, "ephemeral", "1", template("vanishing prompt", "x"))
            .await
            .unwrap();
        let bundle = store.get_bundle(&b, true).await.unwrap();
        store.bundle_dir(&bundle).join("ephemeral_1.json")
    };
    std::fs::remove_file(&path).unwrap();

    let store = prompts::open_store(&cfg).await.unwrap();
    let stats = store.reindex().await.unwrap();
    assert_eq!(stats.removed, 1);
    let hits = store
        .search_items(SearchItemsRequest {
            query: "vanishing".into(),
            include_disabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(hits.items.is_empty());
}

#[tokio::test]
async fn test_builtin_tools_are_searchable() {
    let tmp = TempDir::new().unwrap();
    let store = tools::open_store(&Config::with_base_dir(tmp.path())).await.unwrap();
    let hits = store
        .search_items(SearchItemsRequest {
            query: "time".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(hits.items.iter().any(|i| i.bundle_id == ESSENTIALS));

    store.patch_bundle(ESSENTIALS, false).await.unwrap();
    let hits = store
        .search_items(SearchItemsRequest {
            query: "time".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(hits.items.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_item_writes_serialize_with_bundle_changes() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(prompts::open_store(&Config::with_base_dir(tmp.path())).await.unwrap());

    for i in 0..50 {
        // put_item against delete_bundle: exactly one of them wins
        let b = new_id();
        store.put_bundle(&b, bundle_body(&format!("race-{i}"))).await.unwrap();
        let put = {
            let (store, b) = (store.clone(), b.clone());
            tokio::spawn(async move { store.put_item(&b, "t", "1", template("", "x")).await })
        };
        let del = {
            let (store, b) = (store.clone(), b.clone());
            tokio::spawn(async move { store.delete_bundle(&b).await })
        };
        let (put, del) = (put.await.unwrap(), del.await.unwrap());
        match (&put, &del) {
            (Ok(_), Err(Error::BundleNotEmpty(_))) => {
                assert!(store.get_item(&b, "t", "1", true).await.is_ok());
            }
            (Err(e), Ok(())) => {
                assert!(e.is_not_found(), "{e:?}");
                assert!(store.get_bundle(&b, true).await.unwrap_err().is_not_found());
            }
            _ => panic!("put={put:?} delete={del:?}"),
        }

        // put_item against a slug rename: the item stays readable
        let b = new_id();
        store.put_bundle(&b, bundle_body(&format!("before-{i}"))).await.unwrap();
        let put = {
            let (store, b) = (store.clone(), b.clone());
            tokio::spawn(async move { store.put_item(&b, "t", "1", template("", "x")).await })
        };
        let rename = {
            let (store, b) = (store.clone(), b.clone());
            let body = bundle_body(&format!("after-{i}"));
            tokio::spawn(async move { store.put_bundle(&b, body).await })
        };
        put.await.unwrap().unwrap();
        rename.await.unwrap().unwrap();
        let got = store.get_item(&b, "t", "1", true).await.unwrap();
        assert_eq!(got.meta.slug, "t");
        assert_eq!(store.get_bundle(&b, true).await.unwrap().slug, format!("after-{i}"));
    }
}
