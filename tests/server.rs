//! The HTTP API end to end: a real server on a free port driven through
//! `reqwest`.

use parley::config::Config;
use parley::server::run_server;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WRITING: &str = "0190f3a4-5b6c-7d8e-9f01-23456789abcd";
const ESSENTIALS: &str = "0190f3a4-5b6c-7d8e-9f03-23456789abcd";

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if client.get(&url).send().await.is_ok() {
            return;
        }
    }
    panic!("Server did not start within 5 seconds");
}

/// Starts a server rooted in a fresh directory and returns its base URL.
async fn start() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let mut cfg = Config::with_base_dir(tmp.path());
    cfg.server.bind = format!("127.0.0.1:{port}");
    tokio::spawn(async move {
        run_server(&cfg).await.unwrap();
    });
    wait_for_server(port).await;
    (tmp, format!("http://127.0.0.1:{port}"))
}

#[tokio::test]
async fn test_health() {
    let (_tmp, base) = start().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_prompt_crud_over_http() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();
    let bid = uuid::Uuid::now_v7().to_string();

    let resp = client
        .put(format!("{base}/prompts/bundles/{bid}"))
        .json(&json!({"slug": "slug1", "displayName": "Bundle one"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let item_url = format!("{base}/prompts/bundles/{bid}/templates/t1/version/v1");
    let resp = client
        .put(&item_url)
        .json(&json!({
            "displayName": "T1",
            "blocks": [{"id": "a", "role": "system", "content": "Be brief."}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .patch(format!("{base}/prompts/bundles/{bid}"))
        .json(&json!({"isEnabled": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.get(&item_url).send().await.unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bundle_disabled");

    let body: Value = client
        .get(format!("{item_url}?includeDisabled=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["slug"], "t1");
    assert_eq!(body["version"], "v1");

    let resp = client
        .delete(format!("{base}/prompts/bundles/{bid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client.delete(&item_url).send().await.unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .delete(format!("{base}/prompts/bundles/{bid}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_errors_use_the_error_contract() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/prompts/bundles/not-a-uuid"))
        .json(&json!({"slug": "x", "displayName": "X"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_request");
    assert!(body["error"]["message"].as_str().unwrap().len() > 0);

    let resp = client
        .put(format!("{base}/prompts/bundles/{WRITING}"))
        .json(&json!({"slug": "x", "displayName": "X"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let missing = uuid::Uuid::now_v7();
    let resp = client
        .get(format!("{base}/tools/bundles/{missing}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bundle_not_found");

    let resp = client
        .get(format!("{base}/prompts/templates/search?q="))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_list_and_search_templates() {
    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/prompts/templates?bundleIds={WRITING}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i["bundleId"] == WRITING));

    let body: Value = client
        .get(format!("{base}/prompts/templates/search?q=summarize"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["items"][0]["slug"], "summarize");

    let body: Value = client
        .get(format!("{base}/tools/bundles"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["bundles"][0]["id"], ESSENTIALS);
}

#[tokio::test]
async fn test_invoke_builtin_native_tool() {
    let (_tmp, base) = start().await;
    let body: Value = reqwest::Client::new()
        .post(format!(
            "{base}/tools/bundles/{ESSENTIALS}/tools/text-stats/version/1.0.0/invoke"
        ))
        .json(&json!({"args": {"text": "one two three"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["isError"], false);
    let counts: Value = serde_json::from_str(body["outputs"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(counts["words"], 3);
    assert_eq!(body["meta"]["type"], "go");
}

#[tokio::test]
async fn test_invoke_user_http_tool() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/42"))
        .and(header("authorization", "Bearer abc"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"ok":true}"#, "application/json"))
        .mount(&upstream)
        .await;

    let (_tmp, base) = start().await;
    let client = reqwest::Client::new();
    let bid = uuid::Uuid::now_v7().to_string();
    client
        .put(format!("{base}/tools/bundles/{bid}"))
        .json(&json!({"slug": "remote", "displayName": "Remote"}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();
    client
        .put(format!("{base}/tools/bundles/{bid}/tools/fetch-item/version/1"))
        .json(&json!({
            "type": "http",
            "argSchema": {"type": "object", "properties": {"id": {"type": "string"}}},
            "httpImpl": {
                "request": {
                    "urlTemplate": format!("{}/items/${{id}}", upstream.uri()),
                    "headers": {"Authorization": "Bearer ${SECRET}"}
                }
            }
        }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let body: Value = client
        .post(format!(
            "{base}/tools/bundles/{bid}/tools/fetch-item/version/1/invoke"
        ))
        .json(&json!({"args": {"id": "42"}, "httpOptions": {"secrets": {"SECRET": "abc"}}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["isError"], false, "{body}");
    assert_eq!(body["outputs"][0]["text"], r#"{"ok":true}"#);
    assert_eq!(body["meta"]["type"], "http");
    assert_eq!(body["meta"]["status"], 200);
}

#[tokio::test]
async fn test_attachment_content_block_endpoint() {
    let (tmp, base) = start().await;
    let file = tmp.path().join("README.md");
    std::fs::write(&file, "hello world\n").unwrap();

    let body: Value = reqwest::Client::new()
        .post(format!("{base}/attachments/content-block"))
        .json(&json!({
            "attachment": {
                "kind": "file",
                "mode": "text",
                "fileRef": {"path": file.to_string_lossy()}
            },
            "overrideOriginal": true
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["contentBlock"]["kind"], "text", "{body}");
    assert_eq!(body["contentBlock"]["text"], "hello world\n");
    assert!(body["attachment"]["contentBlock"].is_object());
}
