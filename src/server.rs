//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/attachments/content-block` | Build the content block for one attachment |
//! | `GET`  | `/prompts/bundles` | List prompt bundles |
//! | `GET` `PUT` `PATCH` `DELETE` | `/prompts/bundles/{bundleID}` | One prompt bundle |
//! | `GET` `PUT` `PATCH` `DELETE` | `/prompts/bundles/{bundleID}/templates/{slug}/version/{version}` | One template version |
//! | `GET`  | `/prompts/templates` | List templates |
//! | `GET`  | `/prompts/templates/search?q=` | Full-text search over templates |
//! | `GET`  | `/tools/bundles` | List tool bundles |
//! | `GET` `PUT` `PATCH` `DELETE` | `/tools/bundles/{bundleID}` | One tool bundle |
//! | `GET` `PUT` `PATCH` `DELETE` | `/tools/bundles/{bundleID}/tools/{slug}/version/{version}` | One tool version |
//! | `POST` | `/tools/bundles/{bundleID}/tools/{slug}/version/{version}/invoke` | Invoke a tool |
//! | `GET`  | `/tools/tools` | List tools |
//! | `GET`  | `/tools/tools/search?q=` | Full-text search over tools |
//!
//! List endpoints take `includeDisabled`, `pageSize`, `pageToken`,
//! `bundleIds` and `tags` (both comma separated).
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bundle_not_found", "message": "bundle not found: …" } }
//! ```
//!
//! The code is [`Error::code`]; the status follows the error family
//! (400 invalid, 403 read-only or disabled, 404 missing, 409 conflict,
//! 413 too large, 422 unusable attachment, 408 timeout, 503 cancelled,
//! 502 upstream, 500 internal).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::attachment::build::{AttachmentBuilder, BuildOptions};
use crate::attachment::model::{Attachment, ContentBlock};
use crate::bundle::model::{
    Bundle, BundleItem, BundlePage, ItemPage, ListBundlesRequest, ListItemsRequest, PatchEnabled,
    PutBundleBody, SearchItemsRequest,
};
use crate::bundle::store::BundleStore;
use crate::config::Config;
use crate::error::Error;
use crate::prompts::{self, PromptStore};
use crate::tools::invoke::{InvokeRequest, InvokeResponse, ToolInvoker};
use crate::tools::native;
use crate::tools::{self, Tool, ToolStore};

/// Shared services behind the routes.
#[derive(Clone)]
pub struct AppState {
    pub prompts: Arc<PromptStore>,
    pub tools: Arc<ToolStore>,
    pub invoker: Arc<ToolInvoker>,
    pub attachments: Arc<AttachmentBuilder>,
}

impl AppState {
    /// Open both stores and the attachment and tool clients.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let prompts = prompts::open_store(config).await?;
        let tools = tools::open_store(config).await?;
        let invoker = ToolInvoker::new(native::global().clone(), config.attachments.max_fetch_bytes)?;
        let attachments = AttachmentBuilder::new(&config.attachments)?;
        Ok(Self {
            prompts: Arc::new(prompts),
            tools: Arc::new(tools),
            invoker: Arc::new(invoker),
            attachments: Arc::new(attachments),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::open(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// The full route table.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let attachments = Router::new()
        .route("/content-block", post(handle_content_block))
        .with_state(state.attachments.clone());
    let invoke = Router::new()
        .route(
            "/bundles/{bundle_id}/tools/{slug}/version/{version}/invoke",
            post(handle_invoke),
        )
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handle_health))
        .nest("/attachments", attachments)
        .nest("/prompts", bundle_routes(state.prompts.clone(), "templates"))
        .nest("/tools", bundle_routes(state.tools.clone(), "tools").merge(invoke))
        .layer(cors)
}

/// CRUD, list and search routes for one store. `items` is the path
/// segment naming its items.
fn bundle_routes<K: BundleItem>(store: Arc<BundleStore<K>>, items: &str) -> Router {
    Router::new()
        .route("/bundles", get(handle_list_bundles::<K>))
        .route(
            "/bundles/{bundle_id}",
            put(handle_put_bundle::<K>)
                .patch(handle_patch_bundle::<K>)
                .delete(handle_delete_bundle::<K>)
                .get(handle_get_bundle::<K>),
        )
        .route(
            &format!("/bundles/{{bundle_id}}/{items}/{{slug}}/version/{{version}}"),
            put(handle_put_item::<K>)
                .patch(handle_patch_item::<K>)
                .delete(handle_delete_item::<K>)
                .get(handle_get_item::<K>),
        )
        .route(&format!("/{items}"), get(handle_list_items::<K>))
        .route(&format!("/{items}/search"), get(handle_search_items::<K>))
        .with_state(store)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Library error rendered with the status of its family.
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError(e)
    }
}

/// HTTP status for an error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::BundleNotFound(_) | Error::ToolNotFound(_) | Error::TemplateNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::Conflict(_) | Error::BundleNotEmpty(_) | Error::ExistingContentBlock => {
            StatusCode::CONFLICT
        }
        Error::BuiltInReadOnly(_)
        | Error::BundleDisabled(_)
        | Error::ToolDisabled(_)
        | Error::TemplateDisabled(_) => StatusCode::FORBIDDEN,
        Error::ResponseTooLarge { .. } | Error::PageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        Error::NoContentExtracted(_)
        | Error::AttachmentModifiedSinceSnapshot(_)
        | Error::NonTextContentBlock(_)
        | Error::UnreadableFile(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        Error::Http(_) | Error::HttpStatus { .. } => StatusCode::BAD_GATEWAY,
        Error::Io(_) | Error::Database(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn decode_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|e| AppError(Error::invalid(format!("invalid body: {e}"))))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ query parameters ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListQuery {
    include_disabled: bool,
    page_size: Option<usize>,
    page_token: Option<String>,
    bundle_ids: Option<String>,
    tags: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GetQuery {
    include_disabled: bool,
}

fn split_csv(v: Option<String>) -> Vec<String> {
    v.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

// ============ bundles ============

async fn handle_list_bundles<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<BundlePage> {
    let page = store
        .list_bundles(ListBundlesRequest {
            bundle_ids: split_csv(q.bundle_ids),
            include_disabled: q.include_disabled,
            page_size: q.page_size,
            page_token: q.page_token,
        })
        .await?;
    Ok(Json(page))
}

async fn handle_put_bundle<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path(bundle_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Bundle> {
    let body: PutBundleBody = decode_body(body)?;
    Ok(Json(store.put_bundle(&bundle_id, body).await?))
}

async fn handle_patch_bundle<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path(bundle_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Bundle> {
    let body: PatchEnabled = decode_body(body)?;
    Ok(Json(store.patch_bundle(&bundle_id, body.is_enabled).await?))
}

async fn handle_delete_bundle<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path(bundle_id): Path<String>,
) -> Result<StatusCode, AppError> {
    store.delete_bundle(&bundle_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_get_bundle<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path(bundle_id): Path<String>,
    Query(q): Query<GetQuery>,
) -> ApiResult<Bundle> {
    Ok(Json(store.get_bundle(&bundle_id, q.include_disabled).await?))
}

// ============ items ============

async fn handle_put_item<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path((bundle_id, slug, version)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<K>), AppError> {
    let item: K = decode_body(body)?;
    let item = store.put_item(&bundle_id, &slug, &version, item).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn handle_patch_item<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path((bundle_id, slug, version)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<K> {
    let body: PatchEnabled = decode_body(body)?;
    let item = store
        .patch_item(&bundle_id, &slug, &version, body.is_enabled)
        .await?;
    Ok(Json(item))
}

async fn handle_delete_item<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path((bundle_id, slug, version)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    store.delete_item(&bundle_id, &slug, &version).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_get_item<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Path((bundle_id, slug, version)): Path<(String, String, String)>,
    Query(q): Query<GetQuery>,
) -> ApiResult<K> {
    let item = store
        .get_item(&bundle_id, &slug, &version, q.include_disabled)
        .await?;
    Ok(Json(item))
}

async fn handle_list_items<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<ItemPage<K>> {
    let page = store
        .list_items(ListItemsRequest {
            bundle_ids: split_csv(q.bundle_ids),
            tags: split_csv(q.tags),
            include_disabled: q.include_disabled,
            page_size: q.page_size,
            page_token: q.page_token,
        })
        .await?;
    Ok(Json(page))
}

async fn handle_search_items<K: BundleItem>(
    State(store): State<Arc<BundleStore<K>>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<ItemPage<K>> {
    let page = store
        .search_items(SearchItemsRequest {
            query: q.q.unwrap_or_default(),
            include_disabled: q.include_disabled,
            page_size: q.page_size,
            page_token: q.page_token,
        })
        .await?;
    Ok(Json(page))
}

// ============ POST .../invoke ============

async fn handle_invoke(
    State(state): State<AppState>,
    Path((bundle_id, slug, version)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<InvokeResponse> {
    let req: InvokeRequest = decode_body(body)?;
    let tool: Tool = state.tools.get_item(&bundle_id, &slug, &version, false).await?;
    Ok(Json(state.invoker.invoke(&tool, req).await?))
}

// ============ POST /attachments/content-block ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockRequest {
    attachment: Attachment,
    #[serde(flatten)]
    options: BuildOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockResponse {
    attachment: Attachment,
    content_block: ContentBlock,
}

async fn handle_content_block(
    State(builder): State<Arc<AttachmentBuilder>>,
    Json(body): Json<Value>,
) -> ApiResult<ContentBlockResponse> {
    let ContentBlockRequest {
        mut attachment,
        options,
    } = decode_body(body)?;
    let content_block = builder.build_content_block(&mut attachment, options).await?;
    Ok(Json(ContentBlockResponse {
        attachment,
        content_block,
    }))
}
