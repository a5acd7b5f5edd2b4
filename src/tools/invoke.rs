//! Tool invocation.
//!
//! Transport failures (connection refused, TLS errors) are returned as
//! `Err`. Failures the tool itself reports (non-success status, handler
//! errors, timeouts, malformed bodies) come back as `Ok` with `is_error`
//! set so a model can read them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::FutureExt;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::attachment::fetch::{file_name_of, validate_url};
use crate::attachment::mime;
use crate::attachment::model::{BinaryBlock, ContentBlock, TextBlock};
use crate::error::{Error, Result};
use crate::tools::model::{
    BodyOutputMode, ErrorMode, HttpAuthType, HttpToolImpl, NativeToolImpl, Tool, ToolImplType,
    DEFAULT_TOOL_TIMEOUT,
};
use crate::tools::native::NativeRegistry;

pub const DEADLINE_EXCEEDED: &str = "context deadline exceeded";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeHttpOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Values for `${NAME}` placeholders. They take precedence over args.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeNativeOptions {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub http_options: Option<InvokeHttpOptions>,
    #[serde(default, rename = "goOptions", alias = "nativeOptions")]
    pub native_options: Option<InvokeNativeOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    pub outputs: Vec<ContentBlock>,
    pub meta: Map<String, Value>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl InvokeResponse {
    fn ok(outputs: Vec<ContentBlock>, meta: Map<String, Value>) -> Self {
        Self {
            outputs,
            meta,
            is_error: false,
            error_message: None,
        }
    }

    fn tool_error(message: impl Into<String>, meta: Map<String, Value>) -> Self {
        Self {
            outputs: Vec::new(),
            meta,
            is_error: true,
            error_message: Some(message.into()),
        }
    }
}

fn timeout_from(call: Option<u64>, tool: Option<u64>) -> Duration {
    call.filter(|ms| *ms > 0)
        .or(tool.filter(|ms| *ms > 0))
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TOOL_TIMEOUT)
}

/// Template variables from the call's args, overridden by secrets.
fn template_vars(args: &Value, secrets: &HashMap<String, String>) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    match args {
        Value::Null => {}
        Value::Object(map) => {
            for (k, v) in map {
                let s = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                vars.insert(k.clone(), s);
            }
        }
        _ => return Err(Error::invalid("tool args must be a JSON object")),
    }
    for (k, v) in secrets {
        vars.insert(k.clone(), v.clone());
    }
    Ok(vars)
}

/// Replace every `${name}`. With `encode`, values are percent-encoded for
/// use inside a URL. The error names the first unknown variable.
pub fn expand_template(
    template: &str,
    vars: &HashMap<String, String>,
    encode: bool,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = after[..end].trim();
        let value = vars.get(name).ok_or_else(|| name.to_string())?;
        if encode {
            out.push_str(&urlencoding::encode(value));
        } else {
            out.push_str(value);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ToolInvoker {
    client: reqwest::Client,
    registry: Arc<NativeRegistry>,
    max_body_bytes: u64,
}

impl ToolInvoker {
    pub fn new(registry: Arc<NativeRegistry>, max_body_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            registry,
            max_body_bytes,
        })
    }

    pub async fn invoke(&self, tool: &Tool, req: InvokeRequest) -> Result<InvokeResponse> {
        let started = Instant::now();
        let mut resp = match tool.impl_type {
            ToolImplType::Native => {
                let native = tool
                    .native_impl
                    .as_ref()
                    .ok_or_else(|| Error::invalid("tool has no goImpl"))?;
                let opts = req.native_options.unwrap_or_default();
                self.invoke_native(native, req.args, &opts).await?
            }
            ToolImplType::Http => {
                let http = tool
                    .http_impl
                    .as_ref()
                    .ok_or_else(|| Error::invalid("tool has no httpImpl"))?;
                let opts = req.http_options.unwrap_or_default();
                self.invoke_http(http, &req.args, &opts).await?
            }
            ToolImplType::Sdk => {
                return Err(Error::invalid(
                    "sdk tools are executed by the inference provider",
                ))
            }
        };
        resp.meta.insert(
            "durationMs".into(),
            Value::from(started.elapsed().as_millis() as u64),
        );
        tracing::debug!(
            tool = %tool.meta.slug,
            version = %tool.meta.version,
            is_error = resp.is_error,
            "tool invoked"
        );
        Ok(resp)
    }

    async fn invoke_native(
        &self,
        native: &NativeToolImpl,
        args: Value,
        opts: &InvokeNativeOptions,
    ) -> Result<InvokeResponse> {
        let mut meta = Map::new();
        meta.insert("type".into(), ToolImplType::Native.as_str().into());
        meta.insert("func".into(), native.func.clone().into());

        let func = self
            .registry
            .get(&native.func)
            .ok_or_else(|| Error::invalid(format!("native function {} is not registered", native.func)))?;
        let timeout = timeout_from(opts.timeout_ms, native.timeout_ms);

        let call = AssertUnwindSafe(func.call(args)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Err(_) => Ok(InvokeResponse::tool_error(DEADLINE_EXCEEDED, meta)),
            Ok(Err(_)) => Err(Error::Internal(format!(
                "native function {} panicked",
                native.func
            ))),
            Ok(Ok(Err(e))) => Ok(InvokeResponse::tool_error(e.to_string(), meta)),
            Ok(Ok(Ok(outputs))) => Ok(InvokeResponse::ok(outputs, meta)),
        }
    }

    async fn invoke_http(
        &self,
        http: &HttpToolImpl,
        args: &Value,
        opts: &InvokeHttpOptions,
    ) -> Result<InvokeResponse> {
        let mut meta = Map::new();
        meta.insert("type".into(), "http".into());

        let vars = template_vars(args, &opts.secrets)?;
        let expand = |t: &str, encode: bool| {
            expand_template(t, &vars, encode)
                .map_err(|name| format!("missing template variable ${{{name}}}"))
        };

        let request = &http.request;
        let url = match expand(&request.url_template, true) {
            Ok(u) => u,
            Err(msg) => return Ok(InvokeResponse::tool_error(msg, meta)),
        };
        let url = match validate_url(&url) {
            Ok(u) => u,
            Err(e) => return Ok(InvokeResponse::tool_error(e.to_string(), meta)),
        };
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::invalid(format!("unknown HTTP method {:?}", request.method)))?;
        meta.insert("method".into(), method.as_str().into());

        let timeout = timeout_from(opts.timeout_ms, http.timeout_ms);
        let mut builder = self.client.request(method, url.clone()).timeout(timeout);

        let mut query = Vec::new();
        for (k, v) in &request.query {
            match expand(v, false) {
                Ok(v) => query.push((k.clone(), v)),
                Err(msg) => return Ok(InvokeResponse::tool_error(msg, meta)),
            }
        }
        let mut has_content_type = false;
        for (k, v) in &request.headers {
            let value = match expand(v, false) {
                Ok(v) => v,
                Err(msg) => return Ok(InvokeResponse::tool_error(msg, meta)),
            };
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| Error::invalid(format!("invalid header name {k:?}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|_| Error::invalid(format!("invalid value for header {k}")))?;
            has_content_type |= name == CONTENT_TYPE;
            builder = builder.header(name, value);
        }
        if let Some(auth) = &http.auth {
            let value = match expand(&auth.value_template, false) {
                Ok(v) => v,
                Err(msg) => return Ok(InvokeResponse::tool_error(msg, meta)),
            };
            builder = match auth.auth_type {
                HttpAuthType::Bearer => builder.bearer_auth(value),
                HttpAuthType::Header => builder.header(auth.name.as_str(), value),
                HttpAuthType::Query => {
                    query.push((auth.name.clone(), value));
                    builder
                }
            };
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = &request.body {
            let body = match expand(body, false) {
                Ok(b) => b,
                Err(msg) => return Ok(InvokeResponse::tool_error(msg, meta)),
            };
            if !has_content_type && serde_json::from_str::<Value>(&body).is_ok() {
                builder = builder.header(CONTENT_TYPE, "application/json");
            }
            builder = builder.body(body);
        }

        let mut response = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Ok(InvokeResponse::tool_error(DEADLINE_EXCEEDED, meta))
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status().as_u16();
        meta.insert("status".into(), status.into());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(mime::normalize_mime)
            .filter(|m| !m.is_empty());
        if let Some(ct) = &content_type {
            meta.insert("contentType".into(), ct.clone().into());
        }

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() as u64 > self.max_body_bytes {
                        return Err(Error::ResponseTooLarge {
                            limit: self.max_body_bytes,
                        });
                    }
                }
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    return Ok(InvokeResponse::tool_error(DEADLINE_EXCEEDED, meta))
                }
                Err(e) => return Err(e.into()),
            }
        }

        if status == 204 {
            return Ok(InvokeResponse::ok(Vec::new(), meta));
        }
        if !http.response.is_success(status) {
            return Ok(match http.response.error_mode {
                ErrorMode::Empty => InvokeResponse::ok(Vec::new(), meta),
                ErrorMode::Fail => {
                    let text = String::from_utf8_lossy(&body);
                    let snippet: String = text.chars().take(512).collect();
                    InvokeResponse::tool_error(format!("HTTP {status}: {snippet}"), meta)
                }
            });
        }
        if body.is_empty() {
            return Ok(InvokeResponse::ok(Vec::new(), meta));
        }

        let mime_type = match &content_type {
            Some(ct) if ct != mime::MIME_OCTET_STREAM => ct.clone(),
            _ => mime::sniff(&body).to_string(),
        };
        let mode = match http.response.body_output_mode {
            BodyOutputMode::Auto => match mime::bucket_for_mime(&mime_type) {
                mime::Bucket::Text => BodyOutputMode::Text,
                mime::Bucket::Image => BodyOutputMode::Image,
                _ => BodyOutputMode::File,
            },
            m => m,
        };

        let output = match mode {
            BodyOutputMode::Text => {
                let text = String::from_utf8_lossy(&body).into_owned();
                let is_json = mime_type == "application/json" || mime_type.ends_with("+json");
                if is_json && serde_json::from_str::<Value>(&text).is_err() {
                    return Ok(InvokeResponse::tool_error("invalid JSON response body", meta));
                }
                ContentBlock::Text(TextBlock {
                    text,
                    mime_type: Some(mime_type),
                    ..Default::default()
                })
            }
            BodyOutputMode::Image => ContentBlock::Image(BinaryBlock {
                base64_data: Some(STANDARD.encode(&body)),
                mime_type,
                ..Default::default()
            }),
            BodyOutputMode::File | BodyOutputMode::Auto => ContentBlock::File(BinaryBlock {
                base64_data: Some(STANDARD.encode(&body)),
                mime_type,
                file_name: file_name_of(url.as_str()),
                ..Default::default()
            }),
        };
        Ok(InvokeResponse::ok(vec![output], meta))
    }
}
