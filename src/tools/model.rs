//! Tool records: the item kind stored by the tool bundle store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::bundle::model::{BundleItem, ItemKind, ItemMeta};
use crate::error::{Error, Result};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);
pub const WEB_SEARCH_SDK: &str = "webSearch";

fn yes() -> bool {
    true
}

/// How the model sees the tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LlmToolType {
    #[default]
    Function,
    Custom,
    WebSearch,
}

/// How the tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolImplType {
    /// An in-process function from the native registry. Stored as `go`.
    #[serde(rename = "go", alias = "native")]
    Native,
    Http,
    /// Executed by the inference provider's SDK.
    Sdk,
}

impl ToolImplType {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolImplType::Native => "go",
            ToolImplType::Http => "http",
            ToolImplType::Sdk => "sdk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeToolImpl {
    /// Fully qualified function id, e.g. `parley/text.count`.
    pub func: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HttpAuthType {
    Bearer,
    Header,
    Query,
}

/// Credentials attached to the outgoing request. `value_template` is
/// expanded like the other templates, usually from a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpAuth {
    #[serde(rename = "type")]
    pub auth_type: HttpAuthType,
    /// Header or query parameter name; ignored for bearer.
    #[serde(default)]
    pub name: String,
    pub value_template: String,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestTemplate {
    #[serde(default = "default_method")]
    pub method: String,
    pub url_template: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorMode {
    /// Non-success status is reported as a tool error.
    #[default]
    Fail,
    /// Non-success status yields no outputs and no error.
    Empty,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyOutputMode {
    #[default]
    Auto,
    Text,
    File,
    Image,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseSpec {
    /// Empty means any 2xx.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_codes: Vec<u16>,
    #[serde(default)]
    pub error_mode: ErrorMode,
    #[serde(default)]
    pub body_output_mode: BodyOutputMode,
}

impl HttpResponseSpec {
    pub fn is_success(&self, status: u16) -> bool {
        if self.success_codes.is_empty() {
            (200..300).contains(&status)
        } else {
            self.success_codes.contains(&status)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpToolImpl {
    pub request: HttpRequestTemplate,
    #[serde(default)]
    pub response: HttpResponseSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HttpAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl HttpToolImpl {
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkToolImpl {
    pub sdk_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(flatten)]
    pub meta: ItemMeta,
    #[serde(default)]
    pub llm_tool_type: LlmToolType,
    #[serde(rename = "type")]
    pub impl_type: ToolImplType,
    /// JSON schema of the arguments, as an object or as JSON text.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arg_schema: Value,
    #[serde(default = "yes")]
    pub llm_callable: bool,
    #[serde(
        default,
        rename = "goImpl",
        alias = "nativeImpl",
        skip_serializing_if = "Option::is_none"
    )]
    pub native_impl: Option<NativeToolImpl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_impl: Option<HttpToolImpl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_impl: Option<SdkToolImpl>,
}

impl Tool {
    /// The argument schema as a JSON value; `{"type":"object"}` when unset.
    pub fn arg_schema(&self) -> Result<Value> {
        match &self.arg_schema {
            Value::Null => Ok(serde_json::json!({"type": "object"})),
            Value::String(s) if s.trim().is_empty() => Ok(serde_json::json!({"type": "object"})),
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| Error::invalid(format!("argSchema is not valid JSON: {e}"))),
            Value::Object(_) => Ok(self.arg_schema.clone()),
            _ => Err(Error::invalid("argSchema must be a JSON object")),
        }
    }

    /// `name title description` of every schema property, space separated.
    pub fn arg_text(&self) -> String {
        let Ok(schema) = self.arg_schema() else {
            return String::new();
        };
        let mut words = Vec::new();
        collect_properties(&schema, &mut words);
        words.join(" ")
    }

    /// Short implementation signature for search, e.g. `GET https://…`.
    pub fn impl_signature(&self) -> String {
        match self.impl_type {
            ToolImplType::Native => self
                .native_impl
                .as_ref()
                .map(|n| n.func.clone())
                .unwrap_or_default(),
            ToolImplType::Http => self
                .http_impl
                .as_ref()
                .map(|h| format!("{} {}", h.request.method, h.request.url_template))
                .unwrap_or_default(),
            ToolImplType::Sdk => self
                .sdk_impl
                .as_ref()
                .map(|s| s.sdk_type.clone())
                .unwrap_or_default(),
        }
    }
}

fn collect_properties(schema: &Value, out: &mut Vec<String>) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, prop) in props {
        out.push(name.clone());
        for key in ["title", "description"] {
            if let Some(s) = prop.get(key).and_then(Value::as_str) {
                out.push(s.to_string());
            }
        }
        collect_properties(prop, out);
    }
}

impl BundleItem for Tool {
    const KIND: ItemKind = ItemKind::Tool;
    const FTS_COLUMNS: &'static [&'static str] = &[
        "slug",
        "display_name",
        "description",
        "args",
        "tags",
        "impl_type",
        "impl_meta",
    ];
    const FTS_WEIGHTS: &'static [f64] = &[10.0, 8.0, 4.0, 3.0, 6.0, 1.0, 1.0];

    fn meta(&self) -> &ItemMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ItemMeta {
        &mut self.meta
    }

    fn validate_payload(&self) -> Result<()> {
        self.arg_schema()?;
        match self.impl_type {
            ToolImplType::Native => {
                let native = self
                    .native_impl
                    .as_ref()
                    .ok_or_else(|| Error::invalid("go tools need goImpl"))?;
                if native.func.trim().is_empty() {
                    return Err(Error::invalid("goImpl.func is required"));
                }
                if self.http_impl.is_some() {
                    return Err(Error::invalid("go tools cannot carry httpImpl"));
                }
            }
            ToolImplType::Http => {
                let http = self
                    .http_impl
                    .as_ref()
                    .ok_or_else(|| Error::invalid("http tools need httpImpl"))?;
                if http.request.url_template.trim().is_empty() {
                    return Err(Error::invalid("httpImpl.request.urlTemplate is required"));
                }
                if reqwest::Method::from_bytes(http.request.method.as_bytes()).is_err() {
                    return Err(Error::invalid(format!(
                        "unknown HTTP method {:?}",
                        http.request.method
                    )));
                }
                if let Some(code) = http
                    .response
                    .success_codes
                    .iter()
                    .find(|c| !(100..=599).contains(*c))
                {
                    return Err(Error::invalid(format!("invalid success code {code}")));
                }
                if self.native_impl.is_some() {
                    return Err(Error::invalid("http tools cannot carry goImpl"));
                }
            }
            ToolImplType::Sdk => {
                let sdk = self
                    .sdk_impl
                    .as_ref()
                    .ok_or_else(|| Error::invalid("sdk tools need sdkImpl"))?;
                if sdk.sdk_type.trim().is_empty() {
                    return Err(Error::invalid("sdkImpl.sdkType is required"));
                }
            }
        }
        Ok(())
    }

    fn fts_values(&self) -> Vec<String> {
        vec![
            self.meta.slug.clone(),
            self.meta.display_name.clone(),
            self.meta.description.clone(),
            self.arg_text(),
            self.meta.tags.join(" "),
            self.impl_type.as_str().to_string(),
            self.impl_signature(),
        ]
    }
}
