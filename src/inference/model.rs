//! Provider-agnostic conversation and request shapes.
//!
//! Inputs and outputs are tagged unions discriminated by `kind`. A provider
//! adapter maps them onto its own wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachment::model::{Attachment, BinaryBlock};
use crate::prompts::Role;
use crate::tools::model::{LlmToolType, ToolImplType};

pub const DEFAULT_MAX_PROMPT_LENGTH: u32 = 8000;

// ═══════════════════════════════════════════════════════════════════════
// Content
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContentItem {
    Text(TextContent),
    Image(BinaryBlock),
    File(BinaryBlock),
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text(TextContent { text: text.into() })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Inputs and outputs
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

/// A message the model produced earlier, echoed back as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reasoning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionToolCall {
    pub call_id: String,
    pub name: String,
    /// JSON text produced by the model.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomToolCall {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutput {
    pub call_id: String,
    #[serde(default)]
    pub output: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchToolCall {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchToolOutput {
    pub call_id: String,
    #[serde(default)]
    pub results: Vec<WebSearchResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputUnion {
    InputMessage(InputMessage),
    OutputMessage(OutputMessage),
    Reasoning(Reasoning),
    FunctionToolCall(FunctionToolCall),
    CustomToolCall(CustomToolCall),
    FunctionToolOutput(ToolCallOutput),
    CustomToolOutput(ToolCallOutput),
    WebSearchToolCall(WebSearchToolCall),
    WebSearchToolOutput(WebSearchToolOutput),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputUnion {
    OutputMessage(OutputMessage),
    Reasoning(Reasoning),
    FunctionToolCall(FunctionToolCall),
    CustomToolCall(CustomToolCall),
    WebSearchToolCall(WebSearchToolCall),
    WebSearchToolOutput(WebSearchToolOutput),
    /// Any kind this crate does not know; dropped when replayed.
    #[serde(other)]
    Unknown,
}

impl OutputUnion {
    /// The input that replays this output in a later request.
    pub fn into_input(self) -> Option<InputUnion> {
        match self {
            OutputUnion::OutputMessage(m) => Some(InputUnion::OutputMessage(m)),
            OutputUnion::Reasoning(r) => Some(InputUnion::Reasoning(r)),
            OutputUnion::FunctionToolCall(c) => Some(InputUnion::FunctionToolCall(c)),
            OutputUnion::CustomToolCall(c) => Some(InputUnion::CustomToolCall(c)),
            OutputUnion::WebSearchToolCall(c) => Some(InputUnion::WebSearchToolCall(c)),
            OutputUnion::WebSearchToolOutput(o) => Some(InputUnion::WebSearchToolOutput(o)),
            OutputUnion::Unknown => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Turns and parameters
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParam {
    pub name: String,
    /// Prompt budget in tokens; 0 means the default.
    #[serde(default)]
    pub max_prompt_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

/// One user or assistant turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: Role,
    #[serde(default)]
    pub inputs: Vec<InputUnion>,
    #[serde(default)]
    pub outputs: Vec<OutputUnion>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_param: Option<ModelParam>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            inputs: vec![InputUnion::InputMessage(InputMessage {
                role: Role::User,
                content: vec![ContentItem::text(text)],
            })],
            outputs: Vec::new(),
            attachments: Vec::new(),
            model_param: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tool choices
// ═══════════════════════════════════════════════════════════════════════

/// A tool version picked for a turn, by reference into the tool store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStoreChoice {
    pub choice_id: String,
    pub bundle_id: String,
    pub tool_slug: String,
    pub tool_version: String,
    pub tool_type: ToolImplType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Caller-supplied configuration, currently only for web search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_arg_schema_instance: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchContextSize {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebSearchArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_context_size: Option<SearchContextSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_location: Option<UserLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,
}

/// A hydrated tool definition ready for the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolChoice {
    pub choice_id: String,
    pub bundle_id: String,
    pub tool_id: String,
    /// Name the model calls the tool by.
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tool_type: LlmToolType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search_arguments: Option<WebSearchArguments>,
}

// ═══════════════════════════════════════════════════════════════════════
// Client request / response
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCompletionRequest {
    pub model_param: ModelParam,
    pub inputs: Vec<InputUnion>,
    #[serde(default)]
    pub tool_choices: Vec<ToolChoice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCompletionResponse {
    #[serde(default)]
    pub outputs: Vec<OutputUnion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_output_kinds_parse_and_drop() {
        let outputs: Vec<OutputUnion> = serde_json::from_value(serde_json::json!([
            {"kind": "reasoning", "summary": ["thinking"]},
            {"kind": "imageGenerationCall", "id": "x"},
        ]))
        .unwrap();
        assert_eq!(outputs[1], OutputUnion::Unknown);
        let inputs: Vec<_> = outputs.into_iter().filter_map(OutputUnion::into_input).collect();
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn content_items_are_kind_tagged() {
        let v = serde_json::to_value(ContentItem::text("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "text", "text": "hi"}));
    }

    #[test]
    fn web_search_arguments_are_strict() {
        let ok: Result<WebSearchArguments, _> = serde_json::from_value(serde_json::json!({
            "searchContextSize": "low", "userLocation": {"country": "NZ"}
        }));
        assert!(ok.is_ok());
        let bad: Result<WebSearchArguments, _> =
            serde_json::from_value(serde_json::json!({"depth": 3}));
        assert!(bad.is_err());
    }
}
