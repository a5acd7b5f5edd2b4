//! Compose a provider-agnostic completion request from a conversation.
//!
//! The [`Composer`] flattens history, turns the current turn's attachments
//! into content items, hydrates tool choices from the tool store and hands
//! the result to an [`InferenceClient`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::attachment::build::{AttachmentBuilder, BuildOptions};
use crate::attachment::mime::MIME_OCTET_STREAM;
use crate::attachment::model::{Attachment, BinaryBlock, ContentBlock};
use crate::error::{Error, Result};
use crate::inference::client::{InferenceClient, StreamHandler};
use crate::inference::model::{
    ChatTurn, ContentItem, FetchCompletionRequest, FetchCompletionResponse, InputMessage,
    InputUnion, ModelParam, ToolChoice, ToolStoreChoice, WebSearchArguments,
    DEFAULT_MAX_PROMPT_LENGTH,
};
use crate::inference::stream::{BufferedStreamer, CallbackHandler, StreamCallback};
use crate::prompts::Role;
use crate::tools::model::{Tool, ToolImplType, WEB_SEARCH_SDK};
use crate::tools::ToolStore;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";
pub const DEFAULT_FILE_MIME: &str = MIME_OCTET_STREAM;

/// Everything needed for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub current: ChatTurn,
    #[serde(default)]
    pub tool_store_choices: Vec<ToolStoreChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_param: Option<ModelParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub response: FetchCompletionResponse,
    /// The current turn's inputs with attachments folded in, ready to be
    /// stored as history.
    pub hydrated_inputs: Vec<InputUnion>,
}

/// Optional stream callbacks.
#[derive(Clone, Default)]
pub struct StreamOptions {
    pub on_text: Option<StreamCallback>,
    pub on_thinking: Option<StreamCallback>,
    /// Coalesce small deltas before calling back.
    pub buffered: bool,
}

pub struct Composer {
    tools: Arc<ToolStore>,
    attachments: Arc<AttachmentBuilder>,
    client: Arc<dyn InferenceClient>,
}

impl Composer {
    pub fn new(
        tools: Arc<ToolStore>,
        attachments: Arc<AttachmentBuilder>,
        client: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            tools,
            attachments,
            client,
        }
    }

    /// Build the request, run it, and return the response with the
    /// hydrated current inputs.
    pub async fn complete(
        &self,
        req: CompletionRequest,
        stream: StreamOptions,
        cancel: CancellationToken,
    ) -> Result<CompletionResult> {
        let model_param = resolve_model_param(req.model_param, &req.history)?;
        let current_inputs = self.current_inputs(req.current).await?;
        let tool_choices = self.hydrate_tool_choices(&req.tool_store_choices).await?;

        let mut inputs = flatten_history(req.history);
        inputs.extend(current_inputs.iter().cloned());

        let fetch = FetchCompletionRequest {
            model_param,
            inputs,
            tool_choices,
        };
        tracing::debug!(
            model = %fetch.model_param.name,
            inputs = fetch.inputs.len(),
            tools = fetch.tool_choices.len(),
            "fetching completion"
        );

        let callbacks = CallbackHandler::new(stream.on_text, stream.on_thinking, cancel.clone());
        let response = match callbacks {
            None => self.client.fetch_completion(fetch, None, cancel).await?,
            Some(cb) if stream.buffered => {
                let buffered = Arc::new(BufferedStreamer::new(Arc::new(cb)));
                let handler: Arc<dyn StreamHandler> = buffered.clone();
                let response = self.client.fetch_completion(fetch, Some(handler), cancel).await;
                // deliver the tail even when the call failed
                let flushed = buffered.finish().await;
                let response = response?;
                flushed?;
                response
            }
            Some(cb) => {
                self.client
                    .fetch_completion(fetch, Some(Arc::new(cb)), cancel)
                    .await?
            }
        };

        Ok(CompletionResult {
            response,
            hydrated_inputs: current_inputs,
        })
    }

    /// The current turn's inputs with its attachments appended to the last
    /// user message.
    pub async fn current_inputs(&self, mut current: ChatTurn) -> Result<Vec<InputUnion>> {
        if current.role != Role::User {
            return Err(Error::invalid("the current turn must have the user role"));
        }
        let items = self.attachment_items(&mut current.attachments).await;
        let mut inputs = current.inputs;
        if items.is_empty() {
            return Ok(inputs);
        }
        let last_user = inputs.iter_mut().rev().find_map(|input| match input {
            InputUnion::InputMessage(m) if m.role == Role::User => Some(m),
            _ => None,
        });
        match last_user {
            Some(msg) => msg.content.extend(items),
            None => inputs.push(InputUnion::InputMessage(InputMessage {
                role: Role::User,
                content: items,
            })),
        }
        Ok(inputs)
    }

    async fn attachment_items(&self, attachments: &mut [Attachment]) -> Vec<ContentItem> {
        if attachments.is_empty() {
            return Vec::new();
        }
        let opts = BuildOptions {
            override_original: true,
            only_if_text_kind: false,
            ..Default::default()
        };
        let blocks = self.attachments.build_content_blocks(attachments, opts).await;
        blocks.into_iter().filter_map(content_item).collect()
    }

    /// Resolve every tool choice to a full definition.
    pub async fn hydrate_tool_choices(&self, choices: &[ToolStoreChoice]) -> Result<Vec<ToolChoice>> {
        let mut out = Vec::with_capacity(choices.len());
        for choice in choices {
            let tool = self
                .tools
                .get_item(&choice.bundle_id, &choice.tool_slug, &choice.tool_version, false)
                .await?;
            out.push(hydrate(choice, &tool)?);
        }
        Ok(out)
    }
}

fn hydrate(choice: &ToolStoreChoice, tool: &Tool) -> Result<ToolChoice> {
    let name = format!("{}@{}", choice.tool_slug, choice.tool_version);
    if !tool.llm_callable {
        return Err(Error::invalid(format!("tool {name} is not callable by the model")));
    }
    if tool.impl_type != choice.tool_type {
        return Err(Error::invalid(format!(
            "tool {name} is implemented as {}, not {}",
            tool.impl_type.as_str(),
            choice.tool_type.as_str()
        )));
    }

    let description = choice
        .description
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| tool.meta.description.clone());
    let mut hydrated = ToolChoice {
        choice_id: choice.choice_id.clone(),
        bundle_id: choice.bundle_id.clone(),
        tool_id: tool.meta.id.clone(),
        name: choice.tool_slug.clone(),
        description,
        tool_type: tool.llm_tool_type,
        arguments: serde_json::Value::Null,
        web_search_arguments: None,
    };

    match tool.impl_type {
        ToolImplType::Native | ToolImplType::Http => {
            hydrated.arguments = tool.arg_schema()?;
        }
        ToolImplType::Sdk => {
            let sdk_type = tool.sdk_impl.as_ref().map(|s| s.sdk_type.as_str());
            if sdk_type != Some(WEB_SEARCH_SDK) {
                return Err(Error::invalid(format!(
                    "tool {name}: unsupported sdk type {}",
                    sdk_type.unwrap_or("<none>")
                )));
            }
            let args = match &choice.user_arg_schema_instance {
                None | Some(serde_json::Value::Null) => WebSearchArguments::default(),
                Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                    Error::invalid(format!("tool {name}: invalid web search arguments: {e}"))
                })?,
            };
            hydrated.web_search_arguments = Some(args);
        }
    }
    Ok(hydrated)
}

/// The call's parameters, or the latest ones found in history.
pub fn resolve_model_param(explicit: Option<ModelParam>, history: &[ChatTurn]) -> Result<ModelParam> {
    let mut param = explicit
        .or_else(|| history.iter().rev().find_map(|t| t.model_param.clone()))
        .ok_or_else(|| Error::invalid("no model parameters given or found in history"))?;
    if param.max_prompt_length == 0 {
        param.max_prompt_length = DEFAULT_MAX_PROMPT_LENGTH;
    }
    Ok(param)
}

/// Each turn's inputs followed by its outputs replayed as inputs.
pub fn flatten_history(history: Vec<ChatTurn>) -> Vec<InputUnion> {
    let mut out = Vec::new();
    for turn in history {
        out.extend(turn.inputs);
        out.extend(turn.outputs.into_iter().filter_map(|o| o.into_input()));
    }
    out
}

fn content_item(block: ContentBlock) -> Option<ContentItem> {
    match block {
        ContentBlock::Text(t) => {
            let text = t.text.trim();
            (!text.is_empty()).then(|| ContentItem::text(text))
        }
        ContentBlock::Image(b) => binary_item(b, DEFAULT_IMAGE_MIME).map(ContentItem::Image),
        ContentBlock::File(b) => binary_item(b, DEFAULT_FILE_MIME).map(ContentItem::File),
    }
}

fn binary_item(mut b: BinaryBlock, default_mime: &str) -> Option<BinaryBlock> {
    let has = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.is_empty());
    if !has(&b.base64_data) && !has(&b.url) {
        return None;
    }
    if b.mime_type.trim().is_empty() {
        b.mime_type = default_mime.to_string();
    }
    Some(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::model::{OutputMessage, OutputUnion, Reasoning};

    fn turn_with_param(name: &str) -> ChatTurn {
        let mut t = ChatTurn::user("hi");
        t.model_param = Some(ModelParam {
            name: name.into(),
            ..Default::default()
        });
        t
    }

    #[test]
    fn model_param_falls_back_to_latest_in_history() {
        let history = vec![turn_with_param("old"), ChatTurn::user("x"), turn_with_param("new")];
        let p = resolve_model_param(None, &history).unwrap();
        assert_eq!(p.name, "new");
        assert_eq!(p.max_prompt_length, DEFAULT_MAX_PROMPT_LENGTH);

        let explicit = ModelParam {
            name: "mine".into(),
            max_prompt_length: 100,
            ..Default::default()
        };
        let p = resolve_model_param(Some(explicit), &history).unwrap();
        assert_eq!((p.name.as_str(), p.max_prompt_length), ("mine", 100));

        assert!(resolve_model_param(None, &[ChatTurn::user("x")]).is_err());
    }

    #[test]
    fn history_replays_outputs_after_inputs() {
        let mut turn = ChatTurn::user("q");
        turn.role = Role::Assistant;
        turn.outputs = vec![
            OutputUnion::Reasoning(Reasoning {
                id: None,
                summary: vec!["hmm".into()],
                encrypted_content: None,
            }),
            OutputUnion::Unknown,
            OutputUnion::OutputMessage(OutputMessage {
                id: Some("m1".into()),
                content: vec![ContentItem::text("a")],
            }),
        ];
        let flat = flatten_history(vec![ChatTurn::user("first"), turn]);
        assert_eq!(flat.len(), 4);
        assert!(matches!(flat[2], InputUnion::Reasoning(_)));
        assert!(matches!(flat[3], InputUnion::OutputMessage(_)));
    }

    #[test]
    fn blocks_become_items() {
        assert_eq!(content_item(ContentBlock::text("  x \n")), Some(ContentItem::text("x")));
        assert_eq!(content_item(ContentBlock::text("   ")), None);
        assert_eq!(content_item(ContentBlock::Image(BinaryBlock::default())), None);

        let file = content_item(ContentBlock::File(BinaryBlock {
            url: Some("https://example.com/a.bin".into()),
            ..Default::default()
        }));
        match file {
            Some(ContentItem::File(b)) => assert_eq!(b.mime_type, DEFAULT_FILE_MIME),
            other => panic!("unexpected {other:?}"),
        }
        let image = content_item(ContentBlock::Image(BinaryBlock {
            base64_data: Some("aGk=".into()),
            file_name: Some("a.png".into()),
            ..Default::default()
        }));
        match image {
            Some(ContentItem::Image(b)) => {
                assert_eq!(b.mime_type, DEFAULT_IMAGE_MIME);
                assert_eq!(b.file_name.as_deref(), Some("a.png"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn tool(json: serde_json::Value) -> Tool {
        serde_json::from_value(json).unwrap()
    }

    fn choice(tool_type: ToolImplType) -> ToolStoreChoice {
        ToolStoreChoice {
            choice_id: "c1".into(),
            bundle_id: "b".into(),
            tool_slug: "t".into(),
            tool_version: "1".into(),
            tool_type,
            description: None,
            user_arg_schema_instance: None,
        }
    }

    #[test]
    fn hydration_checks_the_implementation() {
        let http = tool(serde_json::json!({
            "slug": "t", "version": "1", "description": "fetch things", "type": "http",
            "argSchema": "{\"type\":\"object\",\"properties\":{\"id\":{\"type\":\"string\"}}}",
            "httpImpl": {"request": {"urlTemplate": "http://x/${id}"}}
        }));
        let h = hydrate(&choice(ToolImplType::Http), &http).unwrap();
        assert_eq!(h.arguments["properties"]["id"]["type"], "string");
        assert_eq!(h.description, "fetch things");

        assert!(hydrate(&choice(ToolImplType::Native), &http).is_err());

        let mut hidden = http.clone();
        hidden.llm_callable = false;
        assert!(hydrate(&choice(ToolImplType::Http), &hidden).is_err());
    }

    #[test]
    fn web_search_arguments_are_decoded() {
        let ws = tool(serde_json::json!({
            "slug": "t", "version": "1", "type": "sdk", "llmToolType": "webSearch",
            "sdkImpl": {"sdkType": "webSearch"}
        }));
        let mut c = choice(ToolImplType::Sdk);
        c.user_arg_schema_instance = Some(serde_json::json!({"searchContextSize": "high"}));
        let h = hydrate(&c, &ws).unwrap();
        assert!(h.web_search_arguments.is_some());
        assert!(h.arguments.is_null());

        c.user_arg_schema_instance = Some(serde_json::json!({"bogus": true}));
        assert!(hydrate(&c, &ws).is_err());

        let mut other = ws.clone();
        other.sdk_impl.as_mut().unwrap().sdk_type = "codeInterpreter".into();
        assert!(hydrate(&choice(ToolImplType::Sdk), &other).is_err());
    }
}
