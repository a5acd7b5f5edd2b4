//! The seam to a model provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::inference::model::{FetchCompletionRequest, FetchCompletionResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamEventKind {
    Text,
    Thinking,
    ToolCall,
    ToolOutput,
}

/// One incremental event from a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub data: String,
}

impl StreamEvent {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Text,
            data: data.into(),
        }
    }

    pub fn thinking(data: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Thinking,
            data: data.into(),
        }
    }
}

/// Receives stream events in arrival order.
///
/// An `Err` tells the client to stop; it must cancel the request and return
/// the error.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_event(&self, event: StreamEvent) -> Result<()>;
}

/// A provider adapter. Implementations own the wire protocol.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn fetch_completion(
        &self,
        req: FetchCompletionRequest,
        handler: Option<Arc<dyn StreamHandler>>,
        cancel: CancellationToken,
    ) -> Result<FetchCompletionResponse>;
}
