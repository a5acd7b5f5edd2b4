//! Stream event adapters.
//!
//! [`CallbackHandler`] dispatches text and thinking deltas to plain
//! callbacks. [`BufferedStreamer`] sits in front of any handler and
//! coalesces adjacent deltas of the same kind. Neither reorders events.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::inference::client::{StreamEvent, StreamEventKind, StreamHandler};

pub const FLUSH_BYTES: usize = 512;
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(256);

pub type StreamCallback = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Routes `text` and `thinking` events to optional callbacks.
///
/// A callback error cancels `cancel` before it is returned, so the client
/// stops the upstream request.
pub struct CallbackHandler {
    on_text: Option<StreamCallback>,
    on_thinking: Option<StreamCallback>,
    cancel: CancellationToken,
}

impl CallbackHandler {
    /// `None` when neither callback is set.
    pub fn new(
        on_text: Option<StreamCallback>,
        on_thinking: Option<StreamCallback>,
        cancel: CancellationToken,
    ) -> Option<Self> {
        if on_text.is_none() && on_thinking.is_none() {
            return None;
        }
        Some(Self {
            on_text,
            on_thinking,
            cancel,
        })
    }
}

#[async_trait]
impl StreamHandler for CallbackHandler {
    async fn on_event(&self, event: StreamEvent) -> Result<()> {
        let cb = match event.kind {
            StreamEventKind::Text => self.on_text.as_ref(),
            StreamEventKind::Thinking => self.on_thinking.as_ref(),
            StreamEventKind::ToolCall | StreamEventKind::ToolOutput => None,
        };
        let Some(cb) = cb else {
            return Ok(());
        };
        if let Err(e) = cb(&event.data) {
            tracing::debug!(error = %e, "stream callback failed; cancelling");
            self.cancel.cancel();
            return Err(e);
        }
        Ok(())
    }
}

struct Pending {
    kind: Option<StreamEventKind>,
    buf: String,
    last_flush: Instant,
}

impl Pending {
    fn take(&mut self) -> Option<StreamEvent> {
        self.last_flush = Instant::now();
        let kind = self.kind.take()?;
        if self.buf.is_empty() {
            return None;
        }
        Some(StreamEvent {
            kind,
            data: std::mem::take(&mut self.buf),
        })
    }
}

/// Coalesces text and thinking deltas.
///
/// Flushes once [`FLUSH_BYTES`] have accumulated, when a push arrives at
/// least [`FLUSH_INTERVAL`] after the previous flush, when the event kind
/// changes, before any tool event, and on [`finish`](Self::finish).
pub struct BufferedStreamer {
    inner: Arc<dyn StreamHandler>,
    pending: Mutex<Pending>,
}

impl BufferedStreamer {
    pub fn new(inner: Arc<dyn StreamHandler>) -> Self {
        Self {
            inner,
            pending: Mutex::new(Pending {
                kind: None,
                buf: String::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    /// Deliver whatever is still buffered.
    pub async fn finish(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if let Some(ev) = pending.take() {
            self.inner.on_event(ev).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for BufferedStreamer {
    async fn on_event(&self, event: StreamEvent) -> Result<()> {
        // held across the inner call so deliveries stay ordered
        let mut pending = self.pending.lock().await;

        let bufferable = matches!(event.kind, StreamEventKind::Text | StreamEventKind::Thinking);
        if !bufferable || pending.kind.is_some_and(|k| k != event.kind) {
            if let Some(ev) = pending.take() {
                self.inner.on_event(ev).await?;
            }
        }
        if !bufferable {
            return self.inner.on_event(event).await;
        }

        pending.kind = Some(event.kind);
        pending.buf.push_str(&event.data);
        if pending.buf.len() >= FLUSH_BYTES || pending.last_flush.elapsed() >= FLUSH_INTERVAL {
            if let Some(ev) = pending.take() {
                self.inner.on_event(ev).await?;
            }
        }
        Ok(())
    }
}
