//! Inference request composition and stream adaptation.

pub mod client;
pub mod compose;
pub mod model;
pub mod stream;

pub use client::{InferenceClient, StreamEvent, StreamEventKind, StreamHandler};
pub use compose::{CompletionRequest, CompletionResult, Composer, StreamOptions};
pub use stream::{BufferedStreamer, CallbackHandler, StreamCallback};
