//! Extension traits for backends, functions, and capability adapters.
//!
//! Every external effect the assistant depends on sits behind one of these
//! traits, so the engine, the dispatcher, and the adapters can be driven by
//! scripted implementations in tests and by real services in the binary.
//!
//! # Seams
//!
//! ```text
//!  Conversation ──▶ ChatBackend ──▶ OpenAiClient (gateway)
//!  FunctionCatalog ──▶ FunctionHandler ──▶ ShowChart / VisualizeObject / LoadData
//!                                             │
//!                                             └──▶ ImageGenerator
//!  SpeechToText ──▶ AudioSource + Recognizer
//!  PlaybackWorker ──▶ Speaker
//!  ImageClassifier ──▶ ImageEncoder
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::chart::ChartTrace;
use crate::error::{DispatchError, GatewayError};
use crate::models::{ChatReply, ChatRequest, FunctionDeclaration};

// ═══════════════════════════════════════════════════════════════════════
// Model backends
// ═══════════════════════════════════════════════════════════════════════

/// Performs one chat completion.
///
/// Implementations are expected to apply retry and shape validation, so a
/// returned [`ChatReply`] always carries an assistant message.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError>;
}

/// Generates an image from a text description.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns the encoded image bytes, or an empty vector when the upstream
    /// produced nothing.
    async fn generate(&self, description: &str) -> Result<Vec<u8>, GatewayError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Function handlers
// ═══════════════════════════════════════════════════════════════════════

/// Side effects produced by function handlers during one turn.
#[derive(Debug, Default)]
pub struct FunctionContext {
    /// Chart traces accumulated for rendering after the turn.
    pub traces: Vec<ChartTrace>,
    /// Last generated image, encoded.
    pub image: Option<Vec<u8>>,
}

impl FunctionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A function the model can call.
///
/// The declaration is what the model sees; [`call`](FunctionHandler::call)
/// receives arguments that have already been validated against it.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    fn declaration(&self) -> FunctionDeclaration;

    async fn call(&self, arguments: &Value, ctx: &mut FunctionContext)
        -> Result<String, DispatchError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Capability adapters
// ═══════════════════════════════════════════════════════════════════════

/// A source of raw audio frames, such as a microphone stream.
pub trait AudioSource: Send {
    /// Next frame, or `None` when the stream has ended.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Incremental speech recognizer.
pub trait Recognizer: Send {
    /// Feed a frame; returns the utterance when one is complete.
    fn accept(&mut self, frame: &[u8]) -> Result<Option<String>>;

    /// Flush whatever partial utterance is pending.
    fn finish(&mut self) -> Result<String>;
}

/// Speaks text aloud. Blocks until playback ends.
pub trait Speaker: Send {
    fn speak(&mut self, text: &str) -> Result<()>;
}

/// Joint image/text embedding model used for zero-shot classification.
pub trait ImageEncoder: Send + Sync {
    fn encode_image(&self, image: &[u8]) -> Result<Vec<f32>>;

    fn encode_labels(&self, labels: &[String]) -> Result<Vec<Vec<f32>>>;
}
