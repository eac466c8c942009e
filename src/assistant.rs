//! The assistant: one object that answers prompts the way the desktop UI
//! does.
//!
//! [`Assistant::ask`] tries the retrieval index first when asked to, then
//! drives a conversation turn, dispatching every function the model calls
//! and collecting charts or images the functions produce. Index management
//! and model settings are exposed alongside so a front end only needs this
//! type.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use crate::chart::render_png;
use crate::config::Config;
use crate::connector_fs::split_location;
use crate::conversation::Conversation;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{ConfigError, DispatchError, IndexError};
use crate::functions::FunctionCatalog;
use crate::index::RetrievalIndex;
use crate::models::{FunctionDeclaration, RagAnswer};
use crate::openai::OpenAiClient;
use crate::speech::PlaybackWorker;
use crate::traits::{ChatBackend, FunctionContext, ImageGenerator, Speaker};

/// Width and height of rendered charts, in pixels.
pub const CHART_SIZE: u32 = 1400;

const NO_ANSWER: &str = "I don't know";

#[derive(Debug, Clone, Copy, Default)]
pub struct AskOptions {
    /// Try the retrieval index before the model.
    pub use_context: bool,
    /// Offer the function catalog to the model.
    pub use_functions: bool,
    /// Continue the previous conversation instead of starting over.
    pub keep_history: bool,
    /// Speak a plain answer aloud.
    pub speak: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub response: String,
    pub status: String,
    pub tokens_used: u64,
    /// Where a context answer came from.
    pub source: Option<String>,
    /// PNG chart or generated image.
    pub image: Option<Vec<u8>>,
}

pub struct Assistant {
    conversation: Conversation,
    catalog: FunctionCatalog,
    index: RetrievalIndex,
    client: Option<OpenAiClient>,
    voice: Option<PlaybackWorker>,
}

impl Assistant {
    /// Build an assistant talking to the configured API.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = OpenAiClient::from_config(config)?;
        let embedder = create_provider(config)?;
        let chat: Arc<dyn ChatBackend> = Arc::new(client.clone());
        let images: Arc<dyn ImageGenerator> = Arc::new(client.clone());

        let mut assistant = Self::with_backends(config, chat, images, embedder);
        assistant.client = Some(client);
        Ok(assistant)
    }

    pub fn with_backends(
        config: &Config,
        chat: Arc<dyn ChatBackend>,
        images: Arc<dyn ImageGenerator>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            conversation: Conversation::new(chat.clone(), &config.chat),
            catalog: FunctionCatalog::with_builtins(images, config.functions.data_file.clone()),
            index: RetrievalIndex::new(config, embedder, chat),
            client: None,
            voice: None,
        }
    }

    /// Start speaking answers through `speaker`, replacing any previous one.
    pub fn enable_voice(&mut self, speaker: Box<dyn Speaker>) -> Result<()> {
        self.disable_voice();
        self.voice = Some(PlaybackWorker::spawn(speaker)?);
        Ok(())
    }

    pub fn disable_voice(&mut self) {
        if let Some(worker) = self.voice.take() {
            worker.stop();
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn index(&self) -> &RetrievalIndex {
        &self.index
    }

    /// Register additional functions.
    pub fn catalog_mut(&mut self) -> &mut FunctionCatalog {
        &mut self.catalog
    }

    pub fn clear_history(&mut self) {
        self.conversation.clear_history();
    }

    /// Answer `prompt`. Never fails: problems are reported in the status.
    pub async fn ask(&mut self, prompt: &str, options: AskOptions) -> AssistantReply {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return AssistantReply {
                status: "Empty prompt".to_string(),
                ..AssistantReply::default()
            };
        }

        if options.use_context {
            if let Some(reply) = self.answer_from_context(prompt).await {
                return reply;
            }
        }

        let mut ctx = FunctionContext::new();
        let mut tokens = 0;
        let started = Instant::now();
        let (response, status, image) = match self.run_turn(prompt, options, &mut ctx, &mut tokens).await {
            Ok((response, status)) => (response, status, take_image(&mut ctx)),
            Err(e) => {
                warn!(error = %e, "turn failed");
                (String::new(), e.to_string(), None)
            }
        };
        info!(
            tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "prompt complete"
        );

        AssistantReply {
            response,
            status: format!("{}, {} token(s) used", status, tokens),
            tokens_used: tokens,
            source: None,
            image,
        }
    }

    async fn answer_from_context(&mut self, prompt: &str) -> Option<AssistantReply> {
        if let Err(e) = self.index.open().await {
            warn!(error = %e, "index unavailable");
            return None;
        }
        match self.index.query(prompt).await {
            Ok(answer) if !answer.answer.contains(NO_ANSWER) => {
                let source = display_sources(&answer.sources);
                Some(AssistantReply {
                    response: answer.answer,
                    status: format!("Source: {}", source),
                    tokens_used: answer.tokens_used,
                    source: Some(source),
                    image: None,
                })
            }
            Ok(_) => {
                debug!("index has no answer, asking the model");
                None
            }
            Err(e) => {
                warn!(error = %e, "context query failed");
                None
            }
        }
    }

    async fn run_turn(
        &mut self,
        prompt: &str,
        options: AskOptions,
        ctx: &mut FunctionContext,
        tokens: &mut u64,
    ) -> Result<(String, String)> {
        let declarations: &[FunctionDeclaration] = if options.use_functions {
            self.catalog.declarations()
        } else {
            &[]
        };
        let mut turn = self
            .conversation
            .start_turn(prompt, declarations, options.keep_history);

        let mut response = String::new();
        let mut calls = 0;
        let mut feedback = None;
        let status = loop {
            let result = turn.advance(feedback.take()).await?;
            *tokens += result.tokens_used;

            if !result.function_called {
                if calls == 0 {
                    response = result.payload;
                    if options.speak {
                        if let Some(voice) = &self.voice {
                            voice.play(&response);
                        }
                    }
                } else if !result.payload.is_empty() {
                    response.push_str(&result.payload);
                }
                break result.status;
            }

            calls += 1;
            let arguments = result.arguments.unwrap_or_default();
            response.push_str(&format!("Call {} ( {} )\n", result.payload, arguments));
            if turn.is_done() {
                break "Function call limit reached".to_string();
            }

            let output = match self.catalog.dispatch(&result.payload, &arguments, ctx).await {
                Ok(outcome) => {
                    debug!(status = %outcome.status, "function returned");
                    outcome.result
                }
                Err(DispatchError::UnknownFunction(name)) => {
                    warn!(function = %name, "model called an unknown function");
                    "Unknown function".to_string()
                }
                Err(e) => return Err(e.into()),
            };
            feedback = Some(output);
        };

        Ok((response, status))
    }

    /// Attach the index, creating it if needed. Returns the record count.
    pub async fn open_index(&mut self) -> Result<u64, IndexError> {
        self.index.open().await
    }

    /// Ingest files from `location`: a folder, or a folder followed by a
    /// glob such as `docs/**/*.md`.
    pub async fn ingest_folder(&mut self, location: &str) -> Result<u64, IndexError> {
        let (folder, pattern) = if Path::new(location).is_dir() {
            (Path::new(location).to_path_buf(), String::new())
        } else {
            split_location(location)
        };
        self.index.ingest_from_filesystem(&folder, &pattern).await
    }

    pub async fn ingest_url(&mut self, url: &str, max_depth: Option<usize>) -> Result<u64, IndexError> {
        self.index.ingest_from_web(url, max_depth).await
    }

    /// Answer `question` from the index alone.
    pub async fn query_index(&mut self, question: &str) -> Result<RagAnswer, IndexError> {
        self.index.open().await?;
        self.index.query(question).await
    }

    pub async fn reset_index(&mut self) -> Result<u64, IndexError> {
        self.index.reset().await
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        self.conversation.set_temperature(temperature)
    }

    /// Model ids the API offers.
    pub async fn available_models(&self) -> Result<Vec<String>> {
        let Some(client) = &self.client else {
            bail!("Model listing needs an API client");
        };
        Ok(client.list_models().await?)
    }

    /// Switch models after checking the API offers `model`.
    pub async fn set_model(&mut self, model: &str) -> Result<()> {
        let available = self.available_models().await?;
        self.conversation.set_model(model, &available)?;
        self.index.set_answer_model(model);
        info!(model, "model selected");
        Ok(())
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.disable_voice();
    }
}

/// Charts win over a generated image.
fn take_image(ctx: &mut FunctionContext) -> Option<Vec<u8>> {
    if ctx.traces.is_empty() {
        return ctx.image.take();
    }
    match render_png(&ctx.traces, CHART_SIZE, CHART_SIZE) {
        Ok(png) => Some(png),
        Err(e) => {
            warn!(error = %e, "chart rendering failed");
            None
        }
    }
}

/// Local file sources are shown by file name; URLs as they are.
fn display_sources(sources: &str) -> String {
    sources
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let path = Path::new(s);
            match path.file_name() {
                Some(name) if path.is_file() => name.to_string_lossy().to_string(),
                _ => s.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
