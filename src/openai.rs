//! HTTP client for the OpenAI-compatible completion API.
//!
//! All calls go through [`gateway::invoke`], so each one is retried on
//! transient failures and bounded by its own timeout. The client implements
//! [`ChatBackend`] and [`ImageGenerator`] for the rest of the crate.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{self, RetryPolicy};
use crate::models::{ChatReply, ChatRequest, Message, Role};
use crate::traits::{ChatBackend, ImageGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Base64,
    Url,
}

impl ImageEncoding {
    fn response_format(self) -> &'static str {
        match self {
            Self::Base64 => "b64_json",
            Self::Url => "url",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    policy: RetryPolicy,
    timeout: Duration,
    image_size: String,
    image_encoding: ImageEncoding,
}

impl OpenAiClient {
    /// Build a client from configuration, reading the key from the
    /// configured environment variable.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api.api_key_env)
            .with_context(|| format!("{} not set", config.api.api_key_env))?;
        let organization = std::env::var(&config.api.organization_env)
            .ok()
            .filter(|s| !s.is_empty());

        let mut client = Self::new(
            &config.api.base_url,
            &api_key,
            RetryPolicy::from_config(&config.retry),
            config.chat.timeout(),
        )?;
        client.organization = organization;
        client.image_size = config.images.size.clone();
        client.image_encoding = match config.images.encoding.as_str() {
            "url" => ImageEncoding::Url,
            _ => ImageEncoding::Base64,
        };
        Ok(client)
    }

    pub fn new(
        base_url: &str,
        api_key: &str,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            organization: None,
            policy,
            timeout,
            image_size: "512x512".to_string(),
            image_encoding: ImageEncoding::Base64,
        })
    }

    pub fn with_image_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.image_encoding = encoding;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .timeout(timeout);
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        builder
    }

    async fn post(&self, operation: &str, path: &str, body: &Value, timeout: Duration) -> Result<Value, GatewayError> {
        gateway::invoke(&self.policy, operation, |_| {
            gateway::send_json(self.request(reqwest::Method::POST, path, timeout).json(body))
        })
        .await
    }

    /// Ids of the models available to this key.
    pub async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let json = gateway::invoke(&self.policy, "models", |_| {
            gateway::send_json(self.request(reqwest::Method::GET, "/models", self.timeout))
        })
        .await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| GatewayError::InvalidResponse("Invalid response: missing 'data'".into()))?;
        let mut ids: Vec<String> = data
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()).map(String::from))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Embed a batch of texts. Returns one vector per input, in order, and
    /// the tokens consumed.
    pub async fn embeddings(
        &self,
        model: &str,
        texts: &[String],
        timeout: Duration,
    ) -> Result<(Vec<Vec<f32>>, u64), GatewayError> {
        let body = json!({ "model": model, "input": texts });
        let json = self.post("embeddings", "/embeddings", &body, timeout).await?;
        let vectors = parse_embedding_response(&json, texts.len())?;
        Ok((vectors, total_tokens(&json)))
    }

    /// Generate one image. Returns the base64 payload or the image URL,
    /// depending on the configured encoding; empty when nothing was produced.
    pub async fn create_image(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = json!({
            "prompt": prompt,
            "n": 1,
            "size": self.image_size,
            "response_format": self.image_encoding.response_format(),
        });
        let json = self
            .post("images", "/images/generations", &body, self.timeout)
            .await?;

        let key = self.image_encoding.response_format();
        Ok(json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|d| d.first())
            .and_then(|item| item.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError> {
        let body = serde_json::to_value(request)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        let json = self
            .post("chat", "/chat/completions", &body, self.timeout)
            .await?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, description: &str) -> Result<Vec<u8>, GatewayError> {
        let payload = self.create_image(description).await?;
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        match self.image_encoding {
            ImageEncoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(payload.as_bytes())
                .map_err(|e| GatewayError::InvalidResponse(format!("Invalid image payload: {e}"))),
            ImageEncoding::Url => {
                gateway::invoke(&self.policy, "image download", |_| {
                    gateway::send_bytes(self.http.get(&payload).timeout(self.timeout))
                })
                .await
            }
        }
    }
}

/// Validate the shape of a chat-completion reply.
pub fn parse_chat_response(json: &Value) -> Result<ChatReply, GatewayError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| GatewayError::InvalidResponse("Invalid response".into()))?;

    let raw_message = choice
        .get("message")
        .filter(|m| m.is_object())
        .ok_or_else(|| GatewayError::InvalidResponse("Invalid message".into()))?;

    let mut message: Message = serde_json::from_value(raw_message.clone())
        .map_err(|e| GatewayError::InvalidResponse(format!("Invalid message: {e}")))?;
    message.role = Role::Assistant;

    Ok(ChatReply {
        message,
        tokens_used: total_tokens(json),
    })
}

fn total_tokens(json: &Value) -> u64 {
    json.get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0)
}

/// Parse an embeddings reply, checking one vector per input.
pub fn parse_embedding_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>, GatewayError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| GatewayError::InvalidResponse("Invalid response: missing 'data'".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vector = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| GatewayError::InvalidResponse("Invalid response: missing 'embedding'".into()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vector));
    }

    if indexed.len() != expected {
        return Err(GatewayError::InvalidResponse(format!(
            "Invalid response: expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
