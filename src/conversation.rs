//! Conversation engine.
//!
//! A [`Conversation`] owns the message history and the model settings. Each
//! user prompt starts a [`Turn`], an explicit state machine the caller drives
//! with [`Turn::advance`]:
//!
//! ```text
//!   start_turn(prompt) ──▶ advance(None) ──▶ function call? ──yes──▶ caller dispatches
//!                              ▲                  │                        │
//!                              │                  no                       │
//!                              │                  ▼                        │
//!                              │               answer, done                │
//!                              └──────── advance(Some(result)) ◀───────────┘
//! ```
//!
//! A turn makes exactly one completion per `advance` and ends on a plain
//! answer, on an invalid response, or after `max_function_calls` calls.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ChatConfig;
use crate::error::{ConfigError, ConversationError, GatewayError};
use crate::functions::{reconcile_name, stub_declaration};
use crate::models::{
    ChatRequest, CompletionResult, FunctionCall, FunctionDeclaration, Message, Role,
};
use crate::traits::ChatBackend;

/// System messages sent ahead of any prompt that offers functions.
pub const FUNCTION_GUARD_PROMPTS: [&str; 2] = [
    "Only call the functions you have been provided with.",
    "Make reasonable assumptions about what values to plug into functions if you can not deduce them from other function calls.",
];

pub struct Conversation {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: f32,
    max_function_calls: usize,
    history: Vec<Message>,
}

impl Conversation {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &ChatConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature.clamp(0.0, 1.0),
            max_function_calls: config.max_function_calls.max(1),
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_function_calls(&self) -> usize {
        self.max_function_calls
    }

    /// Set the sampling temperature. Out-of-range values are rejected and
    /// the previous value is kept.
    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConfigError::TemperatureOutOfRange(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }

    /// Switch to `model` if it is one of `available`.
    pub fn set_model(&mut self, model: &str, available: &[String]) -> Result<(), ConfigError> {
        if !available.iter().any(|m| m == model) {
            return Err(ConfigError::UnknownModel(model.to_string()));
        }
        self.model = model.to_string();
        Ok(())
    }

    /// Begin a turn for `prompt`, offering `declarations` to the model.
    pub fn start_turn<'a>(
        &'a mut self,
        prompt: &str,
        declarations: &'a [FunctionDeclaration],
        keep_history: bool,
    ) -> Turn<'a> {
        if !keep_history {
            self.history.clear();
        }
        if !declarations.is_empty() {
            for guard in FUNCTION_GUARD_PROMPTS {
                let present = self
                    .history
                    .iter()
                    .any(|m| m.role == Role::System && m.content_str() == guard);
                if !present {
                    self.history.push(Message::system(guard));
                }
            }
        }
        self.history.push(Message::user(prompt));

        Turn {
            conversation: self,
            declarations,
            calls: 0,
            pending_call: None,
            done: false,
        }
    }

    /// Plain completion of a single prompt, without functions or prior
    /// context. The prompt and the reply are still recorded in history.
    pub async fn complete(&mut self, prompt: &str) -> Result<CompletionResult, ConversationError> {
        let user = Message::user(prompt);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![user.clone()],
            temperature: self.temperature,
            functions: Vec::new(),
            function_call: None,
        };
        self.history.push(user);

        match self.backend.chat(&request).await {
            Ok(reply) => {
                let answer = reply.message.content_str().to_string();
                self.history.push(reply.message);
                Ok(CompletionResult::answer(answer, reply.tokens_used))
            }
            Err(GatewayError::InvalidResponse(status)) => Ok(CompletionResult::failed(status)),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a whole turn, answering every function call with `"ok"`.
    pub async fn complete_batch(
        &mut self,
        prompt: &str,
        declarations: &[FunctionDeclaration],
    ) -> Result<Vec<CompletionResult>, ConversationError> {
        let mut turn = self.start_turn(prompt, declarations, false);
        let mut results = Vec::new();
        let mut feedback = None;
        while !turn.is_done() {
            let result = turn.advance(feedback.take()).await?;
            if result.function_called {
                feedback = Some("ok".to_string());
            }
            results.push(result);
        }
        Ok(results)
    }

    fn request(&self, declarations: &[FunctionDeclaration]) -> ChatRequest {
        let (functions, mode) = if declarations.is_empty() {
            (vec![stub_declaration()], "none")
        } else {
            (declarations.to_vec(), "auto")
        };
        ChatRequest {
            model: self.model.clone(),
            messages: self.history.clone(),
            temperature: self.temperature,
            functions,
            function_call: Some(mode.to_string()),
        }
    }
}

/// One user prompt in progress.
pub struct Turn<'a> {
    conversation: &'a mut Conversation,
    declarations: &'a [FunctionDeclaration],
    calls: usize,
    pending_call: Option<String>,
    done: bool,
}

impl Turn<'_> {
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Function calls made so far in this turn.
    pub fn function_calls(&self) -> usize {
        self.calls
    }

    pub fn history(&self) -> &[Message] {
        &self.conversation.history
    }

    /// Perform the next completion.
    ///
    /// `function_result` is the outcome of the call returned by the previous
    /// step; it is recorded before the request is sent.
    pub async fn advance(
        &mut self,
        function_result: Option<String>,
    ) -> Result<CompletionResult, ConversationError> {
        if self.done {
            return Err(ConversationError::TurnFinished);
        }

        if let Some(name) = self.pending_call.take() {
            match function_result {
                Some(result) => self.conversation.history.push(Message::function(name, result)),
                None => warn!(function = %name, "advancing without a function result"),
            }
        }

        let request = self.conversation.request(self.declarations);
        let reply = match self.conversation.backend.chat(&request).await {
            Ok(reply) => reply,
            Err(GatewayError::InvalidResponse(status)) => {
                self.done = true;
                return Ok(CompletionResult::failed(status));
            }
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };

        let tokens = reply.tokens_used;
        let mut message = reply.message;

        let Some(FunctionCall {
            name: returned,
            arguments,
        }) = message.function_call.clone()
        else {
            let answer = message.content_str().to_string();
            self.conversation.history.push(message);
            self.done = true;
            debug!(tokens, "turn answered");
            return Ok(CompletionResult::answer(answer, tokens));
        };

        let reconciled = reconcile_name(self.declarations, &returned).map(str::to_string);
        if let Some(name) = &reconciled {
            message.function_call = Some(FunctionCall {
                name: name.clone(),
                arguments: arguments.clone(),
            });
        }
        self.conversation.history.push(message);

        self.calls += 1;
        if self.calls >= self.conversation.max_function_calls {
            warn!(calls = self.calls, "function call limit reached");
            self.done = true;
        }

        let result = match reconciled {
            Some(name) => {
                debug!(function = %name, tokens, "model requested function");
                self.pending_call = Some(name.clone());
                CompletionResult::call(name, arguments, tokens)
            }
            None => {
                warn!(function = %returned, "model requested an undeclared function");
                self.pending_call = Some(returned.clone());
                CompletionResult {
                    status: format!("Unknown function called ({})", returned),
                    ..CompletionResult::call(returned, arguments, tokens)
                }
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatReply;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Replay {
        replies: Mutex<Vec<Result<ChatReply, GatewayError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl Replay {
        fn new(mut replies: Vec<Result<ChatReply, GatewayError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Replay {
        async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GatewayError::InvalidResponse("Invalid response".into())))
        }
    }

    fn answer(text: &str) -> Result<ChatReply, GatewayError> {
        Ok(ChatReply {
            message: Message::assistant(text),
            tokens_used: 5,
        })
    }

    #[test]
    fn test_set_temperature_keeps_previous_on_error() {
        let mut conversation = Conversation::new(Replay::new(vec![]), &ChatConfig::default());
        conversation.set_temperature(0.2).unwrap();
        assert!(conversation.set_temperature(1.2).is_err());
        assert!(conversation.set_temperature(-0.1).is_err());
        assert_eq!(conversation.temperature(), 0.2);
    }

    #[test]
    fn test_set_model_requires_available() {
        let mut conversation = Conversation::new(Replay::new(vec![]), &ChatConfig::default());
        let available = vec!["gpt-4o".to_string()];
        assert!(conversation.set_model("gpt-5-unknown", &available).is_err());
        conversation.set_model("gpt-4o", &available).unwrap();
        assert_eq!(conversation.model(), "gpt-4o");
    }

    #[tokio::test]
    async fn test_no_functions_sends_stub() {
        let backend = Replay::new(vec![answer("hi")]);
        let mut conversation = Conversation::new(backend.clone(), &ChatConfig::default());
        let mut turn = conversation.start_turn("hello", &[], false);
        let result = turn.advance(None).await.unwrap();
        assert!(!result.function_called);
        assert_eq!(result.payload, "hi");
        assert!(turn.is_done());

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].functions[0].name, "Noname");
        assert_eq!(requests[0].function_call.as_deref(), Some("none"));
        assert_eq!(requests[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_response_ends_turn_with_zero_result() {
        let backend = Replay::new(vec![Err(GatewayError::InvalidResponse("Invalid message".into()))]);
        let mut conversation = Conversation::new(backend, &ChatConfig::default());
        let mut turn = conversation.start_turn("hello", &[], false);
        let result = turn.advance(None).await.unwrap();
        assert_eq!(result.tokens_used, 0);
        assert_eq!(result.status, "Invalid message");
        assert!(turn.is_done());
        assert!(matches!(turn.advance(None).await, Err(ConversationError::TurnFinished)));
    }

    #[tokio::test]
    async fn test_unknown_function_reported() {
        let call = ChatReply {
            message: Message {
                role: Role::Assistant,
                content: None,
                name: None,
                function_call: Some(FunctionCall {
                    name: "Paint".into(),
                    arguments: "{}".into(),
                }),
            },
            tokens_used: 3,
        };
        let backend = Replay::new(vec![Ok(call)]);
        let mut conversation = Conversation::new(backend, &ChatConfig::default());
        let declarations = vec![stub_declaration()];
        let mut turn = conversation.start_turn("draw", &declarations, false);
        let result = turn.advance(None).await.unwrap();
        assert!(result.function_called);
        assert_eq!(result.status, "Unknown function called (Paint)");
    }

    #[tokio::test]
    async fn test_plain_complete_records_history() {
        let backend = Replay::new(vec![answer("four")]);
        let mut conversation = Conversation::new(backend.clone(), &ChatConfig::default());
        conversation.history.push(Message::system("earlier"));

        let result = conversation.complete("2+2?").await.unwrap();
        assert_eq!(result.payload, "four");
        assert_eq!(conversation.history().len(), 3);

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].functions.is_empty());
        assert!(requests[0].function_call.is_none());
    }

    #[tokio::test]
    async fn test_guard_prompts_not_duplicated() {
        let backend = Replay::new(vec![answer("a"), answer("b")]);
        let mut conversation = Conversation::new(backend, &ChatConfig::default());
        let declarations = vec![stub_declaration()];

        conversation.start_turn("one", &declarations, true).advance(None).await.unwrap();
        conversation.start_turn("two", &declarations, true).advance(None).await.unwrap();

        let guards = conversation
            .history()
            .iter()
            .filter(|m| m.role == Role::System)
            .count();
        assert_eq!(guards, 2);
        assert_eq!(conversation.history().len(), 6);
    }
}
