use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use desk_assist::assistant::{AskOptions, Assistant};
use desk_assist::config::Config;
use desk_assist::conversation::Conversation;
use desk_assist::embedding::DisabledProvider;
use desk_assist::error::GatewayError;
use desk_assist::functions::FunctionCatalog;
use desk_assist::models::{ChatReply, ChatRequest, FunctionCall, Message, Role};
use desk_assist::traits::{ChatBackend, ImageGenerator};

/// Chat backend that plays back a fixed list of replies and records every
/// request it receives.
struct Scripted {
    replies: Mutex<VecDeque<Result<ChatReply, GatewayError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Scripted {
    fn new(replies: Vec<Result<ChatReply, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for Scripted {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::InvalidResponse("Invalid response".into())))
    }
}

struct NoImages;

#[async_trait]
impl ImageGenerator for NoImages {
    async fn generate(&self, _description: &str) -> Result<Vec<u8>, GatewayError> {
        Ok(Vec::new())
    }
}

fn answer(text: &str) -> Result<ChatReply, GatewayError> {
    Ok(ChatReply {
        message: Message::assistant(text),
        tokens_used: 7,
    })
}

fn call(name: &str, arguments: &str) -> Result<ChatReply, GatewayError> {
    Ok(ChatReply {
        message: Message {
            role: Role::Assistant,
            content: None,
            name: None,
            function_call: Some(FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            }),
        },
        tokens_used: 11,
    })
}

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.index.path = tmp.path().join("index");
    config.functions.data_file = tmp.path().join("data.txt");
    config
}

fn assistant_with(backend: Arc<Scripted>, config: &Config) -> Assistant {
    Assistant::with_backends(config, backend, Arc::new(NoImages), Arc::new(DisabledProvider))
}

fn chart_catalog() -> FunctionCatalog {
    FunctionCatalog::with_builtins(Arc::new(NoImages), "data.txt".into())
}

// ============ Engine ============

#[tokio::test]
async fn test_turn_stops_at_function_call_limit() {
    let replies = (0..12).map(|_| call("ShowChart", r#"{"data":[1]}"#)).collect();
    let backend = Scripted::new(replies);
    let mut conversation = Conversation::new(backend.clone(), &Config::default().chat);
    let catalog = chart_catalog();

    let results = conversation
        .complete_batch("loop forever", catalog.declarations())
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.function_called));
    assert_eq!(backend.requests().len(), 10);
}

#[tokio::test]
async fn test_decorated_name_rewritten_in_history() {
    let backend = Scripted::new(vec![
        call("functions.ShowChart", r#"{"data":[1,2]}"#),
        answer("done"),
    ]);
    let mut conversation = Conversation::new(backend.clone(), &Config::default().chat);
    let catalog = chart_catalog();

    let mut turn = conversation.start_turn("chart please", catalog.declarations(), false);
    let first = turn.advance(None).await.unwrap();
    assert!(first.function_called);
    assert_eq!(first.payload, "ShowChart");

    let second = turn.advance(Some("Complete".to_string())).await.unwrap();
    assert!(!second.function_called);
    assert!(turn.is_done());
    drop(turn);

    let recorded = conversation
        .history()
        .iter()
        .find_map(|m| m.function_call.as_ref())
        .unwrap();
    assert_eq!(recorded.name, "ShowChart");

    let follow_up = &backend.requests()[1];
    let function_message = follow_up
        .messages
        .iter()
        .find(|m| m.role == Role::Function)
        .unwrap();
    assert_eq!(function_message.name.as_deref(), Some("ShowChart"));
}

#[tokio::test]
async fn test_history_kept_between_turns() {
    let backend = Scripted::new(vec![answer("first"), answer("second")]);
    let mut conversation = Conversation::new(backend.clone(), &Config::default().chat);

    conversation.start_turn("one", &[], false).advance(None).await.unwrap();
    conversation.start_turn("two", &[], true).advance(None).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests[1].messages.len(), 3);
    assert_eq!(requests[1].messages[0].content_str(), "one");
}

// ============ Assistant ============

#[tokio::test]
async fn test_bar_chart_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![
        call("ShowChart", r#"{"data":[3,2,1],"style":"bar"}"#),
        answer("Here is your chart."),
    ]);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let options = AskOptions {
        use_functions: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("show bar chart of 3 2 1", options).await;

    assert_eq!(reply.status, "Complete, 18 token(s) used");
    assert!(reply
        .response
        .starts_with(r#"Call ShowChart ( {"data":[3,2,1],"style":"bar"} )"#));
    assert!(reply.response.ends_with("Here is your chart."));

    let image = reply.image.expect("chart rendered");
    assert!(image.starts_with(&[0x89, b'P', b'N', b'G']));

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].function_call.as_deref(), Some("auto"));
    let function_message = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Function)
        .unwrap();
    assert_eq!(function_message.content_str(), "Complete");
}

#[tokio::test]
async fn test_empty_prompt_makes_no_call() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![]);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let reply = assistant.ask("   ", AskOptions::default()).await;
    assert_eq!(reply.status, "Empty prompt");
    assert!(reply.response.is_empty());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_plain_answer_without_functions() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![answer("Paris.")]);
    let mut assistant = assistant_with(backend, &test_config(&tmp));

    let reply = assistant.ask("capital of France?", AskOptions::default()).await;
    assert_eq!(reply.response, "Paris.");
    assert_eq!(reply.status, "Complete, 7 token(s) used");
    assert!(reply.image.is_none());
}

#[tokio::test]
async fn test_unknown_function_resumes_turn() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![call("Paint", "{}"), answer("I can not paint.")]);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let options = AskOptions {
        use_functions: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("paint a cat", options).await;
    assert!(reply.status.starts_with("Complete"));

    let requests = backend.requests();
    let function_message = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Function)
        .unwrap();
    assert_eq!(function_message.content_str(), "Unknown function");
}

#[tokio::test]
async fn test_invalid_arguments_abort_turn() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![call("ShowChart", r#"{"style":"bar"}"#)]);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let options = AskOptions {
        use_functions: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("chart nothing", options).await;
    assert!(reply.response.is_empty());
    assert!(reply.status.contains("ShowChart"), "status: {}", reply.status);
    assert!(reply.status.ends_with("11 token(s) used"));
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_call_limit_reported() {
    let tmp = TempDir::new().unwrap();
    let replies = (0..12).map(|_| call("ShowChart", r#"{"data":[1]}"#)).collect();
    let backend = Scripted::new(replies);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let options = AskOptions {
        use_functions: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("loop", options).await;
    assert_eq!(reply.status, "Function call limit reached, 110 token(s) used");
    assert_eq!(reply.response.matches("Call ShowChart").count(), 10);
    assert_eq!(backend.requests().len(), 10);
    assert!(reply.image.is_some());
}

#[tokio::test]
async fn test_context_falls_back_to_model_when_index_empty() {
    let tmp = TempDir::new().unwrap();
    let backend = Scripted::new(vec![answer("From the model.")]);
    let mut assistant = assistant_with(backend.clone(), &test_config(&tmp));

    let options = AskOptions {
        use_context: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("what do my notes say?", options).await;
    assert_eq!(reply.response, "From the model.");
    assert!(reply.source.is_none());
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_set_model_switches_retrieval_answers() {
    let mut server = mockito::Server::new_async().await;
    let _models = server
        .mock("GET", "/models")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"id":"gpt-4o"},{"id":"gpt-4o-mini"}]}"#)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.api.base_url = server.url();
    config.api.api_key_env = "DESK_ASSIST_ENGINE_TEST_KEY".to_string();
    config.embedding.provider = "disabled".to_string();
    std::env::set_var("DESK_ASSIST_ENGINE_TEST_KEY", "test-key");
    let mut assistant = Assistant::from_config(&config).unwrap();

    assistant.set_model("gpt-4o").await.unwrap();
    assert_eq!(assistant.conversation().model(), "gpt-4o");
    assert_eq!(assistant.index().answer_model(), "gpt-4o");

    assert!(assistant.set_model("no-such-model").await.is_err());
    assert_eq!(assistant.index().answer_model(), "gpt-4o");
}

#[tokio::test]
async fn test_load_data_feeds_file_content() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    std::fs::write(&config.functions.data_file, "1,2,3").unwrap();
    let backend = Scripted::new(vec![
        call("LoadData", r#"{"datatype":"salary"}"#),
        answer("Loaded."),
    ]);
    let mut assistant = assistant_with(backend.clone(), &config);

    let options = AskOptions {
        use_functions: true,
        ..AskOptions::default()
    };
    let reply = assistant.ask("load salary data", options).await;
    assert!(reply.status.starts_with("Complete"));

    let requests = backend.requests();
    let function_message = requests[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Function)
        .unwrap();
    assert_eq!(function_message.content_str(), "1,2,3");
}
