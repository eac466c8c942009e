use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use mockito::{Matcher, Server};
use serde_json::json;
use tokio::net::TcpListener;

use desk_assist::error::GatewayError;
use desk_assist::gateway::RetryPolicy;
use desk_assist::models::{ChatRequest, Message};
use desk_assist::openai::{ImageEncoding, OpenAiClient};
use desk_assist::traits::{ChatBackend, ImageGenerator};

fn client(server: &Server, attempts: u32) -> OpenAiClient {
    OpenAiClient::new(
        &server.url(),
        "test-key",
        RetryPolicy::immediate(attempts),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn request() -> ChatRequest {
    ChatRequest {
        model: "gpt-4o-mini".to_string(),
        messages: vec![Message::user("hello")],
        temperature: 0.7,
        functions: Vec::new(),
        function_call: None,
    }
}

#[tokio::test]
async fn test_rate_limit_retried_until_cap() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body(r#"{"error":{"message":"Rate limit reached"}}"#)
        .expect(3)
        .create_async()
        .await;

    let err = client(&server, 3).chat(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::TransientUpstream(_)), "{err:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_timeout_retried_until_cap() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    let client = OpenAiClient::new(
        &format!("http://{}", addr),
        "test-key",
        RetryPolicy::immediate(3),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.chat(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::TransientUpstream(_)), "{err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_bad_request_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(400)
        .with_body(r#"{"error":{"message":"Unknown parameter"}}"#)
        .expect(1)
        .create_async()
        .await;

    let err = client(&server, 3).chat(&request()).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)), "{err:?}");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_choices_is_invalid_response() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":"x","usage":{"total_tokens":3}}"#)
        .expect(1)
        .create_async()
        .await;

    let err = client(&server, 3).chat(&request()).await.unwrap_err();
    match err {
        GatewayError::InvalidResponse(status) => assert_eq!(status, "Invalid response"),
        other => panic!("unexpected error: {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_chat_reply_parsed_with_auth() {
    let mut server = Server::new_async().await;
    let body = json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "function_call": {"name": "ShowChart", "arguments": "{\"data\":[1]}"}
            }
        }],
        "usage": {"total_tokens": 42}
    });
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(json!({"model": "gpt-4o-mini"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let reply = client(&server, 1).chat(&request()).await.unwrap();
    assert_eq!(reply.tokens_used, 42);
    let call = reply.message.function_call.unwrap();
    assert_eq!(call.name, "ShowChart");
    assert_eq!(call.arguments, r#"{"data":[1]}"#);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_models_listed_sorted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/models")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"id":"gpt-4o"},{"id":"gpt-4o-mini"},{"id":"dall-e-3"}]}"#)
        .create_async()
        .await;

    let models = client(&server, 1).list_models().await.unwrap();
    assert_eq!(models, vec!["dall-e-3", "gpt-4o", "gpt-4o-mini"]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_image_decoded_from_base64() {
    let mut server = Server::new_async().await;
    let encoded = base64::engine::general_purpose::STANDARD.encode(b"fake-png");
    let mock = server
        .mock("POST", "/images/generations")
        .match_body(Matcher::PartialJson(json!({"response_format": "b64_json"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"data": [{"b64_json": encoded}]}).to_string())
        .create_async()
        .await;

    let image = client(&server, 1).generate("a red fox").await.unwrap();
    assert_eq!(image, b"fake-png");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_image_downloaded_from_url() {
    let mut server = Server::new_async().await;
    let image_url = format!("{}/files/fox.png", server.url());
    let generate = server
        .mock("POST", "/images/generations")
        .match_body(Matcher::PartialJson(json!({"response_format": "url"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"data": [{"url": image_url}]}).to_string())
        .create_async()
        .await;
    let download = server
        .mock("GET", "/files/fox.png")
        .with_status(200)
        .with_body("png-bytes")
        .create_async()
        .await;

    let image = client(&server, 1)
        .with_image_encoding(ImageEncoding::Url)
        .generate("a red fox")
        .await
        .unwrap();
    assert_eq!(image, b"png-bytes");
    generate.assert_async().await;
    download.assert_async().await;
}
