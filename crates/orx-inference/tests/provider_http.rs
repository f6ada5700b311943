//! HTTP-level tests for the inference providers and the orchestrator

use std::sync::Arc;

use orx_core::{FailureKind, InferenceError, InferenceProvider, OrchestratorConfig, PromptSpec};
use orx_inference::{BatchArtifacts, OllamaProvider, OpenAiProvider, RequestOrchestrator};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

#[tokio::test]
async fn test_openai_returns_parsed_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(
            r#"{"predicate": "increases_resistance_to", "confidence": 0.92}"#,
        )))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("test-key", "gpt-4o-mini").with_base_url(server.uri());
    let value = provider.complete_json("judge this").await.unwrap();

    assert_eq!(value["predicate"], "increases_resistance_to");
    assert_eq!(value["confidence"], 0.92);
}

#[tokio::test]
async fn test_openai_prose_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_completion("I think it is resistance.")),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", "gpt-4o-mini").with_base_url(server.uri());
    let err = provider.complete_json("judge this").await.unwrap_err();

    assert!(matches!(err, InferenceError::Malformed(_)));
}

#[tokio::test]
async fn test_openai_status_classification() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/overloaded/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/denied/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let overloaded = OpenAiProvider::new("k", "m").with_base_url(format!("{}/overloaded", server.uri()));
    let err = overloaded.complete_json("x").await.unwrap_err();
    assert!(matches!(err, InferenceError::Transient(_)));

    let denied = OpenAiProvider::new("k", "m").with_base_url(format!("{}/denied", server.uri()));
    let err = denied.complete_json("x").await.unwrap_err();
    assert!(matches!(err, InferenceError::Provider(_)));
}

#[tokio::test]
async fn test_ollama_returns_parsed_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "response": "{\"entities\": []}",
            "done": true
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3");
    let value = provider.complete_json("find entities").await.unwrap();

    assert_eq!(value["entities"], json!([]));
}

#[tokio::test]
async fn test_orchestrator_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(r#"{"entities": []}"#)))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", "gpt-4o-mini").with_base_url(server.uri());
    let config = OrchestratorConfig {
        max_concurrency: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        ..OrchestratorConfig::default()
    };
    let orchestrator = RequestOrchestrator::new(Arc::new(provider), config);

    let dir = tempfile::tempdir().unwrap();
    let artifacts = BatchArtifacts::for_phase(dir.path(), "ner");
    let results = orchestrator
        .submit(vec![PromptSpec::new("ner:1:00000", "find entities")], &artifacts)
        .await
        .unwrap();

    assert!(results[0].is_success());
    assert_eq!(results[0].attempts, 2);
}

#[tokio::test]
async fn test_orchestrator_gives_up_on_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new("k", "gpt-4o-mini").with_base_url(server.uri());
    let config = OrchestratorConfig {
        initial_backoff_ms: 1,
        ..OrchestratorConfig::default()
    };
    let orchestrator = RequestOrchestrator::new(Arc::new(provider), config);

    let dir = tempfile::tempdir().unwrap();
    let artifacts = BatchArtifacts::for_phase(dir.path(), "re");
    let results = orchestrator
        .submit(vec![PromptSpec::new("re:1:00000:0000", "judge")], &artifacts)
        .await
        .unwrap();

    assert_eq!(results[0].failure_kind(), Some(FailureKind::ProviderError));
    assert_eq!(results[0].attempts, 1);
}
