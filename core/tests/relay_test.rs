/// End-to-end subscription flow through an assembled Relay with a fake
/// model and a scripted dispatcher
use async_trait::async_trait;
use relay_core::broker::InMemoryBroker;
use relay_core::dispatch::{resolve_completion, RequestState};
use relay_core::llm::{ChatCompletion, ChatMessage, LlmResult, TextStream, ToolCall};
use relay_core::{
    DispatchError, DispatchResult, Dispatcher, FunctionCatalog, LanguageModel, Relay, RelayConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::StreamExt;

struct FakeModel;

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> LlmResult<String> {
        Ok("ok".into())
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> LlmResult<TextStream> {
        Ok(Box::pin(tokio_stream::iter(vec![Ok("ok".to_string())])))
    }

    async fn embed(&self, _text: &str) -> LlmResult<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }

    async fn create_image(&self, prompt: &str) -> LlmResult<String> {
        Ok(format!("https://images.test/{}", prompt.replace(' ', "-")))
    }
}

/// Replays a fixed completion, as if the model had answered with it
struct Scripted(ChatCompletion);

impl Scripted {
    fn call(name: &str, arguments: Value) -> Self {
        Self(ChatCompletion {
            text: None,
            tool_calls: vec![ToolCall {
                id: Some("call_0".into()),
                name: name.into(),
                arguments: arguments.to_string(),
            }],
            model: Some("scripted".into()),
        })
    }

    fn reply(text: &str) -> Self {
        Self(ChatCompletion {
            text: Some(text.into()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Dispatcher for Scripted {
    async fn resolve(
        &self,
        _text: &str,
        _system_context: &str,
        catalog: &FunctionCatalog,
    ) -> Result<DispatchResult, DispatchError> {
        resolve_completion(self.0.clone(), catalog).await
    }
}

fn relay(dispatcher: Scripted) -> Relay {
    Relay::assemble(
        RelayConfig::default(),
        Arc::new(InMemoryBroker::new()),
        Arc::new(FakeModel),
        Arc::new(dispatcher),
    )
}

async fn next_json(sub: &mut relay_core::Subscriber) -> Value {
    let msg = timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out")
        .expect("stream ended");
    serde_json::from_str(&msg.payload).expect("payload is JSON")
}

#[tokio::test]
async fn calculator_result_reaches_subscriber() {
    let relay = relay(Scripted::call("calculator", json!({"expression": "2+2"})));
    let mut sub = relay.bus.subscribe("ns1").await.unwrap();

    let report = relay.bridge.publish_request("ns1", "2+2").await;
    assert_eq!(report.state, RequestState::Retired);
    assert_eq!(report.receivers, 1);
    assert_eq!(
        serde_json::to_value(report.envelope()).unwrap(),
        json!({"status": "success", "message": "message 2+2 sent to queue ns1"})
    );

    let payload = next_json(&mut sub).await;
    assert_eq!(payload["name"], "calculator");
    assert_eq!(payload["data"]["result"], json!(4));
    // Exactly one message per request
    assert!(timeout(Duration::from_millis(50), sub.next()).await.is_err());
}

#[tokio::test]
async fn image_generation_uses_model() {
    let relay = relay(Scripted::call("image_generation", json!({"prompt": "a red fox"})));
    let mut sub = relay.bus.subscribe("art").await.unwrap();

    relay.bridge.publish_request("art", "draw a red fox").await;
    let payload = next_json(&mut sub).await;
    assert_eq!(payload["name"], "image_generation");
    assert_eq!(payload["data"]["url"], "https://images.test/a-red-fox");
}

#[tokio::test]
async fn plain_reply_is_published_as_chat() {
    let relay = relay(Scripted::reply("Hello!"));
    let mut sub = relay.bus.subscribe("ns").await.unwrap();

    relay.bridge.publish_request("ns", "hi").await;
    let payload = next_json(&mut sub).await;
    assert_eq!(payload, json!({"name": "chat", "data": "Hello!"}));
}

#[tokio::test]
async fn unknown_function_is_published_as_error() {
    let relay = relay(Scripted::call("teleport", json!({})));
    let mut sub = relay.bus.subscribe("ns").await.unwrap();

    let report = relay.bridge.publish_request("ns", "beam me up").await;
    assert!(report.dispatch_error.is_some());
    assert!(report.published());

    let payload = next_json(&mut sub).await;
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["message"], "Function teleport not found");
}

#[tokio::test]
async fn only_subscribers_of_the_namespace_are_reached() {
    let relay = relay(Scripted::reply("for ns1"));
    let mut ns1 = relay.bus.subscribe("ns1").await.unwrap();
    let mut ns2 = relay.bus.subscribe("ns2").await.unwrap();

    relay.bridge.publish_request("ns1", "hi").await;
    assert_eq!(next_json(&mut ns1).await["data"], "for ns1");
    assert!(timeout(Duration::from_millis(50), ns2.next()).await.is_err());
}

#[tokio::test]
async fn request_without_subscribers_still_completes() {
    let relay = relay(Scripted::reply("nobody listens"));
    let report = relay.bridge.publish_request("empty", "hi").await;
    assert_eq!(report.receivers, 0);
    assert!(report.published());
    assert_eq!(report.state, RequestState::Retired);
}

#[tokio::test]
async fn shutdown_ends_open_subscriptions() {
    let relay = relay(Scripted::reply("bye"));
    let mut sub = relay.bus.subscribe("ns").await.unwrap();

    relay.shutdown().await.unwrap();
    assert!(timeout(Duration::from_secs(2), sub.next())
        .await
        .unwrap()
        .is_none());
    assert_eq!(relay.broker_kind(), "memory");
}

#[test]
fn catalog_exposes_builtin_functions() {
    let relay = relay(Scripted::reply(""));
    assert_eq!(relay.catalog.names(), vec!["calculator", "image_generation"]);
}
