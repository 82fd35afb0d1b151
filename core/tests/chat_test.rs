/// ChatService retrieval and write-back against a scripted model
use async_trait::async_trait;
use relay_core::chat::{ChatService, INGEST_THRESHOLD};
use relay_core::llm::{ChatMessage, LlmError, LlmResult, Role, TextStream};
use relay_core::memory::{Embedding, InMemoryVectorStore, MetadataFilter, VectorStore};
use relay_core::LanguageModel;
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;

/// Streams fixed deltas and records the prompts it was given
struct ScriptedModel {
    deltas: Vec<LlmResult<String>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    fail_embed: bool,
}

impl ScriptedModel {
    fn new(deltas: Vec<&str>) -> Self {
        Self {
            deltas: deltas.into_iter().map(|d| Ok(d.to_string())).collect(),
            prompts: Mutex::new(Vec::new()),
            fail_embed: false,
        }
    }

    fn system_prompt(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts[0]
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> LlmResult<String> {
        Ok(String::new())
    }

    async fn stream(&self, messages: &[ChatMessage]) -> LlmResult<TextStream> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let deltas: Vec<LlmResult<String>> = self
            .deltas
            .iter()
            .map(|d| match d {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(LlmError::Http(e.to_string())),
            })
            .collect();
        Ok(Box::pin(tokio_stream::iter(deltas)))
    }

    async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
        if self.fail_embed {
            return Err(LlmError::Http("embedding backend down".into()));
        }
        // Crude but deterministic: length and vowel count
        let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
        Ok(vec![text.len() as f32 + 1.0, vowels as f32])
    }

    async fn create_image(&self, _prompt: &str) -> LlmResult<String> {
        Err(LlmError::Parse("no images here".into()))
    }
}

async fn collect(mut stream: TextStream) -> Vec<LlmResult<String>> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item);
    }
    out
}

#[tokio::test]
async fn streams_deltas_and_ingests_remainder() {
    let model = Arc::new(ScriptedModel::new(vec!["Hello", " there", "\nsecond line"]));
    let memory = Arc::new(InMemoryVectorStore::new());
    let chat = ChatService::new(model.clone(), memory.clone());

    let deltas = collect(chat.stream_reply("hi", "ns1").await.unwrap()).await;
    let text: String = deltas.into_iter().map(|d| d.unwrap()).collect();
    assert_eq!(text, "Hello there\nsecond line");

    // Two non-blank lines written back under the namespace
    assert_eq!(memory.count().await.unwrap(), 2);
    let filter = MetadataFilter::new().equals("namespace", "ns2");
    assert!(memory.query(&[1.0, 1.0], 10, &filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn long_replies_are_flushed_while_streaming() {
    let line = format!("{}\n", "a".repeat(100));
    let deltas: Vec<String> = (0..12).map(|_| line.clone()).collect();
    let model = Arc::new(ScriptedModel::new(deltas.iter().map(String::as_str).collect()));
    let memory = Arc::new(InMemoryVectorStore::new());
    let chat = ChatService::new(model, memory.clone());

    let mut stream = chat.stream_reply("tell me a lot", "ns").await.unwrap();
    let mut streamed = 0;
    while let Some(delta) = stream.next().await {
        streamed += delta.unwrap().len();
        // After crossing the threshold the first flush has happened
        if streamed > INGEST_THRESHOLD + line.len() {
            assert!(memory.count().await.unwrap() >= 1);
        }
    }
    assert_eq!(streamed, 12 * line.len());
    // Identical lines still get distinct ids
    assert_eq!(memory.count().await.unwrap(), 12);
}

#[tokio::test]
async fn retrieved_snippets_are_added_to_context() {
    let model = Arc::new(ScriptedModel::new(vec!["ok"]));
    let memory = Arc::new(InMemoryVectorStore::new());
    memory
        .upsert(vec![
            Embedding::new("k1", vec![3.0, 1.0])
                .with_metadata("text", "Rust was first released in 2015")
                .with_metadata("namespace", "ns1"),
            Embedding::new("k2", vec![3.0, 1.0])
                .with_metadata("text", "secret from another namespace")
                .with_metadata("namespace", "other"),
        ])
        .await
        .unwrap();
    let chat = ChatService::new(model.clone(), memory);

    collect(chat.stream_reply("hi", "ns1").await.unwrap()).await;
    let system = model.system_prompt();
    assert!(system.contains("Rust was first released in 2015"));
    assert!(!system.contains("secret from another namespace"));
    assert!(system.starts_with(relay_core::chat::DEFAULT_PERSONA));
}

#[tokio::test]
async fn memory_failures_do_not_interrupt_reply() {
    let mut model = ScriptedModel::new(vec!["still ", "answering"]);
    model.fail_embed = true;
    let model = Arc::new(model);
    let memory = Arc::new(InMemoryVectorStore::new());
    let chat = ChatService::new(model.clone(), memory.clone());

    let deltas = collect(chat.stream_reply("hi", "ns").await.unwrap()).await;
    let text: String = deltas.into_iter().map(|d| d.unwrap()).collect();
    assert_eq!(text, "still answering");
    assert_eq!(memory.count().await.unwrap(), 0);
    assert_eq!(model.system_prompt(), relay_core::chat::DEFAULT_PERSONA);
}

#[tokio::test]
async fn model_error_ends_stream() {
    let mut model = ScriptedModel::new(vec!["partial"]);
    model.deltas.push(Err(LlmError::Http("connection reset".into())));
    model.deltas.push(Ok("never".into()));
    let chat = ChatService::new(Arc::new(model), Arc::new(InMemoryVectorStore::new()));

    let items = collect(chat.stream_reply("hi", "ns").await.unwrap()).await;
    assert_eq!(items.len(), 2);
    assert!(items[1].is_err());
}
