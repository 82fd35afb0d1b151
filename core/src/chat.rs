//! Streaming chat with retrieval from vector memory.
//!
//! Each reply is grounded on the closest snippets stored for the
//! namespace, and the reply itself is written back to memory as it streams.

use crate::llm::{ChatMessage, LanguageModel, LlmResult, TextStream};
use crate::memory::{Embedding, MemoryResult, MetadataFilter, VectorStore};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

pub const DEFAULT_PERSONA: &str = "You are a smart assistant, your goal is to help the user. \
If you are asked about your creator or identity, say that you are a Smart Assistant.";

/// Buffered reply size that triggers a memory flush
pub const INGEST_THRESHOLD: usize = 1000;

/// Snippets retrieved per question
pub const RETRIEVAL_TOP_K: usize = 4;

#[derive(Clone)]
pub struct ChatService {
    model: Arc<dyn LanguageModel>,
    memory: Arc<dyn VectorStore>,
    persona: String,
}

impl ChatService {
    pub fn new(model: Arc<dyn LanguageModel>, memory: Arc<dyn VectorStore>) -> Self {
        Self {
            model,
            memory,
            persona: DEFAULT_PERSONA.to_string(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn memory(&self) -> &Arc<dyn VectorStore> {
        &self.memory
    }

    /// Stream the model's reply to `text` as text deltas.
    ///
    /// Retrieval and ingestion failures are logged and never end the stream;
    /// only a failure to start or continue the model stream does.
    #[tracing::instrument(name = "chat.stream_reply", skip_all, fields(namespace = %namespace))]
    pub async fn stream_reply(&self, text: &str, namespace: &str) -> LlmResult<TextStream> {
        let snippets = match self.retrieve(text, namespace).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(target: "chat", namespace = %namespace, error = %e, "Memory retrieval failed");
                Vec::new()
            }
        };
        let context = self.system_context(text, &snippets);
        debug!(target: "chat", namespace = %namespace, snippets = snippets.len(), "Built chat context");

        let messages = [ChatMessage::user(text), ChatMessage::system(context)];
        let mut deltas = self.model.stream(&messages).await?;

        let service = self.clone();
        let namespace = namespace.to_string();
        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(delta) => {
                        buffer.push_str(&delta);
                        if buffer.len() > INGEST_THRESHOLD {
                            service.ingest_logged(&std::mem::take(&mut buffer), &namespace).await;
                        }
                        yield Ok(delta);
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
            if !buffer.is_empty() {
                service.ingest_logged(&buffer, &namespace).await;
            }
            info!(target: "chat", namespace = %namespace, "Chat reply finished");
        };
        Ok(Box::pin(stream))
    }

    fn system_context(&self, text: &str, snippets: &[String]) -> String {
        if snippets.is_empty() {
            return self.persona.clone();
        }
        format!(
            "{}\nSimilar results in the knowledge base for the user's query {}:\n\n{}",
            self.persona,
            text,
            snippets.join("\n\n")
        )
    }

    async fn retrieve(&self, text: &str, namespace: &str) -> MemoryResult<Vec<String>> {
        let vector = self.model.embed(text).await?;
        let filter = MetadataFilter::new().equals("namespace", namespace);
        let matches = self.memory.query(&vector, RETRIEVAL_TOP_K, &filter).await?;
        Ok(matches
            .into_iter()
            .filter_map(|m| {
                m.embedding
                    .metadata
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .collect())
    }

    /// Embed every non-blank line of `chunk` and store it under `namespace`.
    /// Returns the number of lines stored.
    pub async fn ingest(&self, chunk: &str, namespace: &str) -> MemoryResult<usize> {
        let mut embeddings = Vec::new();
        for line in chunk.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let values = self.model.embed(line).await?;
            embeddings.push(
                Embedding::new(uuid::Uuid::new_v4().to_string(), values)
                    .with_metadata("text", line)
                    .with_metadata("namespace", namespace),
            );
        }
        let n = embeddings.len();
        if n > 0 {
            self.memory.upsert(embeddings).await?;
        }
        debug!(target: "chat", namespace = %namespace, lines = n, "Ingested reply chunk");
        Ok(n)
    }

    async fn ingest_logged(&self, chunk: &str, namespace: &str) {
        if let Err(e) = self.ingest(chunk, namespace).await {
            warn!(target: "chat", namespace = %namespace, error = %e, "Memory ingestion failed");
        }
    }
}
