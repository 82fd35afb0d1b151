// Relay Core Library
// Namespace pub/sub with LLM function dispatch

pub mod broker;
pub mod bus;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod llm;
pub mod memory;

// Export core types
pub use broker::{BrokerClient, BusError, InMemoryBroker, RawFrame};
pub use bus::{ChannelBus, Message, Publisher, Subscriber};
pub use catalog::{Function, FunctionCatalog, FunctionError};
pub use chat::ChatService;
pub use config::RelayConfig;
pub use dispatch::{
    BusPayload, DispatchError, DispatchResult, Dispatcher, FunctionBridge, LlmDispatcher,
    RequestReport, StatusEnvelope,
};
pub use llm::{LanguageModel, LlmClient, LlmError};
pub use memory::{InMemoryVectorStore, MemoryError, VectorStore};

use catalog::functions::{Calculator, ImageGeneration};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Function error: {0}")]
    Function(#[from] FunctionError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Core runtime: one broker connection plus everything built on top of it
#[derive(Clone)]
pub struct Relay {
    pub config: RelayConfig,
    pub bus: ChannelBus,
    pub catalog: FunctionCatalog,
    pub bridge: FunctionBridge,
    pub chat: ChatService,
}

impl Relay {
    /// Connect the broker and wire the OpenAI-backed components.
    /// A broker that cannot be reached is fatal.
    pub async fn new(config: RelayConfig) -> Result<Self> {
        let broker = broker::connect(&config.broker_url).await?;
        let client = Arc::new(LlmClient::new(config.llm.clone())?);
        let dispatcher = Arc::new(LlmDispatcher::new(Arc::clone(&client)));
        Ok(Self::assemble(config, broker, client, dispatcher))
    }

    /// Wire a runtime from already-built parts.
    pub fn assemble(
        config: RelayConfig,
        broker: Arc<dyn BrokerClient>,
        model: Arc<dyn LanguageModel>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let bus = ChannelBus::new(broker).with_idle_timeout(config.subscription_idle_timeout);
        let catalog = FunctionCatalog::builder()
            .register(Arc::new(Calculator::new()))
            .register(Arc::new(ImageGeneration::new(Arc::clone(&model))))
            .call_timeout(config.function_timeout)
            .build();
        let bridge = FunctionBridge::new(bus.clone(), dispatcher, catalog.clone());
        let chat = ChatService::new(model, Arc::new(InMemoryVectorStore::new()));

        tracing::info!(
            broker = bus.broker().kind(),
            functions = catalog.len(),
            "Relay assembled"
        );
        Self {
            config,
            bus,
            catalog,
            bridge,
            chat,
        }
    }

    pub fn broker_kind(&self) -> &'static str {
        self.bus.broker().kind()
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down Relay...");
        self.bus.broker().close().await;
        tracing::info!("Relay shut down successfully");
        Ok(())
    }
}
