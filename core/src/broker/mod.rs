//! Broker transport: the shared pub/sub connection underneath the channel bus.
//!
//! The bus never talks to Redis (or anything else) directly. It is handed an
//! `Arc<dyn BrokerClient>` at construction time, so tests can swap in
//! `InMemoryBroker` without a running broker.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_broker;

pub use in_memory::InMemoryBroker;
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// Errors raised by the broker transport and the bus on top of it.
#[derive(Error, Debug)]
pub enum BusError {
    /// Broker unreachable or misconfigured at connect time
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Publish/subscribe failed on an established connection
    #[error("broker transport error: {0}")]
    Transport(String),

    /// The client was closed on shutdown
    #[error("broker client is closed")]
    Closed,
}

pub type BusResult<T> = std::result::Result<T, BusError>;

/// One inbound frame as delivered by the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub channel: String,
    /// `None` when the transport delivered a frame without a payload field
    pub payload: Option<Vec<u8>>,
}

impl RawFrame {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: Some(payload.into()),
        }
    }
}

/// Registration handle returned by [`BrokerClient::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: String,
    pub channel: String,
}

impl SubscriptionHandle {
    pub(crate) fn new(channel: &str) -> Self {
        Self {
            id: format!("sub_{}_{}", channel, uuid::Uuid::new_v4().simple()),
            channel: channel.to_string(),
        }
    }
}

/// A live registration: the handle plus the receiving end of its frame queue.
///
/// The receiver yields `None` once the broker drops the registration
/// (unsubscribe or close).
#[derive(Debug)]
pub struct BrokerSubscription {
    pub handle: SubscriptionHandle,
    pub frames: mpsc::UnboundedReceiver<RawFrame>,
}

/// Topic-scoped publish/subscribe primitives shared by every request task.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Short transport name for logs and health output
    fn kind(&self) -> &'static str;

    /// Deliver `payload` to every current subscriber of `channel`.
    /// Returns how many subscribers the broker reported.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<u64>;

    /// Register interest in `channel`. Only frames published after this
    /// call returns are delivered.
    async fn subscribe(&self, channel: &str) -> BusResult<BrokerSubscription>;

    /// Release a registration. Unknown or already released handles are `Ok`.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BusResult<()>;

    /// Drop every registration and refuse further publishes.
    async fn close(&self);
}

/// Open a broker client for `url`.
///
/// `memory://` gives a process-local broker; `redis://` and `rediss://`
/// connect to Redis (feature `redis`). Anything else is a startup error.
pub async fn connect(url: &str) -> BusResult<Arc<dyn BrokerClient>> {
    let scheme = url.split("://").next().unwrap_or_default();
    match scheme {
        "memory" => {
            info!(target: "broker", "Using in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
        #[cfg(feature = "redis")]
        "redis" | "rediss" => Ok(Arc::new(RedisBroker::connect(url).await?)),
        other => Err(BusError::Connection(format!(
            "unsupported broker scheme '{}' in {}",
            other, url
        ))),
    }
}
