//! Redis pub/sub transport.
//!
//! Publishes share one `ConnectionManager`. Redis puts a connection into
//! subscriber mode once it SUBSCRIBEs, so each registration gets its own
//! pub/sub connection, drained by a forwarding task that is aborted on
//! unsubscribe or close.

use super::{BrokerClient, BrokerSubscription, BusError, BusResult, RawFrame, SubscriptionHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    // subscription id -> forwarding task
    tasks: Arc<DashMap<String, AbortHandle>>,
    closed: AtomicBool,
}

impl RedisBroker {
    /// Connect to Redis at `url` (e.g. redis://localhost:6379).
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(target: "broker", url = %url, "Connected to Redis");

        Ok(Self {
            client,
            conn,
            tasks: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrokerClient for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Transport(format!(
                "publish to {} after broker shutdown",
                channel
            )));
        }
        let mut conn = self.conn.clone();
        let receivers: u64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        debug!(target: "broker", channel = %channel, receivers, "PUBLISH");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> BusResult<BrokerSubscription> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let handle = SubscriptionHandle::new(channel);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = handle.id.clone();
        let tasks = Arc::clone(&self.tasks);
        let task = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let frame = RawFrame {
                    channel: msg.get_channel_name().to_string(),
                    payload: Some(msg.get_payload_bytes().to_vec()),
                };
                if tx.send(frame).is_err() {
                    break; // receiver dropped
                }
            }
            warn!(target: "broker", subscription = %id, "Redis pub/sub connection ended");
            tasks.remove(&id);
        });
        self.tasks.insert(handle.id.clone(), task.abort_handle());

        info!(target: "broker", subscription = %handle.id, channel = %channel, "Created subscription");
        Ok(BrokerSubscription { handle, frames: rx })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BusResult<()> {
        if let Some((_, task)) = self.tasks.remove(&handle.id) {
            // Dropping the pub/sub connection releases the Redis subscription
            task.abort();
            info!(target: "broker", subscription = %handle.id, "Unsubscribed");
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
        info!(target: "broker", "Redis broker closed");
    }
}
