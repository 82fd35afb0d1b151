// In-process broker with the same contract as the Redis transport
use super::{BrokerClient, BrokerSubscription, BusError, BusResult, RawFrame, SubscriptionHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Registration {
    id: String,
    sender: mpsc::UnboundedSender<RawFrame>,
}

/// Process-local broker used for tests and single-process deployments.
///
/// Delivery is FIFO per registration. Nothing is buffered for channels
/// without subscribers.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    // channel -> registrations
    channels: Arc<DashMap<String, Vec<Registration>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame straight into every registration on `channel`,
    /// bypassing publish encoding. Returns how many registrations got it.
    pub fn inject(&self, channel: &str, frame: RawFrame) -> usize {
        self.fan_out(channel, frame)
    }

    /// Number of live registrations on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn fan_out(&self, channel: &str, frame: RawFrame) -> usize {
        let mut delivered = 0;
        if let Some(mut regs) = self.channels.get_mut(channel) {
            // Receivers dropped without unsubscribing are pruned here
            regs.retain(|reg| match reg.sender.send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(target: "broker", subscription = %reg.id, "Pruning dead registration");
                    false
                }
            });
        }
        delivered
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<u64> {
        if self.is_closed() {
            return Err(BusError::Transport(format!(
                "publish to {} on closed in-memory broker",
                channel
            )));
        }
        let delivered = self.fan_out(channel, RawFrame::new(channel, payload));
        if delivered == 0 {
            warn!(target: "broker", channel = %channel, "No subscriptions for channel");
        }
        Ok(delivered as u64)
    }

    async fn subscribe(&self, channel: &str) -> BusResult<BrokerSubscription> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let handle = SubscriptionHandle::new(channel);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(Registration {
                id: handle.id.clone(),
                sender: tx,
            });
        info!(target: "broker", subscription = %handle.id, channel = %channel, "Created subscription");
        Ok(BrokerSubscription { handle, frames: rx })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> BusResult<()> {
        let mut emptied = false;
        if let Some(mut regs) = self.channels.get_mut(&handle.channel) {
            regs.retain(|reg| reg.id != handle.id);
            emptied = regs.is_empty();
        }
        if emptied {
            self.channels.remove_if(&handle.channel, |_, regs| regs.is_empty());
        }
        info!(target: "broker", subscription = %handle.id, "Unsubscribed");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every receiver
        self.channels.clear();
        info!(target: "broker", "In-memory broker closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_matching_channel() {
        let broker = InMemoryBroker::new();
        let mut a = broker.subscribe("a").await.unwrap();
        let mut b = broker.subscribe("b").await.unwrap();

        assert_eq!(broker.publish("a", b"hello".to_vec()).await.unwrap(), 1);

        let frame = a.frames.recv().await.unwrap();
        assert_eq!(frame.payload.as_deref(), Some(&b"hello"[..]));
        assert!(b.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_ends_receiver() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("ns").await.unwrap();
        broker.unsubscribe(&sub.handle).await.unwrap();
        broker.unsubscribe(&sub.handle).await.unwrap();
        assert_eq!(broker.subscriber_count("ns"), 0);
        assert!(sub.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_rejects_publish() {
        let broker = InMemoryBroker::new();
        let mut sub = broker.subscribe("ns").await.unwrap();
        broker.close().await;
        assert!(sub.frames.recv().await.is_none());
        assert!(matches!(
            broker.publish("ns", b"x".to_vec()).await,
            Err(BusError::Transport(_))
        ));
        assert!(matches!(broker.subscribe("ns").await, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let broker = InMemoryBroker::new();
        let sub = broker.subscribe("ns").await.unwrap();
        drop(sub);
        assert_eq!(broker.publish("ns", b"x".to_vec()).await.unwrap(), 0);
        assert_eq!(broker.subscriber_count("ns"), 0);
    }
}
