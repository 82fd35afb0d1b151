//! Channel bus: namespace-scoped messaging over a shared broker client.
//!
//! Two independent roles sit on the same [`ChannelBus`]:
//! - [`Subscriber`]: a lazy, unbounded stream of [`Message`]s for one namespace
//! - [`Publisher`]: a one-shot producer handle that never touches subscriber
//!   registrations
//!
//! Namespaces are the only correlation key. The bus does not validate or
//! allocate them.

use crate::broker::{BrokerClient, BusResult, RawFrame, SubscriptionHandle};
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use crate::broker::BusError;

/// Opaque text delivered on a namespace. The bus never reinterprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub namespace: String,
    pub payload: String,
}

/// Why an inbound frame was skipped.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("frame has no payload")]
    MissingPayload,

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Decode one raw frame into message text.
pub fn decode_frame(frame: RawFrame) -> Result<String, DecodeError> {
    let bytes = frame.payload.ok_or(DecodeError::MissingPayload)?;
    Ok(String::from_utf8(bytes)?)
}

#[derive(Clone)]
pub struct ChannelBus {
    broker: Arc<dyn BrokerClient>,
    idle_timeout: Option<Duration>,
}

impl ChannelBus {
    pub fn new(broker: Arc<dyn BrokerClient>) -> Self {
        Self {
            broker,
            idle_timeout: None,
        }
    }

    /// End subscriber streams that see no frame for `timeout`.
    /// `None` keeps them open until the broker closes them.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }

    /// Register on `namespace` and return the message stream.
    ///
    /// Only messages published after this returns are observed.
    pub async fn subscribe(&self, namespace: &str) -> BusResult<Subscriber> {
        let sub = self.broker.subscribe(namespace).await?;
        info!(target: "bus", namespace = %namespace, subscription = %sub.handle.id, "Subscribed");

        let ns = namespace.to_string();
        let idle_timeout = self.idle_timeout;
        let mut frames = sub.frames;
        let messages = async_stream::stream! {
            loop {
                let next = match idle_timeout {
                    Some(limit) => match tokio::time::timeout(limit, frames.recv()).await {
                        Ok(frame) => frame,
                        Err(_) => {
                            info!(target: "bus", namespace = %ns, idle_ms = limit.as_millis() as u64, "Subscription idle timeout");
                            break;
                        }
                    },
                    None => frames.recv().await,
                };
                let frame = match next {
                    Some(frame) => frame,
                    None => {
                        debug!(target: "bus", namespace = %ns, "Broker closed subscription");
                        break;
                    }
                };
                match decode_frame(frame) {
                    Ok(payload) => yield Message { namespace: ns.clone(), payload },
                    Err(e) => {
                        warn!(target: "bus", namespace = %ns, error = %e, "Invalid message received; skipping");
                    }
                }
            }
        };

        Ok(Subscriber {
            namespace: namespace.to_string(),
            messages: Box::pin(messages),
            registration: Some(Registration {
                broker: Arc::clone(&self.broker),
                handle: sub.handle,
            }),
        })
    }

    /// Deliver `message` to every current subscriber of `namespace`.
    pub async fn publish(&self, namespace: &str, message: &str) -> BusResult<u64> {
        let receivers = self
            .broker
            .publish(namespace, message.as_bytes().to_vec())
            .await?;
        debug!(target: "bus", namespace = %namespace, receivers, "Published message");
        Ok(receivers)
    }

    /// Producer handle bound to `namespace`.
    pub fn publisher(&self, namespace: impl Into<String>) -> Publisher {
        Publisher {
            namespace: namespace.into(),
            bus: self.clone(),
        }
    }
}

struct Registration {
    broker: Arc<dyn BrokerClient>,
    handle: SubscriptionHandle,
}

impl Registration {
    async fn release(self) {
        if let Err(e) = self.broker.unsubscribe(&self.handle).await {
            warn!(target: "bus", subscription = %self.handle.id, error = %e, "Unsubscribe failed");
        } else {
            info!(target: "bus", namespace = %self.handle.channel, "Unsubscribed");
        }
    }
}

/// Subscriber role: an unbounded, non-restartable stream of messages.
///
/// Dropping it releases the broker registration.
pub struct Subscriber {
    namespace: String,
    messages: Pin<Box<dyn Stream<Item = Message> + Send>>,
    registration: Option<Registration>,
}

impl Subscriber {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Release the registration. Calling it again is a no-op; transport
    /// errors are logged, not returned.
    pub async fn unsubscribe(&mut self) {
        if let Some(reg) = self.registration.take() {
            reg.release().await;
        }
    }
}

impl Stream for Subscriber {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().messages.as_mut().poll_next(cx)
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(reg) = self.registration.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn(reg.release());
                }
                Err(_) => {
                    warn!(target: "bus", subscription = %reg.handle.id, namespace = %self.namespace, "Subscriber dropped outside a runtime; registration not released");
                }
            }
        }
    }
}

/// Producer role for one namespace.
pub struct Publisher {
    namespace: String,
    bus: ChannelBus,
}

impl Publisher {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn publish(&self, message: &str) -> BusResult<u64> {
        info!(target: "bus", namespace = %self.namespace, "Publishing message");
        self.bus.publish(&self.namespace, message).await
    }

    /// Retire the channel from the producer side. Subscribers are untouched.
    pub fn retire(self) {
        info!(target: "bus", namespace = %self.namespace, "Publisher retired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_utf8() {
        let text = decode_frame(RawFrame::new("ns", "héllo")).unwrap();
        assert_eq!(text, "héllo");
    }

    #[test]
    fn decode_rejects_missing_payload() {
        let frame = RawFrame {
            channel: "ns".into(),
            payload: None,
        };
        assert!(matches!(
            decode_frame(frame),
            Err(DecodeError::MissingPayload)
        ));
    }

    #[test]
    fn drop_outside_runtime_keeps_registration_without_panicking() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let broker = crate::broker::InMemoryBroker::new();
        let bus = ChannelBus::new(Arc::new(broker.clone()));
        let sub = rt.block_on(bus.subscribe("ns")).unwrap();

        drop(sub);
        assert_eq!(broker.subscriber_count("ns"), 1);
    }

    #[tokio::test]
    async fn sub_second_idle_timeout_ends_stream() {
        use tokio_stream::StreamExt;

        let bus = ChannelBus::new(Arc::new(crate::broker::InMemoryBroker::new()))
            .with_idle_timeout(Some(Duration::from_millis(20)));
        let mut sub = bus.subscribe("ns").await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), sub.next()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let frame = RawFrame::new("ns", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(decode_frame(frame), Err(DecodeError::InvalidUtf8(_))));
    }
}
