use super::dispatcher::Dispatcher;
use super::types::{BusPayload, StatusEnvelope};
use crate::bus::ChannelBus;
use crate::catalog::FunctionCatalog;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// System role handed to the dispatcher for every request
pub const SYSTEM_CONTEXT: &str = "You are a function orchestrator";

/// Lifecycle of one publish request.
///
/// `Received -> Dispatching -> (Resolved | Failed) -> Published -> Retired`.
/// When the publish itself fails the request goes straight to `Retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    Dispatching,
    Resolved,
    Failed,
    Published,
    Retired,
}

impl RequestState {
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Dispatching)
                | (Dispatching, Resolved)
                | (Dispatching, Failed)
                | (Resolved, Published)
                | (Failed, Published)
                | (Resolved, Retired)
                | (Failed, Retired)
                | (Published, Retired)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RequestState::Retired
    }
}

/// What happened to one request. The HTTP caller only ever sees
/// [`RequestReport::envelope`].
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub namespace: String,
    pub text: String,
    pub state: RequestState,
    /// Payload that was (or would have been) published
    pub payload: Option<BusPayload>,
    pub dispatch_error: Option<String>,
    pub transport_error: Option<String>,
    /// Subscribers the broker reported for the publish
    pub receivers: u64,
}

impl RequestReport {
    fn new(namespace: &str, text: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            text: text.to_string(),
            state: RequestState::Received,
            payload: None,
            dispatch_error: None,
            transport_error: None,
            receivers: 0,
        }
    }

    fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(target: "dispatch", namespace = %self.namespace, from = ?self.state, to = ?next, "Request state");
        self.state = next;
    }

    pub fn published(&self) -> bool {
        self.transport_error.is_none() && self.payload.is_some()
    }

    /// Reply for the HTTP caller; success regardless of the outcome
    pub fn envelope(&self) -> StatusEnvelope {
        StatusEnvelope::success(format!(
            "message {} sent to queue {}",
            self.text, self.namespace
        ))
    }
}

/// Producer side of the subscription flow: dispatch, publish once, retire
#[derive(Clone)]
pub struct FunctionBridge {
    bus: ChannelBus,
    dispatcher: Arc<dyn Dispatcher>,
    catalog: FunctionCatalog,
    system_context: String,
}

impl FunctionBridge {
    pub fn new(bus: ChannelBus, dispatcher: Arc<dyn Dispatcher>, catalog: FunctionCatalog) -> Self {
        Self {
            bus,
            dispatcher,
            catalog,
            system_context: SYSTEM_CONTEXT.to_string(),
        }
    }

    pub fn with_system_context(mut self, system_context: impl Into<String>) -> Self {
        self.system_context = system_context.into();
        self
    }

    pub fn bus(&self) -> &ChannelBus {
        &self.bus
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Resolve `text` and publish exactly one payload on `namespace`.
    ///
    /// Never fails: dispatch errors are published as an error envelope and
    /// transport errors are logged and recorded on the report.
    #[tracing::instrument(name = "function_bridge.publish_request", skip_all, fields(namespace = %namespace))]
    pub async fn publish_request(&self, namespace: &str, text: &str) -> RequestReport {
        let mut report = RequestReport::new(namespace, text);
        info!(target: "dispatch", namespace = %namespace, "Request received");

        report.advance(RequestState::Dispatching);
        let payload = match self
            .dispatcher
            .resolve(text, &self.system_context, &self.catalog)
            .await
        {
            Ok(result) => {
                info!(target: "dispatch", namespace = %namespace, function = %result.name, "Dispatch resolved");
                report.advance(RequestState::Resolved);
                BusPayload::Resolved(result)
            }
            Err(e) => {
                error!(target: "dispatch", namespace = %namespace, error = %e, "Dispatch failed");
                report.dispatch_error = Some(e.to_string());
                report.advance(RequestState::Failed);
                BusPayload::Failed(StatusEnvelope::error(e.to_string()))
            }
        };

        let publisher = self.bus.publisher(namespace);
        match serde_json::to_string(&payload) {
            Ok(message) => match publisher.publish(&message).await {
                Ok(receivers) => {
                    report.receivers = receivers;
                    report.advance(RequestState::Published);
                }
                Err(e) => {
                    warn!(target: "dispatch", namespace = %namespace, error = %e, "Publish failed");
                    report.transport_error = Some(e.to_string());
                }
            },
            Err(e) => {
                warn!(target: "dispatch", namespace = %namespace, error = %e, "Payload serialization failed");
                report.transport_error = Some(e.to_string());
            }
        }
        report.payload = Some(payload);

        publisher.retire();
        report.advance(RequestState::Retired);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::dispatch::{DispatchError, DispatchResult};
    use crate::llm::LlmError;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use tokio_stream::StreamExt;

    mock! {
        pub Resolver {}

        #[async_trait]
        impl Dispatcher for Resolver {
            async fn resolve(
                &self,
                text: &str,
                system_context: &str,
                catalog: &FunctionCatalog,
            ) -> Result<DispatchResult, DispatchError>;
        }
    }

    fn bridge_with(resolver: MockResolver) -> (FunctionBridge, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        let bus = ChannelBus::new(Arc::new(broker.clone()));
        let bridge = FunctionBridge::new(bus, Arc::new(resolver), FunctionCatalog::default());
        (bridge, broker)
    }

    #[test]
    fn transitions() {
        use RequestState::*;
        assert!(Received.can_advance_to(Dispatching));
        assert!(Dispatching.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Published));
        assert!(Published.can_advance_to(Retired));
        assert!(!Received.can_advance_to(Published));
        assert!(!Retired.can_advance_to(Received));
        assert!(!Published.can_advance_to(Dispatching));
        assert!(Retired.is_terminal());
    }

    #[tokio::test]
    async fn passes_fixed_system_context() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .withf(|text, ctx, _| text == "2+2" && ctx == SYSTEM_CONTEXT)
            .times(1)
            .returning(|_, _, _| Ok(DispatchResult::new("calculator", json!({"result": 4}))));
        let (bridge, _broker) = bridge_with(resolver);

        let report = bridge.publish_request("ns", "2+2").await;
        assert_eq!(report.state, RequestState::Retired);
        assert!(report.published());
    }

    #[tokio::test]
    async fn dispatch_failure_is_published_as_error_envelope() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_, _, _| Err(DispatchError::Provider(LlmError::Http("timeout".into()))));
        let (bridge, _broker) = bridge_with(resolver);

        let mut sub = bridge.bus().subscribe("ns").await.unwrap();
        let report = bridge.publish_request("ns", "hello").await;

        assert_eq!(report.receivers, 1);
        assert!(report.dispatch_error.is_some());
        let msg = sub.next().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(value["status"], "error");
        assert!(!value["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_still_reports_success_envelope() {
        let mut resolver = MockResolver::new();
        resolver
            .expect_resolve()
            .returning(|_, _, _| Ok(DispatchResult::chat("hi")));
        let (bridge, broker) = bridge_with(resolver);
        crate::broker::BrokerClient::close(&broker).await;

        let report = bridge.publish_request("ns", "hi").await;
        assert!(report.transport_error.is_some());
        assert!(!report.published());
        assert_eq!(report.state, RequestState::Retired);
        assert_eq!(report.envelope(), StatusEnvelope::success("message hi sent to queue ns"));
    }
}
