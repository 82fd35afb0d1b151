//! Function dispatch bridge.
//!
//! A publish request (`namespace`, `text`) is resolved through a
//! [`Dispatcher`] against the [`FunctionCatalog`](crate::catalog::FunctionCatalog),
//! serialized, and published exactly once on the namespace's channel.
//!
//! - `types`: dispatch results and status envelopes (the bus payload format)
//! - `dispatcher`: the resolution seam and its LLM-backed implementation
//! - `bridge`: per-request state machine and publish/retire flow

mod bridge;
mod dispatcher;
mod types;

pub use bridge::{FunctionBridge, RequestReport, RequestState, SYSTEM_CONTEXT};
pub use dispatcher::{resolve_completion, DispatchError, Dispatcher, LlmDispatcher};
pub use types::{BusPayload, DispatchResult, Status, StatusEnvelope};
