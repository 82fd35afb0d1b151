use super::error::{FunctionError, FunctionResult};
use super::traits::Function;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable name -> function map, built once at startup and shared by
/// reference with the dispatcher.
#[derive(Clone)]
pub struct FunctionCatalog {
    functions: Arc<BTreeMap<String, Arc<dyn Function>>>,
    call_timeout: Duration,
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FunctionCatalog {
    pub fn builder() -> FunctionCatalogBuilder {
        FunctionCatalogBuilder {
            functions: BTreeMap::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// `{name, description, parameters}` for every function, sorted by name
    pub fn schemas(&self) -> Vec<Value> {
        self.functions.values().map(|f| f.schema()).collect()
    }

    /// Call a function by name with the catalog's timeout
    #[tracing::instrument(skip(self, arguments), fields(function.name = %name))]
    pub async fn call(&self, name: &str, arguments: Value) -> FunctionResult<Value> {
        let started = Instant::now();

        let function = self
            .get(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))?;

        debug!(target: "catalog", function = %name, "Invoking function");

        let result = match timeout(self.call_timeout, function.call(arguments)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(target: "catalog", function = %name, "Function execution timed out");
                Err(FunctionError::Timeout)
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => {
                debug!(target: "catalog", function = %name, latency_ms = %elapsed_ms, "Function finished")
            }
            Err(e) => {
                warn!(target: "catalog", function = %name, error = %e, latency_ms = %elapsed_ms, "Function execution failed")
            }
        }
        result
    }
}

pub struct FunctionCatalogBuilder {
    functions: BTreeMap<String, Arc<dyn Function>>,
    call_timeout: Duration,
}

impl FunctionCatalogBuilder {
    /// Add a function. A later registration with the same name replaces
    /// the earlier one.
    pub fn register(mut self, function: Arc<dyn Function>) -> Self {
        let name = function.name();
        info!(target: "catalog", function = %name, "Registering function");
        if self.functions.insert(name.clone(), function).is_some() {
            warn!(target: "catalog", function = %name, "Replaced existing function");
        }
        self
    }

    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn build(self) -> FunctionCatalog {
        FunctionCatalog {
            functions: Arc::new(self.functions),
            call_timeout: self.call_timeout,
        }
    }
}
