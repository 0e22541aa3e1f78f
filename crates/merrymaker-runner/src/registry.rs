use async_trait::async_trait;
use merrymaker_core::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One entry in the Job Runner's static task-type registry (§4.3 step 2): `scan`,
/// `rule-job`, `alert-dispatch`, `secret-refresh`, `purge-daily`, `purge-hourly`,
/// `seen-string-purge` each bind to a `Handler`. `cancel` is derived from the job's
/// lease and is signalled if a heartbeat discovers the lease has been lost.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: Value, cancel: CancellationToken) -> Result<Option<Value>>;
}

/// Maps `task_name` to its `Handler`, built once by the composition root at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(task_name.into(), handler);
        self
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(task_name).cloned()
    }
}
