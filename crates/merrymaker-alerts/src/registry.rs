use merrymaker_core::AlertSink;
use std::collections::HashMap;
use std::sync::Arc;

/// The set of sinks the composition root wires up at startup (§9: "constructed by the
/// composition root and passed in"). `fanout` lists every enabled sink by name so the
/// `alert` job handler can create one `alert-dispatch` job per sink; `get` resolves a
/// single sink by name for the `alert-dispatch` handler itself.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn AlertSink>>,
}

impl SinkRegistry {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let sinks = sinks.into_iter().map(|sink| (sink.name().to_string(), sink)).collect();
        Self { sinks }
    }

    /// Names of every sink currently `enabled()` (§4.7, `alerts.<sink>.enabled`, §6).
    pub fn enabled_names(&self) -> Vec<String> {
        self.sinks
            .values()
            .filter(|sink| sink.enabled())
            .map(|sink| sink.name().to_string())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AlertSink>> {
        self.sinks.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use merrymaker_core::{AlertEvent, Result};

    struct FakeSink {
        name: &'static str,
        enabled: bool,
    }

    #[async_trait]
    impl AlertSink for FakeSink {
        fn name(&self) -> &str {
            self.name
        }
        fn enabled(&self) -> bool {
            self.enabled
        }
        async fn send(&self, _event: &AlertEvent) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn enabled_names_excludes_disabled_sinks() {
        let registry = SinkRegistry::new(vec![
            Arc::new(FakeSink { name: "goalert", enabled: true }),
            Arc::new(FakeSink { name: "kafka", enabled: false }),
        ]);

        assert_eq!(registry.enabled_names(), vec!["goalert".to_string()]);
        assert!(registry.get("kafka").is_some(), "disabled sinks stay resolvable by name");
    }
}
