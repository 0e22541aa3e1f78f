use crate::engine::{Rule, RuleAlert};
use async_trait::async_trait;
use merrymaker_core::{Result, ScanEvent, ScanEventType, SeenStringRepository};
use std::sync::Arc;
use std::time::Duration;

/// How long a dedupe key is remembered before it can fire again, default six months
/// (`seen_strings` purge). A rule that alerts on the same key after this window has
/// elapsed is treated as a fresh sighting, not a repeat. Configurable: callers wire
/// the actual value through their scheduled-task config rather than this default.
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(180 * 24 * 3600);

/// Wraps any `Rule` and drops alerts whose `dedupe_key` has already fired, backed by
/// `rules.seen_strings` (§4.5: "the seen-string rule suppresses repeat alerts for a key
/// already recorded"). Composable with `IocDomainRule` or any future rule rather than a
/// rule in its own right.
pub struct SeenStringRule<R: Rule> {
    inner: R,
    seen: Arc<dyn SeenStringRepository>,
    entry_type: String,
}

impl<R: Rule> SeenStringRule<R> {
    pub fn new(inner: R, seen: Arc<dyn SeenStringRepository>) -> Self {
        let entry_type = inner.name().to_string();
        Self { inner, seen, entry_type }
    }
}

#[async_trait]
impl<R: Rule> Rule for SeenStringRule<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn applies_to(&self) -> &[ScanEventType] {
        self.inner.applies_to()
    }

    async fn evaluate(&self, event: &ScanEvent) -> Result<Vec<RuleAlert>> {
        let alerts = self.inner.evaluate(event).await?;
        if alerts.is_empty() {
            return Ok(alerts);
        }

        let mut fresh = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let already_seen = self
                .seen
                .seen_and_touch(&self.entry_type, &alert.dedupe_key)
                .await?;
            if !already_seen {
                fresh.push(alert);
            }
        }
        Ok(fresh)
    }
}

/// Reclaims `seen_strings` rows older than `max_age`, one batch at a time; the handler
/// for the periodic `seen-string-purge` scheduled task (§4.2, §4.5).
pub async fn purge_seen_strings(
    seen: &dyn SeenStringRepository,
    max_age: Duration,
    batch_size: i64,
) -> Result<i64> {
    seen.purge_older_than(max_age, batch_size).await
}

pub fn default_max_age() -> Duration {
    DEFAULT_MAX_AGE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuleAlert;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct AlwaysHits;
    #[async_trait]
    impl Rule for AlwaysHits {
        fn name(&self) -> &str {
            "always-hits"
        }
        fn applies_to(&self) -> &[ScanEventType] {
            &[ScanEventType::WebRequest]
        }
        async fn evaluate(&self, _event: &ScanEvent) -> Result<Vec<RuleAlert>> {
            Ok(vec![RuleAlert {
                dedupe_key: "fixed-key".into(),
                message: "m".into(),
                context: serde_json::Value::Null,
            }])
        }
    }

    struct FakeSeen {
        seen: Mutex<std::collections::HashSet<(String, String)>>,
    }

    #[async_trait]
    impl SeenStringRepository for FakeSeen {
        async fn seen_and_touch(&self, entry_type: &str, key: &str) -> Result<bool> {
            let mut seen = self.seen.lock().unwrap();
            let already = !seen.insert((entry_type.to_string(), key.to_string()));
            Ok(already)
        }
        async fn purge_older_than(&self, _max_age: Duration, _batch: i64) -> Result<i64> {
            Ok(0)
        }
    }

    fn sample_event() -> ScanEvent {
        ScanEvent {
            scan_id: uuid::Uuid::new_v4(),
            test: false,
            event_type: ScanEventType::WebRequest,
            payload: serde_json::Value::Null,
            produced_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_occurrence_of_the_same_key_is_suppressed() {
        let seen = Arc::new(FakeSeen { seen: Mutex::new(Default::default()) });
        let rule = SeenStringRule::new(AlwaysHits, seen);

        let first = rule.evaluate(&sample_event()).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = rule.evaluate(&sample_event()).await.unwrap();
        assert!(second.is_empty());
    }
}
