use crate::cache::{lookup_and_promote, TieredCache};
use async_trait::async_trait;
use merrymaker_core::{IocRepository, IocType, Result, RuleCacheStore, ScanEvent, ScanEventType};
use std::sync::Arc;
use std::time::Duration;

/// `rules.rule_cache` entries default to this TTL unless the rule requests otherwise
/// (§4.5, Tier 2).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(900);

/// The IOC domain rule (§4.5): pulls the request URL's host out of a `web-request` event,
/// allow-lists it first, then checks it (and each of its parent domains) against
/// `rules.iocs`, going through the two-tier cache before ever hitting the authoritative
/// tables.
pub struct IocDomainRule {
    iocs: Arc<dyn IocRepository>,
    cache: Arc<dyn RuleCacheStore>,
    tier1: TieredCache,
}

impl IocDomainRule {
    pub fn new(iocs: Arc<dyn IocRepository>, cache: Arc<dyn RuleCacheStore>, tier1: TieredCache) -> Self {
        Self { iocs, cache, tier1 }
    }

    fn extract_host(event: &ScanEvent) -> Option<String> {
        let raw = event.payload.get("url")?.as_str()?;
        url::Url::parse(raw).ok()?.host_str().map(str::to_string)
    }

    /// `example.sub.evil.com` → `["example.sub.evil.com", "sub.evil.com", "evil.com"]`;
    /// the IOC table can list any ancestor domain, not just the exact host (§4.5).
    fn domain_and_parents(host: &str) -> Vec<String> {
        let labels: Vec<&str> = host.split('.').collect();
        (0..labels.len()).map(|i| labels[i..].join(".")).collect()
    }

    async fn is_allow_listed(&self, host: &str) -> Result<bool> {
        let cache_key = format!("allow_list:fqdn:{host}");
        let iocs = self.iocs.clone();
        let host = host.to_string();
        lookup_and_promote(&self.tier1, self.cache.as_ref(), &cache_key, DEFAULT_CACHE_TTL, async move {
            iocs.is_allow_listed("fqdn", &host).await
        })
        .await
    }

    async fn is_ioc(&self, host: &str) -> Result<bool> {
        let cache_key = format!("ioc:fqdn:{host}");
        let iocs = self.iocs.clone();
        let host = host.to_string();
        lookup_and_promote(&self.tier1, self.cache.as_ref(), &cache_key, DEFAULT_CACHE_TTL, async move {
            iocs.is_ioc(IocType::Fqdn, &host).await
        })
        .await
    }
}

#[async_trait]
impl crate::engine::Rule for IocDomainRule {
    fn name(&self) -> &str {
        "ioc-domain"
    }

    fn applies_to(&self) -> &[ScanEventType] {
        &[ScanEventType::WebRequest]
    }

    async fn evaluate(&self, event: &ScanEvent) -> Result<Vec<crate::engine::RuleAlert>> {
        let Some(host) = Self::extract_host(event) else {
            return Ok(Vec::new());
        };

        if self.is_allow_listed(&host).await? {
            return Ok(Vec::new());
        }

        for candidate in Self::domain_and_parents(&host) {
            if self.is_ioc(&candidate).await? {
                return Ok(vec![crate::engine::RuleAlert {
                    dedupe_key: format!("ioc-domain:{candidate}"),
                    message: format!("request to known-bad domain {candidate}"),
                    context: serde_json::json!({ "host": host, "matched": candidate }),
                }]);
            }
        }

        Ok(Vec::new())
    }
}
