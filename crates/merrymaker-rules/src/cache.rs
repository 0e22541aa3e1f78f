use merrymaker_core::Result;
use moka::sync::Cache;
use std::time::Duration;

/// The process-local Tier 1 of the rule engine's layered cache (§4.5 glossary). Bounded
/// by both size and age, the way the spec's `maxElements`/`maxAge` LRU is described;
/// `moka`'s sync cache gives us both evictions out of the box.
#[derive(Clone)]
pub struct TieredCache {
    tier1: Cache<String, bool>,
}

impl TieredCache {
    pub fn new(max_elements: u64, max_age: Duration) -> Self {
        Self {
            tier1: Cache::builder()
                .max_capacity(max_elements)
                .time_to_live(max_age)
                .build(),
        }
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.tier1.get(key)
    }

    pub fn insert(&self, key: String, value: bool) {
        self.tier1.insert(key, value);
    }
}

impl Default for TieredCache {
    /// `maxElements=1000`, `maxAge=1h` (§4.5 Tier 1).
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

/// Runs the Tier1 → Tier2 → Tier3 lookup-and-promote sequence described in §4.5 and
/// exercised by §8 scenario 4: a Tier 1 hit short-circuits; a Tier 2 hit promotes Tier 1;
/// a Tier 3 hit promotes both.
pub async fn lookup_and_promote(
    tier1: &TieredCache,
    tier2: &dyn merrymaker_core::RuleCacheStore,
    cache_key: &str,
    ttl: Duration,
    tier3: impl std::future::Future<Output = Result<bool>>,
) -> Result<bool> {
    if let Some(hit) = tier1.get(cache_key) {
        return Ok(hit);
    }

    if let Some(hit) = tier2.get(cache_key).await? {
        tier1.insert(cache_key.to_string(), hit);
        return Ok(hit);
    }

    let hit = tier3.await?;
    tier2.set(cache_key, hit, ttl).await?;
    tier1.insert(cache_key.to_string(), hit);
    Ok(hit)
}
