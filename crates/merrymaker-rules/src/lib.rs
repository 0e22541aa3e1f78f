//! The Rule Engine (§4.5): dispatches scan events to rule handlers and fronts the
//! authoritative IOC/allow-list tables with a two-tier cache (process-local LRU, then a
//! DB cache table) before ever touching `rules.iocs`/`rules.allow_list`.

mod cache;
mod engine;
mod ioc;
mod seen_string;

pub use cache::{lookup_and_promote, TieredCache};
pub use engine::{Rule, RuleAlert, RuleEngine};
pub use ioc::IocDomainRule;
pub use seen_string::{default_max_age, purge_seen_strings, SeenStringRule};
