//! The composition root: turns a `MerrymakerConfig` into the wired-up set of stores,
//! the rule engine, and the alert sink registry every subcommand needs.

use crate::config::MerrymakerConfig;
use anyhow::Context;
use merrymaker_core::{
    AlertStore, IocRepository, JobStore, MetricsSink, RuleCacheStore, ScanLogStore, ScanStore,
    ScheduledTaskStore, SeenStringRepository, TracingMetricsSink,
};
use merrymaker_rules::{IocDomainRule, RuleEngine, SeenStringRule, TieredCache};
use merrymaker_store::{PgJobStore, PgRulesStore, PgScanLogStore, PgScanStore, PgScheduledTaskStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    pub jobs: Arc<dyn JobStore>,
    pub scheduled_tasks: Arc<dyn ScheduledTaskStore>,
    pub scan_logs: Arc<dyn ScanLogStore>,
    pub scans: Arc<dyn ScanStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub seen_strings: Arc<dyn SeenStringRepository>,
    pub rule_engine: Arc<RuleEngine>,
    pub sinks: Arc<merrymaker_alerts::SinkRegistry>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl App {
    pub async fn connect(cfg: &MerrymakerConfig) -> anyhow::Result<Self> {
        let jobs_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&cfg.jobs_database_url)
            .await
            .context("connect jobs db")?;
        let rules_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&cfg.rules_database_url)
            .await
            .context("connect rules db")?;

        let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(jobs_pool.clone()));
        let scheduled_tasks: Arc<dyn ScheduledTaskStore> = Arc::new(PgScheduledTaskStore::new(jobs_pool));
        let scan_logs: Arc<dyn ScanLogStore> = Arc::new(PgScanLogStore::new(rules_pool.clone()));
        let scans: Arc<dyn ScanStore> = Arc::new(PgScanStore::new(rules_pool.clone()));
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

        let rules_store = Arc::new(PgRulesStore::new(rules_pool));
        let iocs: Arc<dyn IocRepository> = rules_store.clone();
        let rule_cache: Arc<dyn RuleCacheStore> = rules_store.clone();
        let seen_strings: Arc<dyn SeenStringRepository> = rules_store.clone();
        let alerts: Arc<dyn AlertStore> = rules_store;

        let tier1 = TieredCache::new(cfg.ioc_cache_max_elements, Duration::from_secs(cfg.ioc_cache_max_age_secs));
        let ioc_domain_rule = IocDomainRule::new(iocs, rule_cache, tier1);
        let ioc_domain_rule = SeenStringRule::new(ioc_domain_rule, seen_strings.clone());

        let rule_engine = Arc::new(RuleEngine::new(
            vec![Arc::new(ioc_domain_rule)],
            jobs.clone(),
            metrics.clone(),
        ));

        let sinks = Arc::new(build_sink_registry(cfg)?);

        Ok(Self {
            jobs,
            scheduled_tasks,
            scan_logs,
            scans,
            alerts,
            seen_strings,
            rule_engine,
            sinks,
            metrics,
        })
    }
}

fn build_sink_registry(cfg: &MerrymakerConfig) -> anyhow::Result<merrymaker_alerts::SinkRegistry> {
    use merrymaker_alerts::{GoAlertSink, GoAlertSinkConfig, KafkaAlertSink, KafkaAlertSinkConfig};

    let mut sinks: Vec<Arc<dyn merrymaker_core::AlertSink>> = Vec::new();

    let endpoint = reqwest::Url::parse(&cfg.alerts_goalert_endpoint).context("parse goalert endpoint")?;
    sinks.push(Arc::new(GoAlertSink::new(GoAlertSinkConfig {
        name: "goalert".to_string(),
        enabled: cfg.alerts_goalert_enabled,
        endpoint,
        token: cfg.alerts_goalert_token.clone(),
    })));

    sinks.push(Arc::new(
        KafkaAlertSink::new(KafkaAlertSinkConfig {
            name: "kafka".to_string(),
            enabled: cfg.alerts_kafka_enabled,
            bootstrap_servers: cfg.alerts_kafka_bootstrap_servers.clone(),
            topic: cfg.alerts_kafka_topic.clone(),
            send_timeout: Duration::from_secs(5),
        })
        .context("init kafka alert sink")?,
    ));

    Ok(merrymaker_alerts::SinkRegistry::new(sinks))
}
