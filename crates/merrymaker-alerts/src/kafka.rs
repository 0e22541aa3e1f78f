use async_trait::async_trait;
use merrymaker_core::{AlertEvent, AlertSink, Error, Result};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;

/// Kafka alert sink (§4.7, §6): one message per alert, key `"msg"`, value the `AlertV1`
/// JSON wire shape. Kafka has no 4xx-equivalent fatal rejection in the spec, so any send
/// failure is treated as `Transient` and retried by the job runner's classifier (§7).
pub struct KafkaAlertSink {
    name: String,
    enabled: bool,
    topic: String,
    producer: FutureProducer,
    send_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaAlertSinkConfig {
    pub name: String,
    pub enabled: bool,
    pub bootstrap_servers: String,
    pub topic: String,
    pub send_timeout: Duration,
}

/// The wire shape `{ rule, level, description, scanUrl, … }` named in §6.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertV1<'a> {
    rule: &'a str,
    level: &'a str,
    description: &'a str,
    scan_url: Option<&'a str>,
    context: &'a serde_json::Value,
}

impl KafkaAlertSink {
    pub fn new(cfg: KafkaAlertSinkConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            name: cfg.name,
            enabled: cfg.enabled,
            topic: cfg.topic,
            producer,
            send_timeout: cfg.send_timeout,
        })
    }
}

#[async_trait]
impl AlertSink for KafkaAlertSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, event: &AlertEvent) -> Result<bool> {
        let wire = AlertV1 {
            rule: &event.rule,
            level: &event.level,
            description: &event.description,
            scan_url: event.scan_url.as_deref(),
            context: &event.context,
        };
        let payload = serde_json::to_vec(&wire).map_err(|e| Error::fatal(anyhow::anyhow!(e)))?;

        let record = FutureRecord::to(&self.topic).key("msg").payload(&payload);

        match self.producer.send(record, Timeout::After(self.send_timeout)).await {
            Ok(_delivery) => Ok(true),
            Err((err, _owned_message)) => Err(Error::transient(anyhow::anyhow!(err))),
        }
    }
}
