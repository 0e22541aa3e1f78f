use async_trait::async_trait;
use merrymaker_core::{AlertEvent, AlertSink, Error, Result};
use reqwest::{Client, Url};

const MAX_FIELD_LEN: usize = 128;

/// GoAlert-style HTTP sink (§4.7, §6): `POST url?summary=<=128>&details=<=128>&token=<token>`.
/// Any 2xx is success; the spec calls out 4xx as fatal and 5xx/network errors as retryable,
/// so `send` maps those onto `Ok(false)`/`Err(Transient)` for the job runner's classifier (§7).
pub struct GoAlertSink {
    cfg: GoAlertSinkConfig,
    client: Client,
}

#[derive(Debug, Clone)]
pub struct GoAlertSinkConfig {
    pub name: String,
    pub enabled: bool,
    pub endpoint: Url,
    pub token: String,
}

impl GoAlertSink {
    pub fn new(cfg: GoAlertSinkConfig) -> Self {
        Self { cfg, client: Client::new() }
    }
}

/// Truncates on a char boundary so a multi-byte UTF-8 sequence is never split (§6 field
/// caps are byte-length-agnostic in the spec; truncating on chars keeps the result valid).
fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[async_trait]
impl AlertSink for GoAlertSink {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn send(&self, event: &AlertEvent) -> Result<bool> {
        let summary = truncate(&format!("[{}] {}", event.level, event.rule), MAX_FIELD_LEN);
        let details = truncate(&event.description, MAX_FIELD_LEN);

        let response = self
            .client
            .post(self.cfg.endpoint.clone())
            .query(&[("summary", summary), ("details", details), ("token", self.cfg.token.clone())])
            .send()
            .await
            .map_err(|e| Error::transient(anyhow::anyhow!(e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(true)
        } else if status.is_client_error() {
            Ok(false)
        } else {
            Err(Error::transient(anyhow::anyhow!("goalert sink returned {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_utf8_char_boundaries() {
        let s = "a".repeat(130) + "é";
        let truncated = truncate(&s, MAX_FIELD_LEN);
        assert_eq!(truncated.chars().count(), MAX_FIELD_LEN);
    }

    #[test]
    fn truncate_is_a_no_op_under_the_limit() {
        assert_eq!(truncate("short", MAX_FIELD_LEN), "short");
    }
}
