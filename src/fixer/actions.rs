//! 外部动作提供方（发送召回邮件、通知负责人、封禁 IP）
//!
//! 对引擎而言是不透明的异步函数；传输方式不是引擎关心的事。
//! LoggingActionProvider 只记日志（dry-run）；WebhookActionProvider 以 JSON POST 到配置的 webhook，
//! 每个通道一个熔断器。未配置的通道返回 NotConfigured，由修复器吞掉并记录为未送达。

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ActionsSection;
use crate::resilience::{BreakerError, BreakerRegistry};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action channel '{0}' is not configured")]
    NotConfigured(String),
    #[error("action channel '{0}' unavailable (circuit open)")]
    Unavailable(String),
    #[error("action channel '{0}' timed out")]
    Timeout(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// 一封召回邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachMessage {
    pub user_id: String,
    pub email: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait ActionProvider: Send + Sync {
    async fn send_outreach(&self, message: &OutreachMessage) -> Result<(), ActionError>;

    async fn notify_owner(&self, subject: &str, body: &str) -> Result<(), ActionError>;

    async fn block_ip(&self, ip: IpAddr, ttl: Duration, reason: &str) -> Result<(), ActionError>;
}

/// 只记录日志的提供方（未配置任何 webhook 时使用）
#[derive(Debug, Default)]
pub struct LoggingActionProvider;

#[async_trait]
impl ActionProvider for LoggingActionProvider {
    async fn send_outreach(&self, message: &OutreachMessage) -> Result<(), ActionError> {
        tracing::info!(user_id = %message.user_id, subject = %message.subject, "[dry-run] outreach email");
        Ok(())
    }

    async fn notify_owner(&self, subject: &str, _body: &str) -> Result<(), ActionError> {
        tracing::info!(subject, "[dry-run] owner notification");
        Ok(())
    }

    async fn block_ip(&self, ip: IpAddr, ttl: Duration, reason: &str) -> Result<(), ActionError> {
        tracing::info!(%ip, ttl_secs = ttl.as_secs(), reason, "[dry-run] block ip");
        Ok(())
    }
}

/// Webhook 提供方
pub struct WebhookActionProvider {
    client: reqwest::Client,
    owner_url: Option<String>,
    outreach_url: Option<String>,
    firewall_url: Option<String>,
    breakers: Arc<BreakerRegistry>,
}

impl WebhookActionProvider {
    pub fn new(section: &ActionsSection, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            owner_url: section.owner_webhook.clone(),
            outreach_url: section.outreach_webhook.clone(),
            firewall_url: section.firewall_webhook.clone(),
            breakers,
        }
    }

    async fn post(
        &self,
        channel: &str,
        url: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), ActionError> {
        let url = url.ok_or_else(|| ActionError::NotConfigured(channel.to_string()))?;
        let breaker = self.breakers.get_or_create(&format!("webhook:{channel}"));
        let request = async {
            let resp = self
                .client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if resp.status().is_success() {
                Ok::<(), String>(())
            } else {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                Err(format!("{status}: {text}"))
            }
        };
        match breaker.call(request).await {
            Ok(()) => Ok(()),
            Err(BreakerError::Open(_)) => Err(ActionError::Unavailable(channel.to_string())),
            Err(BreakerError::Timeout { .. }) => Err(ActionError::Timeout(channel.to_string())),
            Err(BreakerError::Inner(e)) => Err(ActionError::Delivery(e)),
        }
    }
}

#[async_trait]
impl ActionProvider for WebhookActionProvider {
    async fn send_outreach(&self, message: &OutreachMessage) -> Result<(), ActionError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| ActionError::Delivery(e.to_string()))?;
        self.post("outreach", self.outreach_url.as_deref(), payload)
            .await
    }

    async fn notify_owner(&self, subject: &str, body: &str) -> Result<(), ActionError> {
        self.post(
            "owner",
            self.owner_url.as_deref(),
            serde_json::json!({ "subject": subject, "body": body }),
        )
        .await
    }

    async fn block_ip(&self, ip: IpAddr, ttl: Duration, reason: &str) -> Result<(), ActionError> {
        self.post(
            "firewall",
            self.firewall_url.as_deref(),
            serde_json::json!({
                "action": "block",
                "ip": ip.to_string(),
                "ttl_secs": ttl.as_secs(),
                "reason": reason,
            }),
        )
        .await
    }
}

/// 任一 webhook 已配置则用 Webhook 提供方，否则只记日志
pub fn create_action_provider(
    section: &ActionsSection,
    breakers: Arc<BreakerRegistry>,
) -> Arc<dyn ActionProvider> {
    let configured = section.owner_webhook.is_some()
        || section.outreach_webhook.is_some()
        || section.firewall_webhook.is_some();
    if configured {
        Arc::new(WebhookActionProvider::new(section, breakers))
    } else {
        tracing::warn!("no action webhooks configured, remediation runs in dry-run mode");
        Arc::new(LoggingActionProvider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_channel_fails_gracefully() {
        let section = ActionsSection {
            owner_webhook: Some("http://127.0.0.1:9/owner".into()),
            outreach_webhook: None,
            firewall_webhook: None,
        };
        let provider = WebhookActionProvider::new(&section, Arc::new(BreakerRegistry::default()));
        let msg = OutreachMessage {
            user_id: "u1".into(),
            email: "u1@example.com".into(),
            subject: "We miss you".into(),
            body: "Come back".into(),
        };
        assert!(matches!(
            provider.send_outreach(&msg).await,
            Err(ActionError::NotConfigured(c)) if c == "outreach"
        ));
        assert!(matches!(
            provider
                .block_ip("10.0.0.1".parse().unwrap(), Duration::from_secs(60), "x")
                .await,
            Err(ActionError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_logging_provider_always_succeeds() {
        let provider = LoggingActionProvider;
        assert!(provider.notify_owner("s", "b").await.is_ok());
        assert!(provider
            .block_ip("10.0.0.1".parse().unwrap(), Duration::from_secs(60), "x")
            .await
            .is_ok());
    }
}
