//! 运营数据来源（外部协作方）
//!
//! 分析工具只通过 MetricsSource 读取数据：命名指标、安全事件、各领域的检查项。
//! StaticMetricsSource 从 JSON fixture 或构建器加载，确定性，供本地运行与测试使用。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 单个来源 IP 的登录失败统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub ip: String,
    pub failed_logins: u64,
    #[serde(default)]
    pub distinct_accounts: u64,
}

/// 领域检查项（合规 / 内容 / 体验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub detail: String,
    /// high | medium | low，缺省 medium
    #[serde(default)]
    pub severity: Option<String>,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metrics(&self) -> Result<BTreeMap<String, f64>, String>;

    async fn security_events(&self) -> Result<Vec<SecurityEvent>, String>;

    /// area: compliance | content | ux
    async fn checks(&self, area: &str) -> Result<Vec<Check>, String>;
}

/// 静态数据源
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticMetricsSource {
    pub metrics: BTreeMap<String, f64>,
    pub security_events: Vec<SecurityEvent>,
    pub checks: HashMap<String, Vec<Check>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON fixture 加载
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read fixture {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("parse fixture {}: {e}", path.display()))
    }

    /// 内置示例数据（无 fixture 时 CLI 使用）
    pub fn sample() -> Self {
        Self::new()
            .with_metric("total_users", 12_400.0)
            .with_metric("active_users", 3_100.0)
            .with_metric("inactive_users_30d", 1_450.0)
            .with_metric("churn_rate", 0.072)
            .with_metric("signups_7d", 410.0)
            .with_metric("signups_prev_7d", 520.0)
            .with_metric("revenue_7d", 18_250.0)
            .with_metric("revenue_prev_7d", 17_900.0)
            .with_security_event(SecurityEvent {
                ip: "203.0.113.7".into(),
                failed_logins: 37,
                distinct_accounts: 12,
            })
            .with_security_event(SecurityEvent {
                ip: "198.51.100.23".into(),
                failed_logins: 9,
                distinct_accounts: 2,
            })
            .with_check(
                "compliance",
                Check {
                    name: "privacy_policy_current".into(),
                    passed: true,
                    detail: "Privacy policy reviewed within 12 months".into(),
                    severity: None,
                },
            )
            .with_check(
                "compliance",
                Check {
                    name: "cookie_consent".into(),
                    passed: false,
                    detail: "Analytics cookies set before consent".into(),
                    severity: Some("high".into()),
                },
            )
            .with_check(
                "content",
                Check {
                    name: "stale_articles".into(),
                    passed: false,
                    detail: "14 help articles not updated in 180 days".into(),
                    severity: Some("low".into()),
                },
            )
            .with_check(
                "ux",
                Check {
                    name: "checkout_drop_off".into(),
                    passed: false,
                    detail: "62% of sessions abandon the checkout form".into(),
                    severity: None,
                },
            )
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_security_event(mut self, event: SecurityEvent) -> Self {
        self.security_events.push(event);
        self
    }

    pub fn with_check(mut self, area: impl Into<String>, check: Check) -> Self {
        self.checks.entry(area.into()).or_default().push(check);
        self
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn metrics(&self) -> Result<BTreeMap<String, f64>, String> {
        Ok(self.metrics.clone())
    }

    async fn security_events(&self) -> Result<Vec<SecurityEvent>, String> {
        Ok(self.security_events.clone())
    }

    async fn checks(&self, area: &str) -> Result<Vec<Check>, String> {
        Ok(self.checks.get(area).cloned().unwrap_or_default())
    }
}
