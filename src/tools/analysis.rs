//! 只读分析工具：fetch_metrics、compute_scores、run_risk_scoring、query_past_insights
//!
//! 全部为确定性函数：相同数据源输入得到相同输出。发现统一以 `{"findings": [...]}` 返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::AgentType;
use crate::memory::{InsightCategory, InsightFilter, InsightStore};
use crate::tools::metrics::MetricsSource;
use crate::tools::{Finding, FindingSeverity, Tool, ToolKind};

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn parse_args<T: for<'de> Deserialize<'de> + Default>(args: Value) -> Result<T, String> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    (den > 0.0).then(|| num / den)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// fetch_metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct FetchMetricsArgs {
    /// 只取这些指标；缺省返回全部
    #[serde(default)]
    names: Option<Vec<String>>,
}

pub struct FetchMetricsTool {
    source: Arc<dyn MetricsSource>,
    timeout: Option<Duration>,
}

impl FetchMetricsTool {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Tool for FetchMetricsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchMetrics
    }

    fn description(&self) -> &str {
        "Fetch named operational metrics (users, signups, revenue, churn). Args: names (optional list)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchMetricsArgs>()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: FetchMetricsArgs = parse_args(args)?;
        let all = self.source.metrics().await?;
        let (metrics, missing): (serde_json::Map<String, Value>, Vec<String>) = match args.names {
            Some(names) => {
                let mut picked = serde_json::Map::new();
                let mut missing = Vec::new();
                for name in names {
                    match all.get(&name) {
                        Some(v) => {
                            picked.insert(name, json!(v));
                        }
                        None => missing.push(name),
                    }
                }
                (picked, missing)
            }
            None => (all.iter().map(|(k, v)| (k.clone(), json!(v))).collect(), Vec::new()),
        };
        Ok(json!({ "metrics": metrics, "missing": missing }))
    }
}

// ---------------------------------------------------------------------------
// compute_scores
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
enum ScoreKind {
    Engagement,
    Churn,
    Growth,
    Content,
    Ux,
    Compliance,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ComputeScoresArgs {
    /// engagement | churn | growth | content | ux | compliance
    kind: ScoreKind,
}

pub struct ComputeScoresTool {
    source: Arc<dyn MetricsSource>,
    timeout: Option<Duration>,
}

impl ComputeScoresTool {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn engagement(&self) -> Result<Value, String> {
        let m = self.source.metrics().await?;
        let total = m.get("total_users").copied().unwrap_or(0.0);
        let active = m.get("active_users").copied().unwrap_or(0.0);
        let Some(rate) = ratio(active, total) else {
            return Ok(json!({ "scores": {}, "findings": [] }));
        };
        let mut findings = Vec::new();
        if rate < 0.3 {
            let severity = if rate < 0.15 {
                FindingSeverity::High
            } else {
                FindingSeverity::Medium
            };
            findings.push(
                Finding::present(
                    "low_engagement",
                    severity,
                    "Low engagement: most users are inactive",
                    format!("Only {:.1}% of users were active in the period", rate * 100.0),
                )
                .with_metric("engagement_rate", round3(rate))
                .with_metric("inactive_users", (total - active).max(0.0)),
            );
        } else {
            findings.push(Finding::clear("low_engagement", "Engagement within normal range"));
        }
        Ok(json!({
            "scores": { "engagement_rate": round3(rate), "engagement_score": round3(rate * 100.0) },
            "findings": findings,
        }))
    }

    async fn churn(&self) -> Result<Value, String> {
        let m = self.source.metrics().await?;
        let total = m.get("total_users").copied().unwrap_or(0.0);
        let inactive = m.get("inactive_users_30d").copied().unwrap_or(0.0);
        let churn_rate = m.get("churn_rate").copied();
        let inactive_ratio = ratio(inactive, total);

        let mut findings = Vec::new();
        match churn_rate {
            Some(rate) if rate >= 0.05 => {
                let severity = if rate >= 0.1 {
                    FindingSeverity::High
                } else {
                    FindingSeverity::Medium
                };
                findings.push(
                    Finding::present(
                        "churn_risk",
                        severity,
                        "Elevated churn: inactive users need re-engagement",
                        format!("Monthly churn rate is {:.1}%", rate * 100.0),
                    )
                    .with_metric("churn_rate", round3(rate))
                    .with_metric("inactive_users", inactive),
                );
            }
            Some(_) => findings.push(Finding::clear("churn_risk", "Churn rate within target")),
            None => {}
        }
        if let Some(r) = inactive_ratio {
            if r >= 0.1 {
                findings.push(
                    Finding::present(
                        "churn_risk",
                        FindingSeverity::Medium,
                        "Large dormant cohort (30 days inactive)",
                        format!("{:.1}% of users have been inactive for 30 days", r * 100.0),
                    )
                    .with_metric("inactive_ratio", round3(r))
                    .with_metric("inactive_users", inactive),
                );
            }
        }
        Ok(json!({
            "scores": {
                "churn_rate": churn_rate.map(round3),
                "inactive_ratio": inactive_ratio.map(round3),
            },
            "findings": findings,
        }))
    }

    async fn growth(&self) -> Result<Value, String> {
        let m = self.source.metrics().await?;
        let signups = m.get("signups_7d").copied().unwrap_or(0.0);
        let prev = m.get("signups_prev_7d").copied().unwrap_or(0.0);
        let revenue = m.get("revenue_7d").copied().unwrap_or(0.0);
        let revenue_prev = m.get("revenue_prev_7d").copied().unwrap_or(0.0);
        let signup_growth = ratio(signups - prev, prev);
        let revenue_growth = ratio(revenue - revenue_prev, revenue_prev);

        let mut findings = Vec::new();
        if let Some(g) = signup_growth {
            if g < 0.0 {
                let severity = if g < -0.2 {
                    FindingSeverity::High
                } else {
                    FindingSeverity::Medium
                };
                findings.push(
                    Finding::present(
                        "growth_slowdown",
                        severity,
                        "Signups declined week over week",
                        format!("Signups changed {:.1}% versus the previous week", g * 100.0),
                    )
                    .with_metric("signup_growth", round3(g))
                    .with_metric("signups_7d", signups),
                );
            } else {
                findings.push(Finding::clear("growth_slowdown", "Signups are growing"));
            }
        }
        if let Some(g) = revenue_growth {
            if g < -0.1 {
                findings.push(
                    Finding::present(
                        "revenue_decline",
                        FindingSeverity::Medium,
                        "Revenue declined week over week",
                        format!("Revenue changed {:.1}% versus the previous week", g * 100.0),
                    )
                    .with_metric("revenue_growth", round3(g)),
                );
            }
        }
        Ok(json!({
            "scores": {
                "signup_growth": signup_growth.map(round3),
                "revenue_growth": revenue_growth.map(round3),
            },
            "findings": findings,
        }))
    }

    async fn checks(&self, area: &str) -> Result<Value, String> {
        let checks = self.source.checks(area).await?;
        let passed = checks.iter().filter(|c| c.passed).count();
        let findings: Vec<Finding> = checks
            .iter()
            .map(|c| {
                if c.passed {
                    Finding::clear(&c.name, format!("{} passed", c.name))
                } else {
                    Finding::present(
                        &c.name,
                        FindingSeverity::parse_lenient(c.severity.as_deref()),
                        format!("{} check failed", c.name.replace('_', " ")),
                        c.detail.clone(),
                    )
                }
            })
            .collect();
        let score = ratio(passed as f64, checks.len() as f64).map(|r| round3(r * 100.0));
        let mut scores = serde_json::Map::new();
        scores.insert(format!("{area}_score"), json!(score));
        scores.insert("checks".into(), json!(checks.len()));
        scores.insert("passed".into(), json!(passed));
        Ok(json!({ "scores": scores, "findings": findings }))
    }
}

#[async_trait]
impl Tool for ComputeScoresTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ComputeScores
    }

    fn description(&self) -> &str {
        "Compute deterministic scores and threshold findings. Args: kind (engagement|churn|growth|content|ux|compliance)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ComputeScoresArgs>()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: ComputeScoresArgs =
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?;
        match args.kind {
            ScoreKind::Engagement => self.engagement().await,
            ScoreKind::Churn => self.churn().await,
            ScoreKind::Growth => self.growth().await,
            ScoreKind::Content => self.checks("content").await,
            ScoreKind::Ux => self.checks("ux").await,
            ScoreKind::Compliance => self.checks("compliance").await,
        }
    }
}

// ---------------------------------------------------------------------------
// run_risk_scoring
// ---------------------------------------------------------------------------

const DEFAULT_MIN_FAILED_LOGINS: u64 = 5;
const HIGH_RISK_FAILED_LOGINS: u64 = 20;

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct RiskScoringArgs {
    /// 登录失败次数达到该值才报告（缺省 5）
    #[serde(default)]
    min_failed_logins: Option<u64>,
}

pub struct RiskScoringTool {
    source: Arc<dyn MetricsSource>,
    timeout: Option<Duration>,
}

impl RiskScoringTool {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self {
            source,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Tool for RiskScoringTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RunRiskScoring
    }

    fn description(&self) -> &str {
        "Score security events per source IP and report brute-force suspects. Args: min_failed_logins (optional)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<RiskScoringArgs>()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: RiskScoringArgs = parse_args(args)?;
        let min = args.min_failed_logins.unwrap_or(DEFAULT_MIN_FAILED_LOGINS).max(1);
        let mut events = self.source.security_events().await?;
        events.sort_by(|a, b| b.failed_logins.cmp(&a.failed_logins).then(a.ip.cmp(&b.ip)));

        let findings: Vec<Finding> = events
            .iter()
            .filter(|e| e.failed_logins >= min)
            .map(|e| {
                let severity = if e.failed_logins >= HIGH_RISK_FAILED_LOGINS {
                    FindingSeverity::High
                } else {
                    FindingSeverity::Medium
                };
                Finding::present(
                    "brute_force",
                    severity,
                    format!("Brute-force login attempts from {}", e.ip),
                    format!(
                        "{} failed logins across {} accounts",
                        e.failed_logins, e.distinct_accounts
                    ),
                )
                .with_metric("ip", e.ip.clone())
                .with_metric("failed_logins", e.failed_logins)
                .with_metric("distinct_accounts", e.distinct_accounts)
            })
            .collect();

        let risk_score = events
            .iter()
            .map(|e| e.failed_logins)
            .sum::<u64>()
            .min(100);
        let findings = if findings.is_empty() {
            vec![Finding::clear("brute_force", "No brute-force activity detected")]
        } else {
            findings
        };
        Ok(json!({
            "risk_score": risk_score,
            "events_scanned": events.len(),
            "findings": findings,
        }))
    }
}

// ---------------------------------------------------------------------------
// query_past_insights
// ---------------------------------------------------------------------------

const DEFAULT_LOOKBACK_DAYS: u64 = 7;

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct PastInsightsArgs {
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
    /// 回看天数（缺省 7）
    #[serde(default)]
    days: Option<u64>,
}

/// 长期记忆：查询过去的洞察
pub struct PastInsightsTool {
    store: Arc<dyn InsightStore>,
    timeout: Option<Duration>,
}

impl PastInsightsTool {
    pub fn new(store: Arc<dyn InsightStore>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Tool for PastInsightsTool {
    fn kind(&self) -> ToolKind {
        ToolKind::QueryPastInsights
    }

    fn description(&self) -> &str {
        "Query past insights (long-term memory). Args: agent_type or category (optional), days (optional, default 7)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PastInsightsArgs>()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: PastInsightsArgs = parse_args(args)?;
        let filter = match (&args.agent_type, &args.category) {
            (Some(agent), _) => InsightFilter::Agent(agent.parse::<AgentType>()?),
            (None, Some(category)) => InsightFilter::Category(category.parse::<InsightCategory>()?),
            (None, None) => InsightFilter::Any,
        };
        let days = args.days.unwrap_or(DEFAULT_LOOKBACK_DAYS);
        let insights = self
            .store
            .query_past(filter, Duration::from_secs(days.saturating_mul(86_400)))
            .await
            .map_err(|e| e.to_string())?;

        let items: Vec<Value> = insights
            .iter()
            .take(50)
            .map(|i| {
                json!({
                    "id": i.id,
                    "agent_type": i.agent_type,
                    "category": i.category,
                    "severity": i.severity,
                    "title": i.title,
                    "is_resolved": i.is_resolved,
                    "created_at": i.created_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json!({ "count": insights.len(), "days": days, "insights": items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryInsightStore, NewInsight, Severity};
    use crate::tools::metrics::{Check, SecurityEvent, StaticMetricsSource};
    use crate::tools::extract_findings;

    fn source() -> Arc<dyn MetricsSource> {
        Arc::new(
            StaticMetricsSource::new()
                .with_metric("total_users", 1000.0)
                .with_metric("active_users", 100.0)
                .with_metric("inactive_users_30d", 300.0)
                .with_metric("churn_rate", 0.12)
                .with_security_event(SecurityEvent {
                    ip: "10.0.0.9".into(),
                    failed_logins: 25,
                    distinct_accounts: 4,
                })
                .with_security_event(SecurityEvent {
                    ip: "10.0.0.2".into(),
                    failed_logins: 6,
                    distinct_accounts: 1,
                })
                .with_security_event(SecurityEvent {
                    ip: "10.0.0.3".into(),
                    failed_logins: 1,
                    distinct_accounts: 1,
                })
                .with_check(
                    "compliance",
                    Check {
                        name: "cookie_consent".into(),
                        passed: false,
                        detail: "no banner".into(),
                        severity: Some("high".into()),
                    },
                ),
        )
    }

    #[tokio::test]
    async fn test_risk_scoring_reports_ip_per_suspect() {
        let tool = RiskScoringTool::new(source());
        let out = tool.execute(Value::Null).await.unwrap();
        let findings = extract_findings(&out);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, FindingSeverity::High);
        assert_eq!(findings[0].metrics["ip"], "10.0.0.9");
        assert_eq!(findings[1].severity, FindingSeverity::Medium);

        let strict = tool
            .execute(json!({"min_failed_logins": 30}))
            .await
            .unwrap();
        let findings = extract_findings(&strict);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].clear);
    }

    #[tokio::test]
    async fn test_churn_scores_flag_inactive_users() {
        let tool = ComputeScoresTool::new(source());
        let out = tool.execute(json!({"kind": "churn"})).await.unwrap();
        let findings = extract_findings(&out);
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.kind == "churn_risk" && !f.clear));
        assert_eq!(out["scores"]["inactive_ratio"], 0.3);
    }

    #[tokio::test]
    async fn test_engagement_and_checks() {
        let tool = ComputeScoresTool::new(source());
        let out = tool.execute(json!({"kind": "engagement"})).await.unwrap();
        assert_eq!(out["scores"]["engagement_rate"], 0.1);
        assert_eq!(extract_findings(&out)[0].severity, FindingSeverity::High);

        let out = tool.execute(json!({"kind": "compliance"})).await.unwrap();
        assert_eq!(out["scores"]["compliance_score"], 0.0);
        assert_eq!(extract_findings(&out)[0].kind, "cookie_consent");

        assert!(tool.execute(json!({"kind": "astrology"})).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_metrics_reports_missing_names() {
        let tool = FetchMetricsTool::new(source());
        let out = tool
            .execute(json!({"names": ["total_users", "nope"]}))
            .await
            .unwrap();
        assert_eq!(out["metrics"]["total_users"], 1000.0);
        assert_eq!(out["missing"][0], "nope");
    }

    #[tokio::test]
    async fn test_past_insights_filters_by_agent() {
        let store = Arc::new(InMemoryInsightStore::new());
        store
            .create(NewInsight::new(
                AgentType::SecuritySentinel,
                InsightCategory::Security,
                Severity::Critical,
                "Brute force",
            ))
            .await
            .unwrap();
        store
            .create(NewInsight::new(
                AgentType::ChurnPredictor,
                InsightCategory::Risk,
                Severity::Warning,
                "Churn",
            ))
            .await
            .unwrap();
        let tool = PastInsightsTool::new(store);
        let out = tool
            .execute(json!({"agent_type": "security_sentinel"}))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["insights"][0]["title"], "Brute force");
        assert!(tool.execute(json!({"agent_type": "wizard"})).await.is_err());
    }
}
