//! 洞察模型：Agent 产出的持久化发现（严重度 / 类别 / 置信度）

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightCategory {
    Growth,
    Risk,
    Security,
    Content,
    Compliance,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::Growth => "GROWTH",
            InsightCategory::Risk => "RISK",
            InsightCategory::Security => "SECURITY",
            InsightCategory::Content => "CONTENT",
            InsightCategory::Compliance => "COMPLIANCE",
        }
    }
}

impl fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsightCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GROWTH" => Ok(Self::Growth),
            "RISK" => Ok(Self::Risk),
            "SECURITY" => Ok(Self::Security),
            "CONTENT" => Ok(Self::Content),
            "COMPLIANCE" => Ok(Self::Compliance),
            other => Err(format!("unknown insight category: {other}")),
        }
    }
}

/// 严重度；派生的 Ord 即排序用的优先级（critical 最高）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn rank(&self) -> i64 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        match rank {
            r if r >= 2 => Severity::Critical,
            1 => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type InsightMetrics = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInsight {
    pub id: String,
    pub agent_type: AgentType,
    pub category: InsightCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub metrics: InsightMetrics,
    /// 恒在 [0, 1]
    pub confidence: f64,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 写入前的洞察；由存储分配 id 与时间
#[derive(Debug, Clone, PartialEq)]
pub struct NewInsight {
    pub agent_type: AgentType,
    pub category: InsightCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub metrics: InsightMetrics,
    pub confidence: f64,
    /// 审计型洞察（Fixed: ...）创建时即为已解决
    pub resolved: bool,
}

impl NewInsight {
    pub fn new(
        agent_type: AgentType,
        category: InsightCategory,
        severity: Severity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            agent_type,
            category,
            severity,
            title: title.into(),
            description: String::new(),
            recommendation: String::new(),
            metrics: InsightMetrics::new(),
            confidence: 0.0,
            resolved: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_metrics(mut self, metrics: InsightMetrics) -> Self {
        self.metrics.extend(metrics);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn resolved(mut self) -> Self {
        self.resolved = true;
        self
    }

    /// 分配 id 与时间戳；置信度在此处夹到 [0, 1]
    pub fn into_insight(self, now: DateTime<Utc>) -> AgentInsight {
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        AgentInsight {
            id: Uuid::new_v4().to_string(),
            agent_type: self.agent_type,
            category: self.category,
            severity: self.severity,
            title: self.title,
            description: self.description,
            recommendation: self.recommendation,
            metrics: self.metrics,
            confidence,
            is_resolved: self.resolved,
            resolved_at: self.resolved.then_some(now),
            created_at: now,
        }
    }
}

/// queryPast 的过滤条件：按 Agent 或按类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightFilter {
    Agent(AgentType),
    Category(InsightCategory),
    Any,
}

impl InsightFilter {
    pub fn matches(&self, insight: &AgentInsight) -> bool {
        match self {
            InsightFilter::Agent(a) => insight.agent_type == *a,
            InsightFilter::Category(c) => insight.category == *c,
            InsightFilter::Any => true,
        }
    }
}
