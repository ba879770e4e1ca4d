//! 工具输出中的发现（finding）格式
//!
//! 分析工具统一以 `{"findings": [...]}` 报告发现；报告编译器从成功的 Observation 中收集它们。

use serde::{Deserialize, Serialize};

use crate::memory::{InsightMetrics, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    High,
    Medium,
    Low,
}

impl FindingSeverity {
    /// 置信度计算中的证据权重
    pub fn weight(&self) -> f64 {
        match self {
            FindingSeverity::High => 1.0,
            FindingSeverity::Medium => 0.6,
            FindingSeverity::Low => 0.3,
        }
    }

    pub fn to_insight_severity(self) -> Severity {
        match self {
            FindingSeverity::High => Severity::Critical,
            FindingSeverity::Medium => Severity::Warning,
            FindingSeverity::Low => Severity::Info,
        }
    }

    /// 宽松解析，未知值按 medium 处理
    pub fn parse_lenient(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("high") | Some("critical") => FindingSeverity::High,
            Some("low") | Some("info") => FindingSeverity::Low,
            _ => FindingSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: String,
    pub severity: FindingSeverity,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub metrics: InsightMetrics,
    /// true 表示该检查项明确“未发现问题”
    #[serde(default)]
    pub clear: bool,
}

impl Finding {
    pub fn present(
        kind: impl Into<String>,
        severity: FindingSeverity,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            severity,
            title: title.into(),
            detail: detail.into(),
            metrics: InsightMetrics::new(),
            clear: false,
        }
    }

    pub fn clear(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity: FindingSeverity::Low,
            title: title.into(),
            detail: String::new(),
            metrics: InsightMetrics::new(),
            clear: true,
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// 从工具结果中取出 findings；格式不符时返回空列表
pub fn extract_findings(value: &serde_json::Value) -> Vec<Finding> {
    value
        .get("findings")
        .and_then(|f| serde_json::from_value::<Vec<Finding>>(f.clone()).ok())
        .unwrap_or_default()
}
