//! Agent 类型与画像
//!
//! AgentType 是封闭枚举；每个分析型 Agent 对应一个 AgentProfile（默认目标、系统提示词、主工具、可用工具、洞察类别）。

mod profile;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use profile::AgentProfile;

/// 平台上的 Agent（ISSUE_FIXER 为唯一允许产生真实副作用的 Agent）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    UxAuditor,
    SecuritySentinel,
    BusinessAnalyst,
    ContentIntelligence,
    LegalCompliance,
    GrowthStrategist,
    ChurnPredictor,
    IssueFixer,
}

impl AgentType {
    pub const ALL: [AgentType; 8] = [
        AgentType::UxAuditor,
        AgentType::SecuritySentinel,
        AgentType::BusinessAnalyst,
        AgentType::ContentIntelligence,
        AgentType::LegalCompliance,
        AgentType::GrowthStrategist,
        AgentType::ChurnPredictor,
        AgentType::IssueFixer,
    ];

    /// 除 ISSUE_FIXER 之外的分析型 Agent
    pub fn analysis_agents() -> Vec<AgentType> {
        Self::ALL
            .iter()
            .copied()
            .filter(|a| *a != AgentType::IssueFixer)
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::UxAuditor => "UX_AUDITOR",
            AgentType::SecuritySentinel => "SECURITY_SENTINEL",
            AgentType::BusinessAnalyst => "BUSINESS_ANALYST",
            AgentType::ContentIntelligence => "CONTENT_INTELLIGENCE",
            AgentType::LegalCompliance => "LEGAL_COMPLIANCE",
            AgentType::GrowthStrategist => "GROWTH_STRATEGIST",
            AgentType::ChurnPredictor => "CHURN_PREDICTOR",
            AgentType::IssueFixer => "ISSUE_FIXER",
        }
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile::for_agent(*self)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    /// 大小写不敏感，`-` 与 `_` 等价（security-sentinel / SECURITY_SENTINEL）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| format!("unknown agent type: {s}"))
    }
}
