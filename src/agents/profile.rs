use crate::agents::AgentType;
use crate::memory::InsightCategory;
use crate::tools::ToolKind;

/// 单个 Agent 的静态画像
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub agent_type: AgentType,
    /// runAgent(type) 未给出目标时使用
    pub default_goal: &'static str,
    pub system_prompt: &'static str,
    /// 推理第一步优先使用的工具（Mock LLM 也依赖它）
    pub primary_tool: ToolKind,
    pub allowed_tools: Vec<ToolKind>,
    /// 报告中的风险写入洞察时的默认类别
    pub category: InsightCategory,
}

impl AgentProfile {
    pub fn for_agent(agent_type: AgentType) -> Self {
        use ToolKind::*;
        let (default_goal, system_prompt, primary_tool, allowed_tools, category) = match agent_type {
            AgentType::SecuritySentinel => (
                "Detect brute-force logins, suspicious IPs and account takeover attempts in the last window.",
                "You are the Security Sentinel. Look for attack patterns and rank them by risk.",
                RunRiskScoring,
                vec![RunRiskScoring, FetchMetrics, QueryPastInsights],
                InsightCategory::Security,
            ),
            AgentType::BusinessAnalyst => (
                "Summarise business health: signups, activity and revenue movement.",
                "You are the Business Analyst. Explain what moved and why it matters.",
                FetchMetrics,
                vec![FetchMetrics, ComputeScores, QueryPastInsights],
                InsightCategory::Growth,
            ),
            AgentType::ContentIntelligence => (
                "Find content that is underperforming or flagged by moderation.",
                "You are Content Intelligence. Judge content quality and reach.",
                ComputeScores,
                vec![ComputeScores, FetchMetrics, QueryPastInsights],
                InsightCategory::Content,
            ),
            AgentType::LegalCompliance => (
                "Check data-retention and consent compliance signals.",
                "You are the Legal Compliance agent. Report compliance gaps conservatively.",
                ComputeScores,
                vec![ComputeScores, FetchMetrics, QueryPastInsights],
                InsightCategory::Compliance,
            ),
            AgentType::GrowthStrategist => (
                "Identify growth levers and stalls in acquisition and activation.",
                "You are the Growth Strategist. Recommend concrete growth experiments.",
                ComputeScores,
                vec![ComputeScores, FetchMetrics, QueryPastInsights],
                InsightCategory::Growth,
            ),
            AgentType::ChurnPredictor => (
                "Estimate churn risk and find inactive user cohorts that need re-engagement.",
                "You are the Churn Predictor. Quantify retention risk.",
                ComputeScores,
                vec![ComputeScores, FetchMetrics, QueryPastInsights],
                InsightCategory::Risk,
            ),
            AgentType::UxAuditor => (
                "Find UX friction: slow pages, error spikes and abandoned flows.",
                "You are the UX Auditor. Point at the friction users actually hit.",
                ComputeScores,
                vec![ComputeScores, FetchMetrics, QueryPastInsights],
                InsightCategory::Content,
            ),
            AgentType::IssueFixer => (
                "Apply bounded remediation to unresolved insights.",
                "",
                QueryPastInsights,
                vec![QueryPastInsights],
                InsightCategory::Risk,
            ),
        };
        Self {
            agent_type,
            default_goal,
            system_prompt,
            primary_tool,
            allowed_tools,
            category,
        }
    }

    /// compute_scores 的默认 kind（由 Agent 领域决定）
    pub fn score_kind(&self) -> &'static str {
        match self.agent_type {
            AgentType::ChurnPredictor => "churn",
            AgentType::GrowthStrategist | AgentType::BusinessAnalyst => "growth",
            AgentType::ContentIntelligence => "content",
            AgentType::LegalCompliance => "compliance",
            AgentType::UxAuditor => "ux",
            AgentType::SecuritySentinel | AgentType::IssueFixer => "engagement",
        }
    }

    pub fn allows(&self, tool: ToolKind) -> bool {
        self.allowed_tools.contains(&tool)
    }

    /// 主工具的默认调用（写入 system prompt 的 `Primary call:` 行）
    pub fn primary_call(&self) -> serde_json::Value {
        let args = match self.primary_tool {
            ToolKind::ComputeScores => serde_json::json!({ "kind": self.score_kind() }),
            _ => serde_json::json!({}),
        };
        serde_json::json!({ "tool": self.primary_tool.as_str(), "args": args })
    }
}
