//! 报告层：执行摘要编译、置信度、对外（API）格式

pub mod compiler;

use serde::{Deserialize, Serialize};

pub use compiler::{confidence_score, DetectedRisk, ExecutiveReport, ReportCompiler};

/// 对外返回的精简结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReport {
    pub summary: String,
    pub confidence: f64,
    pub recommendation_count: usize,
    pub risk_count: usize,
    pub reasoning_steps: usize,
    pub execution_time_ms: u64,
    pub truncated: bool,
}

pub fn format_report_for_api(report: &ExecutiveReport) -> ApiReport {
    ApiReport {
        summary: report.executive_summary.clone(),
        confidence: report.confidence_score,
        recommendation_count: report.recommendations.len(),
        risk_count: report.detected_risks.len(),
        reasoning_steps: report.reasoning_steps,
        execution_time_ms: report.execution_time_ms,
        truncated: report.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;

    #[test]
    fn test_api_report_counts() {
        let report = ExecutiveReport {
            agent_type: AgentType::GrowthStrategist,
            session_id: "s".into(),
            executive_summary: "Signups fell".into(),
            confidence_score: 0.61,
            recommendations: vec!["a".into(), "b".into()],
            detected_risks: vec![],
            reasoning_steps: 3,
            execution_time_ms: 120,
            truncated: false,
            tool_calls: 2,
            successful_tool_calls: 2,
        };
        let api = format_report_for_api(&report);
        assert_eq!(api.recommendation_count, 2);
        assert_eq!(api.risk_count, 0);
        let v = serde_json::to_value(&api).unwrap();
        assert_eq!(v["summary"], "Signups fell");
        assert_eq!(v["confidence"], 0.61);
    }
}
