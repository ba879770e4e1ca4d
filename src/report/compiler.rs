//! 报告编译器
//!
//! 由终态会话的转录和工具输出生成 ExecutiveReport：总结、置信度、建议、风险。
//! 转录稀疏时降级为空列表，不会失败。

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::agents::AgentType;
use crate::memory::{InsightCategory, InsightMetrics, NewInsight};
use crate::react::ReasoningSession;
use crate::tools::{extract_findings, Finding, FindingSeverity};

const W_SUCCESS: f64 = 0.35;
const W_EVIDENCE: f64 = 0.45;
const W_CORROBORATION: f64 = 0.20;
const CONTRADICTION_PENALTY: f64 = 0.15;
const MAX_CORROBORATING: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRisk {
    pub kind: String,
    pub severity: FindingSeverity,
    pub title: String,
    pub detail: String,
    pub metrics: InsightMetrics,
    /// 同类风险被至少两条发现报告
    pub corroborated: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveReport {
    pub agent_type: AgentType,
    pub session_id: String,
    pub executive_summary: String,
    pub confidence_score: f64,
    pub recommendations: Vec<String>,
    pub detected_risks: Vec<DetectedRisk>,
    pub reasoning_steps: usize,
    pub execution_time_ms: u64,
    pub truncated: bool,
    pub tool_calls: usize,
    pub successful_tool_calls: usize,
}

/// 置信度：
/// `clamp(0.35·success_ratio + 0.45·(1 − 0.5^evidence) + 0.20·min(corroborating, 4)/4 − 0.15·contradicted_kinds, 0, 1)`
///
/// evidence 为未被矛盾的发现的权重和（high 1.0 / medium 0.6 / low 0.3）；
/// corroborating 为同类（kind）至少有两条发现的发现数。无证据时只有工具可靠性一项。结果保留 3 位小数。
pub fn confidence_score(total_calls: usize, ok_calls: usize, findings: &[Finding]) -> f64 {
    let success_ratio = if total_calls == 0 {
        0.0
    } else {
        ok_calls as f64 / total_calls as f64
    };
    let contradicted = contradicted_kinds(findings);
    let present: Vec<&Finding> = findings
        .iter()
        .filter(|f| !f.clear && !contradicted.contains(f.kind.as_str()))
        .collect();

    let evidence: f64 = present.iter().map(|f| f.severity.weight()).sum();
    let mut per_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for f in &present {
        *per_kind.entry(f.kind.as_str()).or_default() += 1;
    }
    let corroborating = present
        .iter()
        .filter(|f| per_kind.get(f.kind.as_str()).copied().unwrap_or(0) >= 2)
        .count();

    let mut score = W_SUCCESS * success_ratio;
    if evidence > 0.0 {
        score += W_EVIDENCE * (1.0 - 0.5f64.powf(evidence));
        score += W_CORROBORATION * corroborating.min(MAX_CORROBORATING) as f64
            / MAX_CORROBORATING as f64;
    }
    score -= CONTRADICTION_PENALTY * contradicted.len() as f64;
    (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

/// 同时被报告“存在”和“clear”的 kind
fn contradicted_kinds(findings: &[Finding]) -> BTreeSet<&str> {
    let present: BTreeSet<&str> = findings
        .iter()
        .filter(|f| !f.clear)
        .map(|f| f.kind.as_str())
        .collect();
    findings
        .iter()
        .filter(|f| f.clear && present.contains(f.kind.as_str()))
        .map(|f| f.kind.as_str())
        .collect()
}

fn recommendation_for(finding: &Finding) -> String {
    match finding.kind.as_str() {
        "brute_force" => match finding.metrics.get("ip").and_then(|v| v.as_str()) {
            Some(ip) => format!("Block {ip} and enforce login rate limiting on affected accounts"),
            None => "Enforce login rate limiting and review failed-login sources".to_string(),
        },
        "churn_risk" | "low_engagement" => {
            "Launch a re-engagement campaign for inactive users".to_string()
        }
        "growth_slowdown" => "Review acquisition channels and run an activation experiment".to_string(),
        "revenue_decline" => "Review pricing and renewal pipeline for the last week".to_string(),
        _ => format!("Investigate: {}", finding.title),
    }
}

pub struct ReportCompiler;

impl ReportCompiler {
    /// 编译终态会话；未终态或无结论时也会给出（空）报告
    pub fn compile(session: &ReasoningSession, execution_time_ms: u64) -> ExecutiveReport {
        let total = session.tool_calls().count();
        let ok = session.tool_calls().filter(|c| c.is_ok()).count();

        // 相同工具重复返回的同一条发现只计一次
        let mut findings: Vec<Finding> = Vec::new();
        for call in session.tool_calls().filter(|c| c.is_ok()) {
            if let Some(result) = &call.result {
                for f in extract_findings(result) {
                    let dup = findings
                        .iter()
                        .any(|g| g.kind == f.kind && g.title == f.title && g.detail == f.detail && g.clear == f.clear);
                    if !dup {
                        findings.push(f);
                    }
                }
            }
        }

        let confidence = confidence_score(total, ok, &findings);
        let contradicted = contradicted_kinds(&findings);

        let present: Vec<&Finding> = findings
            .iter()
            .filter(|f| !f.clear && !contradicted.contains(f.kind.as_str()))
            .collect();
        let mut per_kind: BTreeMap<&str, usize> = BTreeMap::new();
        for f in &present {
            *per_kind.entry(f.kind.as_str()).or_default() += 1;
        }

        let mut risks: Vec<DetectedRisk> = present
            .iter()
            .map(|f| DetectedRisk {
                kind: f.kind.clone(),
                severity: f.severity,
                title: f.title.clone(),
                detail: f.detail.clone(),
                metrics: f.metrics.clone(),
                corroborated: per_kind.get(f.kind.as_str()).copied().unwrap_or(0) >= 2,
                recommendation: recommendation_for(f),
            })
            .collect();
        risks.sort_by(|a, b| b.severity.weight().total_cmp(&a.severity.weight()));

        let conclusion = session.conclusion.clone().unwrap_or_default();
        for text in conclusion.risks.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !risks.iter().any(|r| r.title == text) {
                risks.push(DetectedRisk {
                    kind: "reported".to_string(),
                    severity: FindingSeverity::Medium,
                    title: text.to_string(),
                    detail: String::new(),
                    metrics: InsightMetrics::new(),
                    corroborated: false,
                    recommendation: String::new(),
                });
            }
        }

        let mut recommendations: Vec<String> = Vec::new();
        let derived = risks
            .iter()
            .map(|r| r.recommendation.clone())
            .filter(|r| !r.is_empty());
        let disputed = contradicted
            .iter()
            .map(|k| format!("Re-check {k}: tool signals disagree"));
        for rec in conclusion
            .recommendations
            .iter()
            .map(|s| s.trim().to_string())
            .chain(derived)
            .chain(disputed)
        {
            if !rec.is_empty() && !recommendations.contains(&rec) {
                recommendations.push(rec);
            }
        }

        let executive_summary = if conclusion.summary.trim().is_empty() {
            let high = risks
                .iter()
                .filter(|r| r.severity == FindingSeverity::High)
                .count();
            if risks.is_empty() {
                format!("No significant findings ({ok} of {total} tool calls succeeded).")
            } else {
                format!(
                    "{} risks detected ({high} high) from {ok} of {total} successful tool calls.",
                    risks.len()
                )
            }
        } else {
            conclusion.summary.trim().to_string()
        };

        ExecutiveReport {
            agent_type: session.agent_type,
            session_id: session.id.clone(),
            executive_summary,
            confidence_score: confidence,
            recommendations,
            detected_risks: risks,
            reasoning_steps: session.current_step,
            execution_time_ms,
            truncated: session.truncated,
            tool_calls: total,
            successful_tool_calls: ok,
        }
    }

    /// 每个风险生成一条洞察（high -> critical, medium -> warning, low -> info）
    pub fn to_insights(report: &ExecutiveReport) -> Vec<NewInsight> {
        let profile = report.agent_type.profile();
        report
            .detected_risks
            .iter()
            .map(|risk| {
                let category = match risk.kind.as_str() {
                    "brute_force" => InsightCategory::Security,
                    "churn_risk" | "low_engagement" => InsightCategory::Risk,
                    _ => profile.category,
                };
                NewInsight::new(
                    report.agent_type,
                    category,
                    risk.severity.to_insight_severity(),
                    risk.title.clone(),
                )
                .with_description(risk.detail.clone())
                .with_recommendation(risk.recommendation.clone())
                .with_metrics(risk.metrics.clone())
                .with_metric("kind", serde_json::Value::String(risk.kind.clone()))
                .with_confidence(report.confidence_score)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Severity;
    use crate::react::{Action, Conclusion, ToolCall, TranscriptEntry};
    use serde_json::json;

    fn high(ip: &str) -> Finding {
        Finding::present("brute_force", FindingSeverity::High, format!("bf {ip}"), "x")
            .with_metric("ip", ip)
    }

    fn session_with(results: Vec<Result<serde_json::Value, String>>) -> ReasoningSession {
        let mut s = ReasoningSession::new(AgentType::SecuritySentinel, "g", 8);
        s.start().unwrap();
        for (i, r) in results.into_iter().enumerate() {
            s.advance_step().unwrap();
            let (result, error) = match r {
                Ok(v) => (Some(v), None),
                Err(e) => (None, Some(e)),
            };
            s.record(TranscriptEntry {
                step: i + 1,
                thought: String::new(),
                action: Action::CallTool(ToolCall {
                    name: "run_risk_scoring".into(),
                    arguments: json!({}),
                    result,
                    error,
                    attempt: 1,
                    duration_ms: 1,
                }),
                observation: String::new(),
            })
            .unwrap();
        }
        s.succeed(Conclusion::default(), false).unwrap();
        s
    }

    #[test]
    fn test_zero_evidence_only_counts_tool_reliability() {
        assert_eq!(confidence_score(0, 0, &[]), 0.0);
        assert_eq!(confidence_score(2, 1, &[]), 0.175);
    }

    #[test]
    fn test_corroboration_raises_confidence() {
        let weak = [Finding::present("brute_force", FindingSeverity::Low, "w", "")];
        let strong = [high("1.1.1.1"), high("2.2.2.2")];
        let weak_score = confidence_score(1, 1, &weak);
        let strong_score = confidence_score(1, 1, &strong);
        assert!(strong_score > weak_score);
        assert!((strong_score - 0.7875).abs() < 0.001);
    }

    #[test]
    fn test_contradiction_penalised_and_clamped() {
        let findings = [
            Finding::present("churn_risk", FindingSeverity::High, "a", ""),
            Finding::clear("churn_risk", "b"),
        ];
        assert_eq!(confidence_score(1, 0, &findings), 0.0);
        let all = [high("1.1.1.1"), high("2.2.2.2"), high("3.3.3.3"), high("4.4.4.4"), high("5.5.5.5")];
        let score = confidence_score(1, 1, &all);
        assert!(score <= 1.0 && score > 0.9);
    }

    #[test]
    fn test_compile_collects_risks_from_successful_calls() {
        let s = session_with(vec![
            Ok(json!({"findings": [high("1.1.1.1"), high("2.2.2.2")]})),
            Err("timeout".into()),
        ]);
        let report = ReportCompiler::compile(&s, 42);
        assert_eq!(report.detected_risks.len(), 2);
        assert!(report.detected_risks.iter().all(|r| r.corroborated));
        assert_eq!(report.tool_calls, 2);
        assert_eq!(report.successful_tool_calls, 1);
        assert_eq!(report.reasoning_steps, 2);
        assert!(report.recommendations[0].starts_with("Block 1.1.1.1"));
        assert!(report.executive_summary.contains("2 risks detected"));

        let insights = ReportCompiler::to_insights(&report);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].category, InsightCategory::Security);
        assert_eq!(insights[0].severity, Severity::Critical);
        assert_eq!(insights[0].metrics["ip"], "1.1.1.1");
    }

    #[test]
    fn test_sparse_transcript_degrades_gracefully() {
        let s = session_with(vec![]);
        let report = ReportCompiler::compile(&s, 0);
        assert!(report.detected_risks.is_empty());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.confidence_score, 0.0);
        assert!(report.executive_summary.starts_with("No significant findings"));
    }

    #[test]
    fn test_duplicate_tool_output_not_double_counted() {
        let out = json!({"findings": [high("1.1.1.1")]});
        let s = session_with(vec![Ok(out.clone()), Ok(out)]);
        let report = ReportCompiler::compile(&s, 0);
        assert_eq!(report.detected_risks.len(), 1);
        assert!(!report.detected_risks[0].corroborated);
    }
}
