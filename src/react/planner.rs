//! Planner：Think 步骤
//!
//! 由 Agent 画像、可用工具、转录与中期记忆拼出消息，经（熔断保护的）推理服务得到回复，
//! parse_decision 从文本中提取 JSON 并解析为工具调用或结论。

use std::sync::Arc;

use serde_json::Value;

use crate::agents::AgentProfile;
use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError, Message};
use crate::react::{Action, Conclusion, ReasoningSession, WorkingMemory};
use crate::tools::decision_schema_json;

/// Observation 写回推理服务时的最大字符数
const OBSERVATION_MAX_CHARS: usize = 4000;

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerDecision {
    /// 调用工具
    CallTool {
        thought: String,
        tool: String,
        args: Value,
    },
    /// 结束推理
    Conclude {
        thought: String,
        conclusion: Conclusion,
    },
}

/// 解析推理服务输出：
/// - 不含 JSON 的纯文本视为结论（summary 即文本）
/// - `{"tool": ...}` 为工具调用，`{"final": ...}` 为结论
/// - JSON 损坏返回 JsonParseError
pub fn parse_decision(output: &str) -> Result<PlannerDecision, AgentError> {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => trimmed,
        }
    } else {
        return Ok(PlannerDecision::Conclude {
            thought: String::new(),
            conclusion: Conclusion {
                summary: trimmed.to_string(),
                ..Conclusion::default()
            },
        });
    };

    let parsed: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| AgentError::JsonParseError(format!("expected a JSON object: {json_str}")))?;

    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if let Some(final_value) = obj.get("final") {
        let conclusion = match final_value {
            Value::String(summary) => Conclusion {
                summary: summary.clone(),
                ..Conclusion::default()
            },
            other => serde_json::from_value::<Conclusion>(other.clone())
                .map_err(|e| AgentError::JsonParseError(format!("invalid final: {e}")))?,
        };
        return Ok(PlannerDecision::Conclude {
            thought,
            conclusion,
        });
    }

    match obj.get("tool").and_then(Value::as_str) {
        Some(tool) if !tool.trim().is_empty() => Ok(PlannerDecision::CallTool {
            thought,
            tool: tool.trim().to_string(),
            args: obj.get("args").cloned().unwrap_or(Value::Null),
        }),
        _ => Err(AgentError::JsonParseError(format!(
            "object has neither \"tool\" nor \"final\": {json_str}"
        ))),
    }
}

/// 工具结果或错误转成 Observation 文本
pub fn observation_text(result: &Result<Value, AgentError>) -> String {
    let raw = match result {
        Ok(value) => value.to_string(),
        Err(e) => format!("Error: {e}"),
    };
    if raw.chars().count() > OBSERVATION_MAX_CHARS {
        let mut cut: String = raw.chars().take(OBSERVATION_MAX_CHARS).collect();
        cut.push_str("...(truncated)");
        cut
    } else {
        raw
    }
}

fn map_llm_error(e: LlmError) -> AgentError {
    match e {
        LlmError::Unavailable(name) => AgentError::ProviderUnavailable(name),
        LlmError::Timeout(name) => AgentError::ProviderTimeout(name),
        other => AgentError::LlmError(other.to_string()),
    }
}

/// Planner：持有推理服务客户端（应为 GatedLlmClient）
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 获取推理服务累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 拼 system（画像 + 工具 + 格式 + 中期记忆）+ 目标 + 转录中的工具调用与 Observation
    pub fn build_messages(
        &self,
        profile: &AgentProfile,
        tools_schema: &str,
        session: &ReasoningSession,
        working: &WorkingMemory,
    ) -> Vec<Message> {
        let system = format!(
            "{}\n\n## Available tools\n{}\n\n## Response format\n\
             Reply with exactly one JSON object. To act: {{\"thought\": \"...\", \"tool\": \"<name>\", \"args\": {{...}}}}. \
             To finish: {{\"thought\": \"...\", \"final\": {{\"summary\": \"...\", \"recommendations\": [...], \"risks\": [...]}}}}.\n\
             Schema:\n{}\n\nPrimary call: {}\n\nStep {} of {}.\n\n{}",
            profile.system_prompt,
            tools_schema,
            decision_schema_json(),
            profile.primary_call(),
            session.current_step,
            session.step_budget,
            working.to_prompt_section(),
        );

        let mut messages = vec![
            Message::system(system),
            Message::user(format!("Goal: {}", session.goal)),
        ];
        for entry in &session.transcript {
            if let Action::CallTool(call) = &entry.action {
                let decision = serde_json::json!({
                    "thought": entry.thought,
                    "tool": call.name,
                    "args": call.arguments,
                });
                messages.push(Message::assistant(decision.to_string()));
                messages.push(Message::user(format!("Observation: {}", entry.observation)));
            }
        }
        messages
    }

    /// Think：调用推理服务并解析决策
    pub async fn think(&self, messages: &[Message]) -> Result<PlannerDecision, AgentError> {
        let output = self.llm.complete(messages).await.map_err(map_llm_error)?;
        tracing::debug!(output_len = output.len(), "planner output");
        parse_decision(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_tool_call() {
        let d = parse_decision(
            r#"Sure. {"thought": "check ips", "tool": "run_risk_scoring", "args": {"min_failed_logins": 3}}"#,
        )
        .unwrap();
        match d {
            PlannerDecision::CallTool {
                thought,
                tool,
                args,
            } => {
                assert_eq!(thought, "check ips");
                assert_eq!(tool, "run_risk_scoring");
                assert_eq!(args["min_failed_logins"], 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_and_plain_text() {
        let d = parse_decision(
            "```json\n{\"thought\": \"done\", \"final\": {\"summary\": \"ok\", \"risks\": [\"r1\"]}}\n```",
        )
        .unwrap();
        assert_eq!(
            d,
            PlannerDecision::Conclude {
                thought: "done".into(),
                conclusion: Conclusion {
                    summary: "ok".into(),
                    recommendations: vec![],
                    risks: vec!["r1".into()],
                },
            }
        );

        match parse_decision("All quiet today.").unwrap() {
            PlannerDecision::Conclude { conclusion, .. } => {
                assert_eq!(conclusion.summary, "All quiet today.")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_decision(r#"{"tool": "fetch_metrics", "args": {"#),
            Err(AgentError::JsonParseError(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"thought": "hmm"}"#),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_think_maps_provider_errors() {
        let planner = Planner::new(Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Unavailable("p".into())),
            Err(LlmError::Timeout("p".into())),
        ])));
        assert!(matches!(
            planner.think(&[]).await,
            Err(AgentError::ProviderUnavailable(_))
        ));
        assert!(matches!(
            planner.think(&[]).await,
            Err(AgentError::ProviderTimeout(_))
        ));
    }

    #[test]
    fn test_messages_replay_transcript() {
        let planner = Planner::new(Arc::new(ScriptedLlmClient::new(vec![])));
        let profile = AgentType::ChurnPredictor.profile();
        let mut session = ReasoningSession::new(AgentType::ChurnPredictor, "find churn", 4);
        session.start().unwrap();
        session.advance_step().unwrap();
        session
            .record(crate::react::TranscriptEntry {
                step: 1,
                thought: "look".into(),
                action: Action::CallTool(crate::react::ToolCall {
                    name: "compute_scores".into(),
                    arguments: serde_json::json!({"kind": "churn"}),
                    result: Some(serde_json::json!({"findings": []})),
                    error: None,
                    attempt: 1,
                    duration_ms: 3,
                }),
                observation: r#"{"findings":[]}"#.into(),
            })
            .unwrap();

        let messages = planner.build_messages(&profile, "[]", &session, &WorkingMemory::new());
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("Primary call: "));
        assert_eq!(messages[1].content, "Goal: find churn");
        assert_eq!(messages[3].content, r#"Observation: {"findings":[]}"#);
    }
}
