//! Mock / 脚本化 LLM 客户端（用于本地运行与测试，无需 API）
//!
//! MockLlmClient 是确定性的：第一轮按 system prompt 中的 `Primary call:` 发起主工具调用，
//! 看到 Observation 后给出结论。ScriptedLlmClient 按顺序返回预设回复。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::llm::{LlmClient, LlmError, Message, Role};

static PRIMARY_CALL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Primary call: (\{.*\})").ok());

/// 确定性 Mock：先调主工具，再总结
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn primary_call(messages: &[Message]) -> Option<String> {
        let re = PRIMARY_CALL.as_ref()?;
        messages
            .iter()
            .filter(|m| m.role == Role::System)
            .find_map(|m| re.captures(&m.content))
            .map(|c| c[1].to_string())
    }

    fn last_observation(messages: &[Message]) -> Option<&str> {
        messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .find_map(|m| m.content.strip_prefix("Observation: "))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(observation) = Self::last_observation(messages) {
            let mut preview: String = observation.chars().take(160).collect();
            if preview.len() < observation.len() {
                preview.push_str("...");
            }
            let answer = serde_json::json!({
                "thought": "The data is collected, summarising.",
                "final": {
                    "summary": format!("Analysis complete. Latest observation: {preview}"),
                    "recommendations": [],
                    "risks": []
                }
            });
            return Ok(answer.to_string());
        }

        match Self::primary_call(messages) {
            Some(call) => {
                let mut value: serde_json::Value = serde_json::from_str(&call)
                    .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;
                if let Some(obj) = value.as_object_mut() {
                    obj.insert(
                        "thought".into(),
                        serde_json::Value::String("Start with the primary data source.".into()),
                    );
                }
                Ok(value.to_string())
            }
            None => Ok("No tools are configured; nothing to analyse.".to_string()),
        }
    }
}

/// 脚本化客户端：按顺序弹出预设回复；脚本耗尽后返回 Provider 错误
#[derive(Debug)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// 仅成功回复的便捷构造
    pub fn from_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 每次回复前等待（模拟慢服务）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Provider("script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_calls_primary_then_concludes() {
        let mock = MockLlmClient;
        let system = Message::system(
            r#"You analyse churn.
Primary call: {"tool":"compute_scores","args":{"kind":"churn"}}"#,
        );
        let first = mock
            .complete(&[system.clone(), Message::user("Goal: find churn")])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(v["tool"], "compute_scores");
        assert_eq!(v["args"]["kind"], "churn");

        let second = mock
            .complete(&[
                system,
                Message::user("Goal: find churn"),
                Message::assistant(first),
                Message::user(r#"Observation: {"findings":[]}"#),
            ])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert!(v["final"]["summary"].as_str().unwrap().contains("findings"));
    }

    #[test]
    fn test_primary_call_pattern_is_shared() {
        assert!(PRIMARY_CALL.is_some());
        let first: *const Regex = PRIMARY_CALL.as_ref().unwrap();
        let system = Message::system(r#"Primary call: {"tool":"fetch_metrics","args":{}}"#);
        assert_eq!(
            MockLlmClient::primary_call(std::slice::from_ref(&system)).as_deref(),
            Some(r#"{"tool":"fetch_metrics","args":{}}"#)
        );
        assert!(MockLlmClient::primary_call(&[Message::user("Primary call: {}")]).is_none());
        let second: *const Regex = PRIMARY_CALL.as_ref().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let scripted = ScriptedLlmClient::from_replies(["a", "b"]);
        assert_eq!(scripted.complete(&[]).await.unwrap(), "a");
        assert_eq!(scripted.complete(&[]).await.unwrap(), "b");
        assert!(scripted.complete(&[]).await.is_err());
        assert_eq!(scripted.calls(), 3);
    }
}
